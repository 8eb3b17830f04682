//! Extended Kalman filter over the power-subsystem state.
//!
//! Predict linearises [`PowerModel`] around the current mean. Update uses a
//! fixed 4x4 measurement matrix whose diagonal masks unmeasured components,
//! so partial measurements need no dynamic sizing. After every step the
//! covariance is symmetrised and its eigenvalues floored, and state
//! components are clamped to their physical range.

use nalgebra::SymmetricEigen;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::physics::{PowerModel, StateComponent, StateMatrix, StateVector};
use super::EstimatorError;
use crate::config::EstimatorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanState {
    pub mean: StateVector,
    pub covariance: StateMatrix,
}

impl KalmanState {
    pub fn value(&self, component: StateComponent) -> f64 {
        self.mean[component.index()]
    }

    pub fn variance(&self, component: StateComponent) -> f64 {
        let i = component.index();
        self.covariance[(i, i)]
    }

    pub fn std_dev(&self, component: StateComponent) -> f64 {
        self.variance(component).max(0.0).sqrt()
    }

    pub fn trace(&self) -> f64 {
        self.covariance.trace()
    }

    pub fn min_eigenvalue(&self) -> f64 {
        SymmetricEigen::new(self.covariance).eigenvalues.min()
    }

    pub fn is_finite(&self) -> bool {
        self.mean.iter().all(|v| v.is_finite()) && self.covariance.iter().all(|v| v.is_finite())
    }
}

/// Direct readings of state components; `None` for anything not measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMeasurement {
    pub charge: Option<f64>,
    pub voltage: Option<f64>,
    pub solar: Option<f64>,
    pub efficiency: Option<f64>,
}

impl StateMeasurement {
    pub fn get(&self, component: StateComponent) -> Option<f64> {
        match component {
            StateComponent::Charge => self.charge,
            StateComponent::Voltage => self.voltage,
            StateComponent::Solar => self.solar,
            StateComponent::Efficiency => self.efficiency,
        }
    }

    pub fn set(&mut self, component: StateComponent, value: f64) {
        let slot = match component {
            StateComponent::Charge => &mut self.charge,
            StateComponent::Voltage => &mut self.voltage,
            StateComponent::Solar => &mut self.solar,
            StateComponent::Efficiency => &mut self.efficiency,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        StateComponent::ALL.iter().all(|&c| self.get(c).is_none())
    }
}

/// What a single predict or update step had to correct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Components pulled back into their physical range.
    pub clamped: Vec<StateComponent>,
    /// Covariance needed eigenvalue repair.
    pub repaired: bool,
    /// Mean relative variance reduction over measured components (update only).
    pub variance_reduction: f64,
}

#[derive(Debug, Clone)]
pub struct PowerKalmanFilter {
    state: KalmanState,
    model: PowerModel,
    process_noise: StateMatrix,
    measurement_noise: StateMatrix,
    lower: StateVector,
    upper: StateVector,
    eigen_floor: f64,
    inject_noise: bool,
}

impl PowerKalmanFilter {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            state: KalmanState {
                mean: StateVector::from(config.initial_state),
                covariance: StateMatrix::from_diagonal(&StateVector::from(
                    config.initial_covariance,
                )),
            },
            model: PowerModel::from_config(config),
            process_noise: StateMatrix::from_diagonal(&StateVector::from(config.process_noise)),
            measurement_noise: StateMatrix::from_diagonal(&StateVector::from(
                config.measurement_noise,
            )),
            lower: StateVector::from(config.lower_limits),
            upper: StateVector::from(config.upper_limits),
            eigen_floor: config.eigen_floor,
            inject_noise: config.inject_process_noise,
        }
    }

    pub fn state(&self) -> &KalmanState {
        &self.state
    }

    pub fn model(&self) -> &PowerModel {
        &self.model
    }

    /// Replaces the mean, keeping the current covariance.
    pub fn set_mean(&mut self, mean: StateVector) {
        self.state.mean = mean;
        self.clamp_state();
    }

    pub fn set_covariance(&mut self, covariance: StateMatrix) {
        self.state.covariance = covariance;
        self.repair_covariance();
    }

    /// Advances one step: `x <- f(x)`, `P <- F P F^T + Q`.
    pub fn predict<R: Rng + ?Sized>(&mut self, load_power: f64, rng: &mut R) -> StepOutcome {
        let previous = self.state.clone();
        let f = self.model.jacobian(&previous.mean, load_power);
        let mut mean = self.model.transition(&previous.mean, load_power);

        if self.inject_noise {
            for component in [StateComponent::Solar, StateComponent::Efficiency] {
                let i = component.index();
                if let Ok(noise) = Normal::new(0.0, self.process_noise[(i, i)].sqrt()) {
                    mean[i] += noise.sample(rng);
                }
            }
        }

        let covariance = f * previous.covariance * f.transpose() + self.process_noise;
        self.state = KalmanState { mean, covariance };

        if !self.state.is_finite() {
            log::warn!("Non-finite prediction (load {load_power} W); holding previous mean");
            self.state = KalmanState {
                mean: previous.mean,
                covariance: previous.covariance + self.process_noise,
            };
        }

        let repaired = self.repair_covariance();
        let clamped = self.clamp_state();
        log::trace!(
            "predict: charge {:.3}% voltage {:.3} V trace(P) {:.4}",
            self.state.mean[0],
            self.state.mean[1],
            self.state.trace()
        );
        StepOutcome {
            clamped,
            repaired,
            variance_reduction: 0.0,
        }
    }

    /// Measurement update with whichever components are present.
    pub fn update(&mut self, z: &StateMeasurement) -> Result<StepOutcome, EstimatorError> {
        let mut h = StateMatrix::zeros();
        let mut observed = StateVector::zeros();
        let mut measured = Vec::new();
        for component in StateComponent::ALL {
            if let Some(value) = z.get(component) {
                if !value.is_finite() {
                    return Err(EstimatorError::NonFiniteMeasurement(component));
                }
                let i = component.index();
                h[(i, i)] = 1.0;
                observed[i] = value;
                measured.push(i);
            }
        }
        if measured.is_empty() {
            return Ok(StepOutcome::default());
        }

        let prior = self.state.covariance;
        let innovation_cov = h * prior * h.transpose() + self.measurement_noise;
        let innovation_inv = innovation_cov
            .try_inverse()
            .ok_or(EstimatorError::SingularInnovation)?;
        let gain = prior * h.transpose() * innovation_inv;

        let innovation = observed - h * self.state.mean;
        self.state.mean += gain * innovation;
        self.state.covariance = (StateMatrix::identity() - gain * h) * prior;

        let repaired = self.repair_covariance();
        let clamped = self.clamp_state();

        let reduction = measured
            .iter()
            .map(|&i| {
                let before = prior[(i, i)];
                if before > 0.0 {
                    (1.0 - self.state.covariance[(i, i)] / before).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .sum::<f64>()
            / measured.len() as f64;

        Ok(StepOutcome {
            clamped,
            repaired,
            variance_reduction: reduction,
        })
    }

    /// Symmetrises P and floors its eigenvalues. Returns true if a floor was applied.
    fn repair_covariance(&mut self) -> bool {
        let p = self.state.covariance;
        let symmetric = (p + p.transpose()) * 0.5;
        let mut eigen = SymmetricEigen::new(symmetric);
        let min = eigen.eigenvalues.min();

        if min >= self.eigen_floor {
            self.state.covariance = symmetric;
            return false;
        }
        if min < -self.eigen_floor {
            log::warn!("Covariance not PSD (min eigenvalue {min:.3e}); flooring");
        }
        let floor = self.eigen_floor;
        eigen.eigenvalues = eigen.eigenvalues.map(|v| v.max(floor));
        let rebuilt = eigen.recompose();
        self.state.covariance = (rebuilt + rebuilt.transpose()) * 0.5;
        true
    }

    fn clamp_state(&mut self) -> Vec<StateComponent> {
        let mut clamped = Vec::new();
        for component in StateComponent::ALL {
            let i = component.index();
            let value = self.state.mean[i];
            let bounded = if value.is_finite() {
                value.clamp(self.lower[i], self.upper[i])
            } else {
                0.5 * (self.lower[i] + self.upper[i])
            };
            if bounded != value {
                log::warn!(
                    "State {} = {value:.4} outside [{}, {}]; clamped",
                    component.name(),
                    self.lower[i],
                    self.upper[i]
                );
                self.state.mean[i] = bounded;
                clamped.push(component);
            }
        }
        clamped
    }
}
