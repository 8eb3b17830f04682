//! Power-subsystem transition model used by the state estimator.
//!
//! State: `[charge %, battery voltage V, solar input W, efficiency]`.
//! - charge integrates net power: `c' = c + k (s e - L)`, with
//!   `k = dt / (capacity_wh * 3600) * 100`
//! - voltage follows the open-circuit curve: `v' = v + ocv(c') - ocv(c)`
//! - solar input and efficiency are random walks (mean unchanged)

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;

pub const STATE_DIM: usize = 4;

pub type StateVector = SVector<f64, STATE_DIM>;
pub type StateMatrix = SMatrix<f64, STATE_DIM, STATE_DIM>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateComponent {
    Charge,
    Voltage,
    Solar,
    Efficiency,
}

impl StateComponent {
    pub const ALL: [StateComponent; STATE_DIM] = [
        StateComponent::Charge,
        StateComponent::Voltage,
        StateComponent::Solar,
        StateComponent::Efficiency,
    ];

    pub fn index(self) -> usize {
        match self {
            StateComponent::Charge => 0,
            StateComponent::Voltage => 1,
            StateComponent::Solar => 2,
            StateComponent::Efficiency => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StateComponent::Charge => "charge",
            StateComponent::Voltage => "voltage",
            StateComponent::Solar => "solar",
            StateComponent::Efficiency => "efficiency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerModel {
    pub dt_seconds: f64,
    pub battery_capacity_wh: f64,
    pub voltage_empty: f64,
    pub voltage_full: f64,
    pub ocv_curvature: f64,
}

impl Default for PowerModel {
    fn default() -> Self {
        Self::from_config(&EstimatorConfig::default())
    }
}

impl PowerModel {
    pub fn from_config(config: &EstimatorConfig) -> Self {
        Self {
            dt_seconds: config.dt_seconds,
            battery_capacity_wh: config.battery_capacity_wh,
            voltage_empty: config.voltage_empty,
            voltage_full: config.voltage_full,
            ocv_curvature: config.ocv_curvature,
        }
    }

    /// Percent of charge gained per watt over one step.
    #[inline]
    pub fn charge_gain(&self) -> f64 {
        self.dt_seconds / (self.battery_capacity_wh * 3600.0) * 100.0
    }

    /// Saturating exponential from `voltage_empty` at 0% to `voltage_full` at 100%.
    pub fn open_circuit_voltage(&self, charge_pct: f64) -> f64 {
        let tau = self.ocv_curvature;
        let soc = charge_pct / 100.0;
        let span = self.voltage_full - self.voltage_empty;
        self.voltage_empty + span * (1.0 - (-soc / tau).exp()) / (1.0 - (-1.0 / tau).exp())
    }

    /// dV/d(charge %) of the open-circuit curve.
    pub fn ocv_slope(&self, charge_pct: f64) -> f64 {
        let tau = self.ocv_curvature;
        let soc = charge_pct / 100.0;
        let span = self.voltage_full - self.voltage_empty;
        span * (-soc / tau).exp() / (tau * (1.0 - (-1.0 / tau).exp())) / 100.0
    }

    pub fn transition(&self, x: &StateVector, load_power: f64) -> StateVector {
        let (charge, voltage, solar, efficiency) = (x[0], x[1], x[2], x[3]);
        let next_charge = charge + self.charge_gain() * (solar * efficiency - load_power);
        let next_voltage = voltage + self.open_circuit_voltage(next_charge)
            - self.open_circuit_voltage(charge);
        StateVector::new(next_charge, next_voltage, solar, efficiency)
    }

    /// Jacobian of [`PowerModel::transition`] at `x`.
    pub fn jacobian(&self, x: &StateVector, load_power: f64) -> StateMatrix {
        let (charge, _, solar, efficiency) = (x[0], x[1], x[2], x[3]);
        let k = self.charge_gain();
        let next_charge = charge + k * (solar * efficiency - load_power);
        let slope_next = self.ocv_slope(next_charge);

        let mut f = StateMatrix::identity();
        f[(0, 2)] = k * efficiency;
        f[(0, 3)] = k * solar;
        f[(1, 0)] = slope_next - self.ocv_slope(charge);
        f[(1, 2)] = slope_next * k * efficiency;
        f[(1, 3)] = slope_next * k * solar;
        f
    }
}
