//! Estimators module
//!
//! Physics-based recursive estimation of unobserved power-subsystem state,
//! used to bridge telemetry gaps.

pub mod hidden_state;
pub mod kalman;
pub mod physics;

use thiserror::Error;

pub use hidden_state::{
    EstimatorPhase, GapEstimate, GapTick, HiddenStateEstimate, HiddenStateEstimator, StateBinding,
};
pub use kalman::{KalmanState, PowerKalmanFilter, StateMeasurement, StepOutcome};
pub use physics::{PowerModel, StateComponent, StateMatrix, StateVector};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("a gap is already being predicted ({remaining} ticks left)")]
    GapInProgress { remaining: usize },
    #[error("no gap is open")]
    NotPredicting,
    #[error("innovation covariance is singular")]
    SingularInnovation,
    #[error("measurement of {} is not finite", .0.name())]
    NonFiniteMeasurement(StateComponent),
}
