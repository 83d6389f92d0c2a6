//! Error taxonomy of the adaptive integrator.
//!
//! Every fault raised while a trajectory is being computed carries the time and
//! the state at which it happened, so a failed `Solution` can always be
//! inspected at the point of failure. Step rejections are routine and never
//! show up here.
use nalgebra::DVector;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IVPError {
    /// tolerances are non-positive, non-finite, of the wrong length, or the error norm blew up
    #[error("tolerance error at t = {t}: {reason}")]
    Tolerance {
        reason: String,
        t: f64,
        state: DVector<f64>,
    },
    /// step size collapsed, stopped advancing time, or too many consecutive rejections
    #[error("step size error at t = {t} (h = {h}): {reason}")]
    StepSize {
        reason: String,
        t: f64,
        h: f64,
        state: DVector<f64>,
    },
    /// a segment was appended that does not start where the previous one ended
    #[error("segment starting at {found} does not continue the trajectory ending at {expected}")]
    Discontinuity { expected: f64, found: f64 },
    #[error("t = {t} lies outside the integrated range [{t_min}, {t_max}]")]
    OutOfRange { t: f64, t_min: f64, t_max: f64 },
    #[error("dense output provides derivatives up to order 1, requested order {order}")]
    UnsupportedDerivative { order: usize },
    #[error("non-finite state produced at t = {t}")]
    NonFiniteState { t: f64, state: DVector<f64> },
    #[error("maximum number of iterations {max_iters} reached at t = {t}")]
    MaxIterations {
        max_iters: usize,
        t: f64,
        state: DVector<f64>,
    },
    #[error("invalid input at t = {t}: {reason}")]
    InvalidInput {
        reason: String,
        t: f64,
        state: DVector<f64>,
    },
    /// an event effect asked for a time jump backwards or past the end of the span
    #[error("event effect requested a jump from t = {from} to t = {to}")]
    InvalidTimeJump { from: f64, to: f64 },
}

impl IVPError {
    /// time at which the error was raised, when it is attached to a trajectory point
    pub fn time(&self) -> Option<f64> {
        match self {
            IVPError::Tolerance { t, .. }
            | IVPError::StepSize { t, .. }
            | IVPError::OutOfRange { t, .. }
            | IVPError::NonFiniteState { t, .. }
            | IVPError::MaxIterations { t, .. }
            | IVPError::InvalidInput { t, .. } => Some(*t),
            IVPError::InvalidTimeJump { from, .. } => Some(*from),
            IVPError::Discontinuity { found, .. } => Some(*found),
            IVPError::UnsupportedDerivative { .. } => None,
        }
    }

    /// state at which the error was raised, when there is one
    pub fn state(&self) -> Option<&DVector<f64>> {
        match self {
            IVPError::Tolerance { state, .. }
            | IVPError::StepSize { state, .. }
            | IVPError::NonFiniteState { state, .. }
            | IVPError::MaxIterations { state, .. }
            | IVPError::InvalidInput { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// Non-fatal: the condition kept its sign at both ends of a segment but not at
/// the midpoint, so a pair of crossings may have been stepped over.
#[derive(Debug, Clone, PartialEq)]
pub struct PossibleMissedEvent {
    pub index: usize,
    pub name: String,
    pub t_start: f64,
    pub t_end: f64,
}

impl std::fmt::Display for PossibleMissedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event {} ('{}') may have been missed between t = {} and t = {}",
            self.index, self.name, self.t_start, self.t_end
        )
    }
}

/// Problems reading a `SolverConfig` from TOML.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("key `{key}` has invalid value: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("unknown key `{0}`")]
    UnknownKey(String),
}
