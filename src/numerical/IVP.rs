//! Adaptive integration of initial value problems with dense output and events.
/// error taxonomy and non-fatal warnings
pub mod IVP_errors;
/// tolerances, error norm and automatic first step
pub mod common;
/// solver settings, TOML loading and cancellation token
pub mod config;
/// interpolants, segments and the segment store
pub mod dense_output;
/// many trajectories serially or on the rayon pool
pub mod ensemble;
/// continuous and discrete events, root location, event contexts
pub mod events;
/// the adaptive loop and `solve`
pub mod integrator;
///
pub mod problem;
///
pub mod solution;
/// accept/reject decision and step size proposal
pub mod step_control;
/// embedded Runge-Kutta steppers behind the `Stepper` trait
pub mod steppers;

mod IVP_tests;

pub use IVP_errors::{ConfigError, IVPError, PossibleMissedEvent};
pub use common::Tolerance;
pub use config::{CancellationToken, SolverConfig};
pub use dense_output::{DenseInterpolant, Interpolant, Segment, SegmentStore};
pub use ensemble::{EnsembleAlgorithm, EnsembleProblem, EnsembleSolution, solve_ensemble};
pub use events::{
    CallbackSet, CrossingDirection, EventContext, EventDefinition, EventRecord, SavePosition,
};
pub use integrator::{Integrator, IntegratorState, solve};
pub use problem::IVPProblem;
pub use solution::{ReturnCode, Solution, SolverStats};
pub use step_control::{ControllerConfig, StepDecision, StepSizeController};
pub use steppers::{Method, Stepper, StepperKind};
