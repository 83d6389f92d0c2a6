//! # Adaptive integration loop
//!
//! ## States
//!
//! ```text
//! Initializing -> Stepping -> (Accepted | Rejected) -> ... -> Completed | Terminated | Failed
//! ```
//!
//! - **Initializing**: validates the time span, tolerances and step bounds,
//!   checks that the initial state is finite, picks the first step (user
//!   supplied or automatic) and evaluates every event condition at `t0`.
//! - **Stepping**: clamps the proposed step to `max_step` and to the next stop
//!   time (`tstops`, then `tf`), which is hit exactly; calls the stepper and
//!   hands the normalized error to the step-size controller.
//! - **Rejected**: the step is retried from the same point with the shrunk
//!   step. Too many consecutive rejections fail the integration.
//! - **Accepted**: the step becomes a dense-output segment, the event engine
//!   inspects it, the (possibly truncated) segment and the samples are stored
//!   and time advances. Cancellation and the deadline are checked here.
//!
//! ## Events
//!
//! When events fire inside a segment the segment is cut at the event time,
//! the effects run in registration order and integration restarts from the
//! post-effect state. A state change restarts step selection from scratch;
//! an effect can also force the first step size or jump forward in time.
//!
//! ## Result
//!
//! `solve` always returns a `Solution`. Faults are reported through its
//! return code and `error`, together with everything integrated up to them;
//! the last sample is always the last accepted state.
//!
//! ## Example
//! ```
//! use RustedIVP::numerical::IVP::{IVPProblem, SolverConfig, CallbackSet, EventDefinition, StepperKind, solve};
//! use nalgebra::DVector;
//! // u' = u, stop when u = 2
//! let problem = IVPProblem::new(|u: &DVector<f64>, _p: &(), _t: f64| u.clone(), DVector::from_vec(vec![1.0]), (0.0, 5.0), ());
//! let callbacks = CallbackSet::new().with(EventDefinition::terminating("u = 2", |_t: f64, u: &DVector<f64>| u[0] - 2.0));
//! let sol = solve(&problem, &StepperKind::default(), &SolverConfig::default(), &callbacks);
//! assert!((sol.t.last().unwrap() - 2f64.ln()).abs() < 1e-2);
//! ```
use crate::Utils::logger::init_logger;
use crate::numerical::IVP::IVP_errors::IVPError;
use crate::numerical::IVP::common::{error_norm, select_initial_step, validate_first_step};
use crate::numerical::IVP::config::SolverConfig;
use crate::numerical::IVP::dense_output::{Interpolant, Segment};
use crate::numerical::IVP::events::{CallbackSet, EventEngine, EventFiring};
use crate::numerical::IVP::problem::IVPProblem;
use crate::numerical::IVP::solution::{ReturnCode, Solution};
use crate::numerical::IVP::step_control::{StepDecision, StepSizeController};
use crate::numerical::IVP::steppers::{StepOutcome, Stepper, StepperKind};
use log::{debug, info, warn};
use nalgebra::DVector;
use std::time::Instant;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IntegratorState {
    Initializing,
    Stepping,
    Accepted,
    Rejected,
    Completed,
    Terminated,
    Failed,
}

impl IntegratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntegratorState::Completed | IntegratorState::Terminated | IntegratorState::Failed
        )
    }
}

/// One trajectory in progress. Drive it with `step` or run it to the end with `solve`.
pub struct Integrator<'a, P> {
    problem: &'a IVPProblem<P>,
    stepper: &'a StepperKind,
    config: &'a SolverConfig,
    controller: StepSizeController,
    events: EventEngine,
    state: IntegratorState,
    t: f64,
    y: DVector<f64>,
    f: DVector<f64>,
    /// signed step proposal for the next attempt
    h: f64,
    t_final: f64,
    direction: f64,
    max_step: f64,
    /// stop times strictly inside the span, ordered along the direction
    tstops: Vec<f64>,
    next_stop: usize,
    last_error: f64,
    iterations: usize,
    solution: Solution,
}

impl<'a, P> Integrator<'a, P> {
    pub fn new(
        problem: &'a IVPProblem<P>,
        stepper: &'a StepperKind,
        config: &'a SolverConfig,
        callbacks: &CallbackSet,
    ) -> Self {
        let (t0, tf) = problem.tspan;
        let direction = problem.direction();
        let store = crate::numerical::IVP::dense_output::SegmentStore::new(
            direction,
            config.extrapolation_tolerance,
        );
        let mut tstops: Vec<f64> = config
            .tstops
            .iter()
            .cloned()
            .filter(|ts| direction * (ts - t0) > 0.0 && direction * (tf - ts) > 0.0)
            .collect();
        tstops.sort_by(|a, b| (direction * a).total_cmp(&(direction * b)));
        tstops.dedup();
        let n = problem.y0.len();
        let mut integrator = Integrator {
            problem,
            stepper,
            config,
            controller: StepSizeController::new(config.controller.clone(), config.max_rejections),
            events: EventEngine::new(
                callbacks,
                config.event_time_tolerance,
                config.event_midpoint_check,
                direction,
                tf,
            ),
            state: IntegratorState::Initializing,
            t: t0,
            y: problem.y0.clone(),
            f: DVector::zeros(n),
            h: 0.0,
            t_final: tf,
            direction,
            max_step: config.max_step.min((tf - t0).abs()),
            tstops,
            next_stop: 0,
            last_error: 0.0,
            iterations: 0,
            solution: Solution::new(stepper.name(), store),
        };
        integrator.initialize();
        integrator
    }

    fn initialize(&mut self) {
        let (t0, tf) = self.problem.tspan;
        self.solution.push_sample(t0, self.y.clone());
        if let Err(e) = self.validate_input() {
            self.fail(e);
            return;
        }
        let problem = self.problem;
        let rhs = |t: f64, y: &DVector<f64>| problem.rhs(t, y);
        self.f = rhs(t0, &self.y);
        self.solution.stats.nfev += 1;
        if self.f.iter().any(|v| !v.is_finite()) {
            let e = IVPError::NonFiniteState {
                t: t0,
                state: self.y.clone(),
            };
            self.fail(e);
            return;
        }
        self.events.rearm_at(t0, &self.y);
        if t0 == tf {
            info!("empty time span, nothing to integrate");
            self.finish(IntegratorState::Completed, None);
            return;
        }
        let h = match self.config.initial_step {
            Some(h) => match validate_first_step(h, t0, tf, &self.y) {
                Ok(h) => h.abs().min(self.max_step) * self.direction,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            },
            None => {
                self.solution.stats.nfev += 1;
                select_initial_step(
                    &rhs,
                    t0,
                    &self.y,
                    tf,
                    self.max_step,
                    &self.f,
                    self.direction,
                    self.stepper.order(),
                    &self.config.reltol,
                    &self.config.abstol,
                )
            }
        };
        self.h = h;
        info!(
            "{}: integrating {} equations on [{}, {}], first step {}",
            self.stepper.name(),
            self.y.len(),
            t0,
            tf,
            self.h
        );
        self.state = IntegratorState::Stepping;
    }

    fn validate_input(&self) -> Result<(), IVPError> {
        let (t0, tf) = self.problem.tspan;
        let invalid = |reason: &str| IVPError::InvalidInput {
            reason: reason.to_string(),
            t: t0,
            state: self.y.clone(),
        };
        if !t0.is_finite() || !tf.is_finite() {
            return Err(invalid("time span must be finite"));
        }
        if self.y.is_empty() {
            return Err(invalid("initial state is empty"));
        }
        if self.y.iter().any(|v| !v.is_finite()) {
            return Err(invalid("initial state must be finite"));
        }
        self.config.validate(t0, &self.y)
    }

    pub fn state(&self) -> IntegratorState {
        self.state
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn y(&self) -> &DVector<f64> {
        &self.y
    }

    /// step size that the next attempt will start from
    pub fn proposed_step(&self) -> f64 {
        self.h
    }

    /// normalized error of the most recent attempt
    pub fn last_error_norm(&self) -> f64 {
        self.last_error
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    fn upcoming_stop(&mut self) -> f64 {
        let d = self.direction;
        while self.next_stop < self.tstops.len() && d * (self.tstops[self.next_stop] - self.t) <= 0.0 {
            self.next_stop += 1;
        }
        self.tstops.get(self.next_stop).copied().unwrap_or(self.t_final)
    }

    fn fail(&mut self, error: IVPError) {
        warn!("integration failed: {}", error);
        self.solution.message = Some(error.to_string());
        self.solution.error = Some(error);
        self.finish(IntegratorState::Failed, None);
    }

    fn finish(&mut self, state: IntegratorState, message: Option<String>) {
        self.state = state;
        self.solution.retcode = match state {
            IntegratorState::Failed => ReturnCode::Failed,
            IntegratorState::Terminated => ReturnCode::Terminated,
            _ => ReturnCode::Success,
        };
        if message.is_some() {
            self.solution.message = message;
        }
        // the last sample is always the last accepted state
        let saved = matches!(self.solution.last(), Some((t, u)) if t == self.t && *u == self.y);
        if !saved {
            self.solution.push_sample(self.t, self.y.clone());
        }
    }

    fn step_size_error(&self, reason: String, h: f64) -> IVPError {
        IVPError::StepSize {
            reason,
            t: self.t,
            h,
            state: self.y.clone(),
        }
    }

    /// One attempt: a single stepper call followed by the controller decision.
    pub fn step(&mut self) -> IntegratorState {
        if !matches!(
            self.state,
            IntegratorState::Stepping | IntegratorState::Accepted | IntegratorState::Rejected
        ) {
            return self.state;
        }
        if self.iterations >= self.config.max_iters {
            let e = IVPError::MaxIterations {
                max_iters: self.config.max_iters,
                t: self.t,
                state: self.y.clone(),
            };
            self.fail(e);
            return self.state;
        }
        self.iterations += 1;
        self.state = IntegratorState::Stepping;

        let d = self.direction;
        let stop = self.upcoming_stop();
        let mut h = d * self.h.abs().min(self.max_step);
        let clamped = d * (self.t + h - stop) >= 0.0;
        if clamped {
            h = stop - self.t;
        } else if h.abs() < self.config.min_step {
            let e = self.step_size_error(
                format!("step size {} fell below min_step {}", h.abs(), self.config.min_step),
                h,
            );
            self.fail(e);
            return self.state;
        }
        let t_new = if clamped { stop } else { self.t + h };
        if t_new == self.t {
            let e = self.step_size_error("step size too small to advance time".to_string(), h);
            self.fail(e);
            return self.state;
        }

        let problem = self.problem;
        let rhs = |t: f64, y: &DVector<f64>| problem.rhs(t, y);
        let outcome = self.stepper.step(&rhs, self.t, &self.y, &self.f, h);
        self.solution.stats.nfev += outcome.nfev;
        self.solution.stats.nsteps += 1;

        if outcome.y_new.iter().any(|v| !v.is_finite()) {
            let e = IVPError::NonFiniteState {
                t: t_new,
                state: outcome.y_new.clone(),
            };
            self.fail(e);
            return self.state;
        }
        let err = match error_norm(
            &outcome.error,
            &self.y,
            &outcome.y_new,
            &self.config.reltol,
            &self.config.abstol,
        ) {
            Ok(err) => err,
            Err(reason) => {
                let e = IVPError::Tolerance {
                    reason,
                    t: self.t,
                    state: self.y.clone(),
                };
                self.fail(e);
                return self.state;
            }
        };
        self.last_error = err;

        match self.controller.propose(err, h, self.stepper.order()) {
            StepDecision::RejectionLimit { rejections } => {
                self.solution.stats.nreject += 1;
                let e = self.step_size_error(
                    format!("{} consecutive step rejections (error norm {:e})", rejections, err),
                    h,
                );
                self.fail(e);
            }
            StepDecision::Rejected { next_step } => {
                self.solution.stats.nreject += 1;
                if next_step.abs() < self.config.min_step {
                    let e = self.step_size_error(
                        format!("rejected step shrank below min_step {}", self.config.min_step),
                        next_step,
                    );
                    self.fail(e);
                } else {
                    self.h = next_step;
                    self.state = IntegratorState::Rejected;
                }
            }
            StepDecision::Accepted { next_step } => {
                self.solution.stats.naccept += 1;
                debug!("t = {} -> {}, err = {:e}", self.t, t_new, err);
                if let Err(e) = self.accept(t_new, outcome, next_step) {
                    self.fail(e);
                }
            }
        }
        self.state
    }

    fn accept(&mut self, t_new: f64, outcome: StepOutcome, next_step: f64) -> Result<(), IVPError> {
        let interpolant = match outcome.interpolant {
            _ if !self.config.dense => Interpolant::Linear,
            Some(interpolant) if self.stepper.supports_dense_output() => interpolant,
            _ => Interpolant::Hermite {
                f_old: self.f.clone(),
                f_new: outcome.f_new.clone(),
            },
        };
        let segment = Segment::new(self.t, t_new, self.y.clone(), outcome.y_new, interpolant);
        let firing = self.events.process_segment(&segment);
        self.solution.warnings.extend(self.events.take_warnings());
        match firing? {
            None => {
                self.t = t_new;
                self.y = segment.y_end.clone();
                self.f = outcome.f_new;
                self.h = next_step;
                self.solution.store_mut().append(segment)?;
                if self.config.save_everystep {
                    self.solution.push_sample(self.t, self.y.clone());
                }
            }
            Some(firing) => {
                let terminate = firing.terminate;
                let name = firing
                    .records
                    .last()
                    .map(|r| r.name.clone())
                    .unwrap_or_default();
                self.restart_after_events(segment, firing, outcome.f_new, next_step)?;
                if terminate {
                    let message = format!("terminated by event '{}' at t = {}", name, self.t);
                    info!("{}", message);
                    self.finish(IntegratorState::Terminated, Some(message));
                    return Ok(());
                }
            }
        }
        if self.t == self.t_final {
            info!("reached t = {}", self.t);
            self.finish(IntegratorState::Completed, None);
            return Ok(());
        }
        if let Some(token) = &self.config.cancel {
            if token.is_cancelled() {
                self.finish(
                    IntegratorState::Terminated,
                    Some(format!("cancelled at t = {}", self.t)),
                );
                return Ok(());
            }
        }
        if let Some(deadline) = self.config.deadline {
            if Instant::now() >= deadline {
                self.finish(
                    IntegratorState::Terminated,
                    Some(format!("deadline exceeded at t = {}", self.t)),
                );
                return Ok(());
            }
        }
        self.state = IntegratorState::Accepted;
        Ok(())
    }

    fn restart_after_events(
        &mut self,
        segment: Segment,
        firing: EventFiring,
        f_new: DVector<f64>,
        next_step: f64,
    ) -> Result<(), IVPError> {
        let step_end = segment.t_end;
        let cut = segment.truncate(firing.t)?;
        self.solution.store_mut().append(cut)?;
        self.solution.stats.nevents += firing.records.len();
        self.solution.event_log.extend(firing.records.iter().cloned());
        if firing.save_before {
            self.solution.push_sample(firing.t, firing.pre_state.clone());
        }
        if firing.new_time != firing.t {
            debug!("time jump {} -> {}", firing.t, firing.new_time);
            self.solution.store_mut().append(Segment::constant(
                firing.t,
                firing.new_time,
                firing.post_state.clone(),
            ))?;
        }
        if firing.save_after {
            self.solution.push_sample(firing.new_time, firing.post_state.clone());
        }
        self.t = firing.new_time;
        self.y = firing.post_state;
        let problem = self.problem;
        let rhs = |t: f64, y: &DVector<f64>| problem.rhs(t, y);
        if firing.modified || self.t != step_end {
            self.f = rhs(self.t, &self.y);
            self.solution.stats.nfev += 1;
            if self.f.iter().any(|v| !v.is_finite()) {
                return Err(IVPError::NonFiniteState {
                    t: self.t,
                    state: self.y.clone(),
                });
            }
        } else {
            self.f = f_new;
        }
        self.h = if let Some(h) = firing.step_override {
            self.direction * h
        } else if firing.modified && self.t != self.t_final {
            self.controller.reset();
            self.solution.stats.nfev += 1;
            let fresh = select_initial_step(
                &rhs,
                self.t,
                &self.y,
                self.t_final,
                self.max_step,
                &self.f,
                self.direction,
                self.stepper.order(),
                &self.config.reltol,
                &self.config.abstol,
            );
            self.direction * fresh.abs().min(next_step.abs())
        } else {
            next_step
        };
        self.events.rearm_at(self.t, &self.y);
        Ok(())
    }

    /// Finish the bookkeeping and hand out the result. A trajectory that was not
    /// driven to the end is reported as terminated.
    pub fn into_solution(mut self) -> Solution {
        if !self.state.is_terminal() {
            let message = format!("integration stopped by the caller at t = {}", self.t);
            self.finish(IntegratorState::Terminated, Some(message));
        }
        self.solution
    }
}

/// Integrate `problem` with `stepper` from `tspan.0` to `tspan.1`.
pub fn solve<P>(
    problem: &IVPProblem<P>,
    stepper: &StepperKind,
    config: &SolverConfig,
    callbacks: &CallbackSet,
) -> Solution {
    if let Some(level) = config.log_level {
        init_logger(level, None, true);
    }
    let mut integrator = Integrator::new(problem, stepper, config, callbacks);
    while !integrator.state().is_terminal() {
        integrator.step();
    }
    let solution = integrator.into_solution();
    solution.print_statistics();
    solution
}
