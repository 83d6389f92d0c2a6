//! Accept/reject decision and next step proposal from a normalized error estimate.
//!
//! The factor applied to the current step is
//! `min(max_growth, max(min_shrink, safety * err^(-1/(order+1)) * err_prev^beta))`.
//! With `beta = 0` (default) this is the classic elementary controller, with
//! `beta > 0` it is the PI controller of Lund stabilisation (Hairer & Wanner,
//! Solving ODE II, IV.2).
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub safety: f64,
    pub max_growth: f64,
    pub min_shrink: f64,
    pub beta: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            safety: 0.9,
            max_growth: 10.0,
            min_shrink: 0.2,
            beta: 0.0,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.safety > 0.0 && self.safety <= 1.0) {
            return Err(format!("controller safety must lie in (0, 1], got {}", self.safety));
        }
        if !(self.max_growth >= 1.0 && self.max_growth.is_finite()) {
            return Err(format!("controller max_growth must be >= 1, got {}", self.max_growth));
        }
        if !(self.min_shrink > 0.0 && self.min_shrink < 1.0) {
            return Err(format!("controller min_shrink must lie in (0, 1), got {}", self.min_shrink));
        }
        if !(self.beta >= 0.0 && self.beta < 1.0) {
            return Err(format!("controller beta must lie in [0, 1), got {}", self.beta));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepDecision {
    Accepted { next_step: f64 },
    Rejected { next_step: f64 },
    /// consecutive rejections reached the configured limit
    RejectionLimit { rejections: usize },
}

impl StepDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, StepDecision::Accepted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StepSizeController {
    pub config: ControllerConfig,
    max_rejections: usize,
    consecutive_rejections: usize,
    previous_error: f64,
    rejected_last: bool,
}

impl StepSizeController {
    pub fn new(config: ControllerConfig, max_rejections: usize) -> Self {
        StepSizeController {
            config,
            max_rejections,
            consecutive_rejections: 0,
            previous_error: 1.0,
            rejected_last: false,
        }
    }

    /// forget the history, e.g. after an event changed the state
    pub fn reset(&mut self) {
        self.consecutive_rejections = 0;
        self.previous_error = 1.0;
        self.rejected_last = false;
    }

    pub fn consecutive_rejections(&self) -> usize {
        self.consecutive_rejections
    }

    fn factor(&self, error: f64, order: usize) -> f64 {
        let cfg = &self.config;
        if error == 0.0 {
            return cfg.max_growth;
        }
        let exponent = -1.0 / (order as f64 + 1.0);
        let mut factor = cfg.safety * error.powf(exponent);
        if cfg.beta > 0.0 {
            factor *= self.previous_error.powf(cfg.beta);
        }
        factor.max(cfg.min_shrink).min(cfg.max_growth)
    }

    /// `error` is the normalized error of the step of size `current_step`;
    /// `order` is the order of the embedded error estimate.
    pub fn propose(&mut self, error: f64, current_step: f64, order: usize) -> StepDecision {
        let factor = self.factor(error, order);
        if error <= 1.0 {
            // no growth right after a rejection
            let factor = if self.rejected_last { factor.min(1.0) } else { factor };
            self.consecutive_rejections = 0;
            self.rejected_last = false;
            self.previous_error = error.max(1e-4);
            debug!("step accepted: err = {:e}, factor = {}", error, factor);
            StepDecision::Accepted {
                next_step: current_step * factor,
            }
        } else {
            self.consecutive_rejections += 1;
            self.rejected_last = true;
            debug!(
                "step rejected ({} in a row): err = {:e}, factor = {}",
                self.consecutive_rejections, error, factor
            );
            if self.consecutive_rejections >= self.max_rejections {
                return StepDecision::RejectionLimit {
                    rejections: self.consecutive_rejections,
                };
            }
            StepDecision::Rejected {
                next_step: current_step * factor.min(1.0),
            }
        }
    }
}
