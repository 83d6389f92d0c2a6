//! Solver settings.
//!
//! `SolverConfig` is an explicit, immutable bundle handed to every solve call.
//! It can be built in code (`Default` plus struct update syntax) or read from a
//! TOML document:
//! ```toml
//! reltol = 1e-8
//! abstol = [1e-10, 1e-10]
//! max_step = 0.1
//! tstops = [0.5, 1.5]
//! log_level = "warn"
//!
//! [controller]
//! safety = 0.85
//! ```
use crate::numerical::IVP::IVP_errors::{ConfigError, IVPError};
use crate::numerical::IVP::common::{Tolerance, validate_tol};
use crate::numerical::IVP::step_control::ControllerConfig;
use log::LevelFilter;
use nalgebra::DVector;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Shared flag checked by the integration loop after every accepted step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub abstol: Tolerance,
    pub reltol: Tolerance,
    /// upper bound of |h|; infinite means the whole span
    pub max_step: f64,
    /// lower bound of |h| below which the integration fails
    pub min_step: f64,
    /// signed first step; chosen automatically when `None`
    pub initial_step: Option<f64>,
    pub max_rejections: usize,
    pub max_iters: usize,
    pub event_time_tolerance: f64,
    /// slack allowed when querying the dense output just outside the integrated range
    pub extrapolation_tolerance: f64,
    pub save_everystep: bool,
    /// keep high-order interpolants; linear between steps otherwise
    pub dense: bool,
    /// probe condition functions at segment midpoints for missed crossing pairs
    pub event_midpoint_check: bool,
    /// times the integrator must step on exactly
    pub tstops: Vec<f64>,
    pub controller: ControllerConfig,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
    /// initialise the crate logger at this level on solve
    pub log_level: Option<LevelFilter>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            abstol: Tolerance::Scalar(1e-6),
            reltol: Tolerance::Scalar(1e-3),
            max_step: f64::INFINITY,
            min_step: 0.0,
            initial_step: None,
            max_rejections: 50,
            max_iters: 100_000,
            event_time_tolerance: 1e-12,
            extrapolation_tolerance: 1e-12,
            save_everystep: true,
            dense: true,
            event_midpoint_check: true,
            tstops: Vec::new(),
            controller: ControllerConfig::default(),
            deadline: None,
            cancel: None,
            log_level: None,
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tolerances(&mut self, reltol: impl Into<Tolerance>, abstol: impl Into<Tolerance>) {
        self.reltol = reltol.into();
        self.abstol = abstol.into();
    }

    /// Checks that do not depend on the right-hand side.
    pub fn validate(&self, t0: f64, y0: &DVector<f64>) -> Result<(), IVPError> {
        validate_tol(&self.reltol, &self.abstol, y0.len()).map_err(|reason| IVPError::Tolerance {
            reason,
            t: t0,
            state: y0.clone(),
        })?;
        let invalid = |reason: String| IVPError::InvalidInput {
            reason,
            t: t0,
            state: y0.clone(),
        };
        if !(self.max_step > 0.0) {
            return Err(invalid(format!("`max_step` must be positive, got {}", self.max_step)));
        }
        if !(self.min_step >= 0.0 && self.min_step <= self.max_step) {
            return Err(invalid(format!(
                "`min_step` must lie in [0, max_step], got {}",
                self.min_step
            )));
        }
        if self.max_rejections == 0 {
            return Err(invalid("`max_rejections` must be at least 1".to_string()));
        }
        if self.max_iters == 0 {
            return Err(invalid("`max_iters` must be at least 1".to_string()));
        }
        if !(self.event_time_tolerance > 0.0 && self.event_time_tolerance.is_finite()) {
            return Err(invalid(format!(
                "`event_time_tolerance` must be positive, got {}",
                self.event_time_tolerance
            )));
        }
        if !(self.extrapolation_tolerance >= 0.0) {
            return Err(invalid("`extrapolation_tolerance` must be non-negative".to_string()));
        }
        if let Some(bad) = self.tstops.iter().find(|t| !t.is_finite()) {
            return Err(invalid(format!("`tstops` contains a non-finite time {}", bad)));
        }
        self.controller.validate().map_err(invalid)?;
        Ok(())
    }

    pub fn from_toml_file<Pth: AsRef<Path>>(path: Pth) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Keys absent from the document keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = content.parse()?;
        let mut config = SolverConfig::default();
        for (key, value) in table.iter() {
            match key.as_str() {
                "abstol" => config.abstol = toml_tolerance(key, value)?,
                "reltol" => config.reltol = toml_tolerance(key, value)?,
                "max_step" => config.max_step = toml_f64(key, value)?,
                "min_step" => config.min_step = toml_f64(key, value)?,
                "initial_step" => config.initial_step = Some(toml_f64(key, value)?),
                "max_rejections" => config.max_rejections = toml_usize(key, value)?,
                "max_iters" => config.max_iters = toml_usize(key, value)?,
                "event_time_tolerance" => config.event_time_tolerance = toml_f64(key, value)?,
                "extrapolation_tolerance" => {
                    config.extrapolation_tolerance = toml_f64(key, value)?
                }
                "save_everystep" => config.save_everystep = toml_bool(key, value)?,
                "dense" => config.dense = toml_bool(key, value)?,
                "event_midpoint_check" => config.event_midpoint_check = toml_bool(key, value)?,
                "tstops" => config.tstops = toml_f64_array(key, value)?,
                "log_level" => {
                    let name = value.as_str().ok_or_else(|| invalid_value(key, "expected a string"))?;
                    let level = LevelFilter::from_str(name)
                        .map_err(|_| invalid_value(key, &format!("unknown log level '{}'", name)))?;
                    config.log_level = Some(level);
                }
                "controller" => {
                    let sub = value
                        .as_table()
                        .ok_or_else(|| invalid_value(key, "expected a table"))?;
                    for (ckey, cvalue) in sub.iter() {
                        let full = format!("controller.{}", ckey);
                        match ckey.as_str() {
                            "safety" => config.controller.safety = toml_f64(&full, cvalue)?,
                            "max_growth" => config.controller.max_growth = toml_f64(&full, cvalue)?,
                            "min_shrink" => config.controller.min_shrink = toml_f64(&full, cvalue)?,
                            "beta" => config.controller.beta = toml_f64(&full, cvalue)?,
                            _ => return Err(ConfigError::UnknownKey(full)),
                        }
                    }
                }
                _ => return Err(ConfigError::UnknownKey(key.clone())),
            }
        }
        Ok(config)
    }
}

fn invalid_value(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn toml_f64(key: &str, value: &toml::Value) -> Result<f64, ConfigError> {
    match value {
        toml::Value::Float(f) => Ok(*f),
        toml::Value::Integer(i) => Ok(*i as f64),
        _ => Err(invalid_value(key, "expected a number")),
    }
}

fn toml_usize(key: &str, value: &toml::Value) -> Result<usize, ConfigError> {
    match value {
        toml::Value::Integer(i) if *i >= 0 => Ok(*i as usize),
        _ => Err(invalid_value(key, "expected a non-negative integer")),
    }
}

fn toml_bool(key: &str, value: &toml::Value) -> Result<bool, ConfigError> {
    value
        .as_bool()
        .ok_or_else(|| invalid_value(key, "expected true or false"))
}

fn toml_f64_array(key: &str, value: &toml::Value) -> Result<Vec<f64>, ConfigError> {
    let array = value
        .as_array()
        .ok_or_else(|| invalid_value(key, "expected an array of numbers"))?;
    array.iter().map(|v| toml_f64(key, v)).collect()
}

fn toml_tolerance(key: &str, value: &toml::Value) -> Result<Tolerance, ConfigError> {
    match value {
        toml::Value::Array(_) => Ok(Tolerance::Vector(toml_f64_array(key, value)?)),
        _ => Ok(Tolerance::Scalar(toml_f64(key, value)?)),
    }
}
