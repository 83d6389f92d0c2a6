extern crate nalgebra as na;

use crate::numerical::IVP::IVP_errors::IVPError;
use log::info;
use na::DVector;

/// rtol or atol can be a number or a vector
#[derive(Debug, Clone, PartialEq)]
pub enum Tolerance {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl From<f64> for Tolerance {
    fn from(value: f64) -> Self {
        Tolerance::Scalar(value)
    }
}

impl From<Vec<f64>> for Tolerance {
    fn from(value: Vec<f64>) -> Self {
        Tolerance::Vector(value)
    }
}

impl Tolerance {
    /// tolerance of i-th component
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::Vector(v) => v[i],
        }
    }

    pub fn min_value(&self) -> f64 {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::Vector(v) => v.iter().cloned().fold(f64::INFINITY, f64::min),
        }
    }

    /// positive, finite, and (for vectors) one entry per state component
    pub fn validate(&self, name: &str, n: usize) -> Result<(), String> {
        match self {
            Tolerance::Scalar(v) => {
                if !(v.is_finite() && *v > 0.0) {
                    return Err(format!("`{}` must be positive and finite, got {}", name, v));
                }
            }
            Tolerance::Vector(v) => {
                if v.len() != n {
                    return Err(format!(
                        "`{}` has {} entries but the state has {} components",
                        name,
                        v.len(),
                        n
                    ));
                }
                if let Some(bad) = v.iter().find(|x| !(x.is_finite() && **x > 0.0)) {
                    return Err(format!("`{}` must be positive and finite, got {}", name, bad));
                }
            }
        }
        Ok(())
    }
}

pub fn validate_tol(
    rtol: &Tolerance,
    atol: &Tolerance,
    n: usize,
) -> Result<(), String> {
    rtol.validate("reltol", n)?;
    atol.validate("abstol", n)?;
    // relative tolerance below round-off makes every step a rejection
    if rtol.min_value() < 100.0 * f64::EPSILON {
        log::warn!("`reltol` is below 100*EPS, steps may never be accepted");
    }
    Ok(())
}

/// weights atol_i + rtol_i*|y_i|
pub fn scale_func(rtol: &Tolerance, atol: &Tolerance, y: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        y.len(),
        y.iter()
            .enumerate()
            .map(|(i, y_i)| atol.at(i) + rtol.at(i) * y_i.abs()),
    )
}

/// root-mean-square norm
pub fn norm(vector: &DVector<f64>) -> f64 {
    if vector.is_empty() {
        return 0.0;
    }
    vector.norm() / (vector.len() as f64).sqrt()
}

/// Normalized local error of a step from `y` to `y_new`:
/// RMS over components of err_i / (atol_i + rtol_i*max(|y_i|, |y_new_i|)).
/// A value <= 1 means the step meets the tolerances.
pub fn error_norm(
    error: &DVector<f64>,
    y: &DVector<f64>,
    y_new: &DVector<f64>,
    rtol: &Tolerance,
    atol: &Tolerance,
) -> Result<f64, String> {
    let n = error.len();
    if y.len() != n || y_new.len() != n {
        return Err(format!(
            "error estimate has {} components, state has {}",
            n,
            y.len()
        ));
    }
    let weighted = DVector::from_iterator(
        n,
        (0..n).map(|i| {
            let sc = atol.at(i) + rtol.at(i) * y[i].abs().max(y_new[i].abs());
            error[i] / sc
        }),
    );
    let err = norm(&weighted);
    if err.is_finite() {
        Ok(err)
    } else {
        Err(format!("normalized error estimate is not finite ({})", err))
    }
}

/// Automatic choice of the first step (E. Hairer, S. P. Norsett, G. Wanner,
/// "Solving Ordinary Differential Equations I", Sec. II.4). Returned value is
/// signed with `direction` and bounded by `max_step` and the remaining interval.
pub fn select_initial_step(
    fun: &dyn Fn(f64, &DVector<f64>) -> DVector<f64>,
    t0: f64,
    y0: &DVector<f64>,
    t_bound: f64,
    max_step: f64,
    f0: &DVector<f64>,
    direction: f64,
    order: usize,
    rtol: &Tolerance,
    atol: &Tolerance,
) -> f64 {
    let interval_length = (t_bound - t0).abs();
    if y0.is_empty() || interval_length == 0.0 {
        return interval_length * direction;
    }
    let scale = scale_func(rtol, atol, y0);
    let d0 = norm(&y0.component_div(&scale));
    let d1 = norm(&f0.component_div(&scale));

    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    let h0 = h0.min(interval_length);
    let y1 = y0 + f0 * (h0 * direction);
    let f1 = fun(t0 + h0 * direction, &y1);
    let d2 = norm(&(&f1 - f0).component_div(&scale)) / h0;

    let h1 = if !d2.is_finite() {
        h0
    } else if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / (order as f64 + 1.0))
    };
    let h = (100.0 * h0).min(h1).min(interval_length).min(max_step);
    info!("initial step selected: {}", h);
    h * direction
}

/// user-supplied first step must point along the integration direction and fit the span
pub fn validate_first_step(
    first_step: f64,
    t0: f64,
    t_bound: f64,
    y0: &DVector<f64>,
) -> Result<f64, IVPError> {
    let direction = (t_bound - t0).signum();
    let bad = |reason: &str| IVPError::InvalidInput {
        reason: reason.to_string(),
        t: t0,
        state: y0.clone(),
    };
    if !first_step.is_finite() || first_step == 0.0 {
        return Err(bad("`initial_step` must be finite and non-zero"));
    }
    if first_step.signum() != direction {
        return Err(bad("sign of `initial_step` contradicts the direction of the time span"));
    }
    if first_step.abs() > (t_bound - t0).abs() {
        return Err(bad("`initial_step` exceeds the time span"));
    }
    Ok(first_step)
}
