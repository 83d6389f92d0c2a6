//! Dense output: per-step interpolants and the segment store behind a `Solution`.
//!
//! A `Segment` is one accepted step (possibly truncated at an event time). It
//! remembers the exact endpoint states, so evaluating at `t_start` or `t_end`
//! returns them bit for bit; in between it defers to its `Interpolant`.
//! `SegmentStore` keeps the segments in integration order and locates the
//! owning segment of a query time by binary search.
use crate::numerical::IVP::IVP_errors::IVPError;
use nalgebra::DVector;
use std::fmt::Debug;
use std::sync::Arc;

/// Continuous extension supplied by a user-defined stepper.
pub trait DenseInterpolant: Debug + Send + Sync {
    fn evaluate(&self, t: f64) -> DVector<f64>;
    fn derivative(&self, t: f64) -> DVector<f64>;
}

/// Interpolation data of one step from `t_old` to `t_old + h`, `y_old` to `y_new`.
#[derive(Debug, Clone)]
pub enum Interpolant {
    /// straight line between the step endpoints
    Linear,
    /// cubic Hermite through endpoint values and slopes
    Hermite { f_old: DVector<f64>, f_new: DVector<f64> },
    /// quartic continuous extension of Dormand-Prince 5(4)
    DormandPrince { rcont: [DVector<f64>; 5] },
    Custom(Arc<dyn DenseInterpolant>),
}

impl Interpolant {
    pub fn kind(&self) -> &'static str {
        match self {
            Interpolant::Linear => "linear",
            Interpolant::Hermite { .. } => "hermite",
            Interpolant::DormandPrince { .. } => "dopri5",
            Interpolant::Custom(_) => "custom",
        }
    }

    fn value(&self, t: f64, t_old: f64, h: f64, y_old: &DVector<f64>, y_new: &DVector<f64>) -> DVector<f64> {
        let theta = (t - t_old) / h;
        match self {
            Interpolant::Linear => y_old + (y_new - y_old) * theta,
            Interpolant::Hermite { f_old, f_new } => {
                let t2 = theta * theta;
                let t3 = t2 * theta;
                let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                let h10 = t3 - 2.0 * t2 + theta;
                let h01 = -2.0 * t3 + 3.0 * t2;
                let h11 = t3 - t2;
                y_old * h00 + f_old * (h * h10) + y_new * h01 + f_new * (h * h11)
            }
            Interpolant::DormandPrince { rcont } => {
                let theta1 = 1.0 - theta;
                &rcont[0]
                    + (&rcont[1]
                        + (&rcont[2] + (&rcont[3] + &rcont[4] * theta1) * theta) * theta1)
                        * theta
            }
            Interpolant::Custom(inner) => inner.evaluate(t),
        }
    }

    fn slope(&self, t: f64, t_old: f64, h: f64, y_old: &DVector<f64>, y_new: &DVector<f64>) -> DVector<f64> {
        let theta = (t - t_old) / h;
        match self {
            Interpolant::Linear => (y_new - y_old) / h,
            Interpolant::Hermite { f_old, f_new } => {
                let t2 = theta * theta;
                let d00 = 6.0 * t2 - 6.0 * theta;
                let d10 = 3.0 * t2 - 4.0 * theta + 1.0;
                let d01 = -6.0 * t2 + 6.0 * theta;
                let d11 = 3.0 * t2 - 2.0 * theta;
                (y_old * d00 + y_new * d01) / h + f_old * d10 + f_new * d11
            }
            Interpolant::DormandPrince { rcont } => {
                // y = c0 + th*C, C = c1 + th1*B, B = c2 + th*A, A = c3 + th1*c4
                let theta1 = 1.0 - theta;
                let a = &rcont[3] + &rcont[4] * theta1;
                let b = &rcont[2] + &a * theta;
                let da = -&rcont[4];
                let db = &a + &da * theta;
                let c = &rcont[1] + &b * theta1;
                let dc = -&b + &db * theta1;
                (c + dc * theta) / h
            }
            Interpolant::Custom(inner) => inner.derivative(t),
        }
    }
}

/// One accepted step. `t_start`/`y_start` coincide with the step origin;
/// `t_end`/`y_end` move when the segment is truncated at an event.
#[derive(Debug, Clone)]
pub struct Segment {
    pub t_start: f64,
    pub t_end: f64,
    pub y_start: DVector<f64>,
    pub y_end: DVector<f64>,
    step_end: f64,
    step_y_end: DVector<f64>,
    interpolant: Interpolant,
}

impl Segment {
    pub fn new(
        t_start: f64,
        t_end: f64,
        y_start: DVector<f64>,
        y_end: DVector<f64>,
        interpolant: Interpolant,
    ) -> Self {
        Segment {
            t_start,
            t_end,
            step_end: t_end,
            step_y_end: y_end.clone(),
            y_start,
            y_end,
            interpolant,
        }
    }

    /// state held constant over `[t_start, t_end]`, used to bridge time jumps
    pub fn constant(t_start: f64, t_end: f64, y: DVector<f64>) -> Self {
        Segment::new(t_start, t_end, y.clone(), y, Interpolant::Linear)
    }

    pub fn interpolant(&self) -> &Interpolant {
        &self.interpolant
    }

    /// length in the integration direction is positive
    pub fn length(&self) -> f64 {
        self.t_end - self.t_start
    }

    /// Point value (`derivative_order = 0`) or first derivative (`1`).
    /// No range check: callers stay within the segment or slightly beyond.
    pub fn evaluate(&self, t: f64, derivative_order: usize) -> Result<DVector<f64>, IVPError> {
        let h = self.step_end - self.t_start;
        match derivative_order {
            0 => {
                if t == self.t_start {
                    Ok(self.y_start.clone())
                } else if t == self.t_end {
                    Ok(self.y_end.clone())
                } else {
                    Ok(self
                        .interpolant
                        .value(t, self.t_start, h, &self.y_start, &self.step_y_end))
                }
            }
            1 => Ok(self
                .interpolant
                .slope(t, self.t_start, h, &self.y_start, &self.step_y_end)),
            order => Err(IVPError::UnsupportedDerivative { order }),
        }
    }

    /// copy ending at `t` with the interpolated state there; the interpolant is kept
    pub fn truncate(&self, t: f64) -> Result<Segment, IVPError> {
        if t == self.t_end {
            return Ok(self.clone());
        }
        let y_end = self.evaluate(t, 0)?;
        Ok(Segment {
            t_end: t,
            y_end,
            ..self.clone()
        })
    }

    /// drop the high-order interpolant and keep a straight line between endpoints
    pub fn into_linear(self) -> Segment {
        Segment::new(self.t_start, self.t_end, self.y_start, self.y_end, Interpolant::Linear)
    }
}

/// Accepted segments in integration order.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    segments: Vec<Segment>,
    direction: f64,
    extrapolation_tolerance: f64,
}

impl SegmentStore {
    pub fn new(direction: f64, extrapolation_tolerance: f64) -> Self {
        SegmentStore {
            segments: Vec::new(),
            direction: if direction < 0.0 { -1.0 } else { 1.0 },
            extrapolation_tolerance: extrapolation_tolerance.abs(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// `(t_start of first, t_end of last)`
    pub fn t_span(&self) -> Option<(f64, f64)> {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => Some((first.t_start, last.t_end)),
            _ => None,
        }
    }

    pub fn append(&mut self, segment: Segment) -> Result<(), IVPError> {
        if let Some(last) = self.segments.last() {
            if segment.t_start != last.t_end {
                return Err(IVPError::Discontinuity {
                    expected: last.t_end,
                    found: segment.t_start,
                });
            }
        }
        if !(self.direction * segment.length() > 0.0) {
            return Err(IVPError::Discontinuity {
                expected: segment.t_start,
                found: segment.t_end,
            });
        }
        self.segments.push(segment);
        Ok(())
    }

    /// Index of the segment owning `t`. Right-continuous: a time shared by two
    /// segments belongs to the later one, the last `t_end` to the last segment.
    pub fn locate(&self, t: f64) -> Result<usize, IVPError> {
        let (t_min, t_max) = self.t_span().ok_or(IVPError::OutOfRange {
            t,
            t_min: f64::NAN,
            t_max: f64::NAN,
        })?;
        let d = self.direction;
        let tol = self.extrapolation_tolerance;
        if d * (t - t_min) < -tol || d * (t - t_max) > tol || t.is_nan() {
            return Err(IVPError::OutOfRange { t, t_min, t_max });
        }
        let idx = self.segments.partition_point(|s| d * s.t_end <= d * t);
        Ok(idx.min(self.segments.len() - 1))
    }

    pub fn evaluate(&self, t: f64, derivative_order: usize) -> Result<DVector<f64>, IVPError> {
        if derivative_order > 1 {
            return Err(IVPError::UnsupportedDerivative {
                order: derivative_order,
            });
        }
        let idx = self.locate(t)?;
        self.segments[idx].evaluate(t, derivative_order)
    }
}
