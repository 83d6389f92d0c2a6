use nalgebra::DVector;
use std::sync::Arc;

/// Right-hand side `f(u, p, t)`.
pub type RhsFn<P> = Arc<dyn Fn(&DVector<f64>, &P, f64) -> DVector<f64> + Send + Sync>;

/// Initial value problem u' = f(u, p, t), u(t0) = y0 on `tspan = (t0, tf)`.
/// `tf < t0` integrates backwards in time.
pub struct IVPProblem<P> {
    pub fun: RhsFn<P>,
    pub y0: DVector<f64>,
    pub tspan: (f64, f64),
    pub params: P,
}

impl<P: Clone> Clone for IVPProblem<P> {
    fn clone(&self) -> Self {
        IVPProblem {
            fun: Arc::clone(&self.fun),
            y0: self.y0.clone(),
            tspan: self.tspan,
            params: self.params.clone(),
        }
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for IVPProblem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IVPProblem")
            .field("y0", &self.y0)
            .field("tspan", &self.tspan)
            .field("params", &self.params)
            .finish()
    }
}

impl<P> IVPProblem<P> {
    pub fn new<F>(fun: F, y0: DVector<f64>, tspan: (f64, f64), params: P) -> Self
    where
        F: Fn(&DVector<f64>, &P, f64) -> DVector<f64> + Send + Sync + 'static,
    {
        IVPProblem {
            fun: Arc::new(fun),
            y0,
            tspan,
            params,
        }
    }

    pub fn rhs(&self, t: f64, y: &DVector<f64>) -> DVector<f64> {
        (self.fun)(y, &self.params, t)
    }

    /// +1 forward, -1 backward; a degenerate span counts as forward
    pub fn direction(&self) -> f64 {
        if self.tspan.1 < self.tspan.0 { -1.0 } else { 1.0 }
    }

    pub fn dimension(&self) -> usize {
        self.y0.len()
    }

    /// copy with some pieces replaced; the right-hand side is shared
    pub fn remake(
        &self,
        y0: Option<DVector<f64>>,
        tspan: Option<(f64, f64)>,
        params: Option<P>,
    ) -> Self
    where
        P: Clone,
    {
        IVPProblem {
            fun: Arc::clone(&self.fun),
            y0: y0.unwrap_or_else(|| self.y0.clone()),
            tspan: tspan.unwrap_or(self.tspan),
            params: params.unwrap_or_else(|| self.params.clone()),
        }
    }
}
