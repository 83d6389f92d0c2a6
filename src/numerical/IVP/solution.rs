use crate::numerical::IVP::IVP_errors::{IVPError, PossibleMissedEvent};
use crate::numerical::IVP::dense_output::SegmentStore;
use crate::numerical::IVP::events::EventRecord;
use log::info;
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::ops::Index;
use strum_macros::{Display, EnumString};
use tabled::{builder::Builder, settings::Style};

/// How an integration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ReturnCode {
    /// reached the end of the time span
    Success,
    /// stopped early by an event effect, cancellation or deadline
    Terminated,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverStats {
    /// right-hand side evaluations
    pub nfev: usize,
    pub naccept: usize,
    pub nreject: usize,
    /// stepper calls, accepted or not
    pub nsteps: usize,
    pub nevents: usize,
}

impl SolverStats {
    pub fn as_map(&self) -> HashMap<String, usize> {
        let mut stats = HashMap::new();
        stats.insert("rhs evaluations".to_string(), self.nfev);
        stats.insert("accepted steps".to_string(), self.naccept);
        stats.insert("rejected steps".to_string(), self.nreject);
        stats.insert("attempted steps".to_string(), self.nsteps);
        stats.insert("fired events".to_string(), self.nevents);
        stats
    }
}

/// Integrated trajectory: saved samples plus the dense output between them.
///
/// Sample times never go against the integration direction. An event saved
/// with `SavePosition::Both` contributes two samples at the same time
/// (pre- and post-effect states).
#[derive(Debug, Clone)]
pub struct Solution {
    pub t: Vec<f64>,
    pub u: Vec<DVector<f64>>,
    pub retcode: ReturnCode,
    pub message: Option<String>,
    /// fault behind a `Failed` return code
    pub error: Option<IVPError>,
    pub event_log: Vec<EventRecord>,
    pub warnings: Vec<PossibleMissedEvent>,
    pub stats: SolverStats,
    /// name of the stepper that produced the trajectory
    pub method: String,
    store: SegmentStore,
}

impl Solution {
    pub(crate) fn new(method: String, store: SegmentStore) -> Self {
        Solution {
            t: Vec::new(),
            u: Vec::new(),
            retcode: ReturnCode::Success,
            message: None,
            error: None,
            event_log: Vec::new(),
            warnings: Vec::new(),
            stats: SolverStats::default(),
            method,
            store,
        }
    }

    pub(crate) fn store_mut(&mut self) -> &mut SegmentStore {
        &mut self.store
    }

    pub(crate) fn push_sample(&mut self, t: f64, u: DVector<f64>) {
        self.t.push(t);
        self.u.push(u);
    }

    pub fn segments(&self) -> &SegmentStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.retcode == ReturnCode::Success
    }

    pub fn last(&self) -> Option<(f64, &DVector<f64>)> {
        match (self.t.last(), self.u.last()) {
            (Some(t), Some(u)) => Some((*t, u)),
            _ => None,
        }
    }

    /// state at any time of the integrated range
    pub fn evaluate(&self, t: f64) -> Result<DVector<f64>, IVPError> {
        if self.store.is_empty() {
            // nothing integrated yet: only the initial point is known
            if let (Some(t0), Some(u0)) = (self.t.first(), self.u.first()) {
                if *t0 == t {
                    return Ok(u0.clone());
                }
                return Err(IVPError::OutOfRange {
                    t,
                    t_min: *t0,
                    t_max: *t0,
                });
            }
        }
        self.store.evaluate(t, 0)
    }

    pub fn derivative(&self, t: f64) -> Result<DVector<f64>, IVPError> {
        self.store.evaluate(t, 1)
    }

    pub fn evaluate_many(&self, times: &[f64]) -> Result<Vec<DVector<f64>>, IVPError> {
        times.iter().map(|t| self.evaluate(*t)).collect()
    }

    /// (time points, matrix with one row per time point)
    pub fn get_result(&self) -> (DVector<f64>, DMatrix<f64>) {
        let n = self.u.first().map(|u| u.len()).unwrap_or(0);
        let t = DVector::from_vec(self.t.clone());
        let y = DMatrix::from_fn(self.u.len(), n, |i, j| self.u[i][j]);
        (t, y)
    }

    pub fn statistics_table(&self) -> String {
        let mut table = Builder::from(self.stats.as_map()).build();
        table.with(Style::modern_rounded());
        table.to_string()
    }

    pub fn print_statistics(&self) {
        info!(
            "\n {} finished with status {}\n{}",
            self.method,
            self.retcode,
            self.statistics_table()
        );
    }
}

impl Index<usize> for Solution {
    type Output = DVector<f64>;
    fn index(&self, index: usize) -> &Self::Output {
        &self.u[index]
    }
}
