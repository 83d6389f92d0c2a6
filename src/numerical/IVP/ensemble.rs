//! Many independent trajectories of one problem.
//!
//! Every trajectory gets its own problem from `prob_func(&base, i)` and its
//! own session state; steppers, configuration and callbacks are shared
//! read-only. Results come back in trajectory order whether they ran serially
//! or on the rayon pool, and a failure stays inside its own `Solution`.
use crate::numerical::IVP::config::SolverConfig;
use crate::numerical::IVP::events::CallbackSet;
use crate::numerical::IVP::integrator::solve;
use crate::numerical::IVP::problem::IVPProblem;
use crate::numerical::IVP::solution::{ReturnCode, Solution};
use crate::numerical::IVP::steppers::StepperKind;
use log::info;
use rayon::prelude::*;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

pub type ProbFn<P> = Arc<dyn Fn(&IVPProblem<P>, usize) -> IVPProblem<P> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum EnsembleAlgorithm {
    Serial,
    Threads,
}

pub struct EnsembleProblem<P> {
    pub prob: IVPProblem<P>,
    pub prob_func: ProbFn<P>,
}

impl<P> EnsembleProblem<P> {
    pub fn new<F>(prob: IVPProblem<P>, prob_func: F) -> Self
    where
        F: Fn(&IVPProblem<P>, usize) -> IVPProblem<P> + Send + Sync + 'static,
    {
        EnsembleProblem {
            prob,
            prob_func: Arc::new(prob_func),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleSolution {
    pub trajectories: Vec<Solution>,
}

impl EnsembleSolution {
    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// indices of trajectories that did not fail
    pub fn successes(&self) -> Vec<usize> {
        self.indices_where(|s| s.retcode != ReturnCode::Failed)
    }

    pub fn failures(&self) -> Vec<usize> {
        self.indices_where(|s| s.retcode == ReturnCode::Failed)
    }

    fn indices_where(&self, pred: impl Fn(&Solution) -> bool) -> Vec<usize> {
        self.trajectories
            .iter()
            .enumerate()
            .filter(|(_, s)| pred(s))
            .map(|(i, _)| i)
            .collect()
    }

    /// final states of all trajectories
    pub fn final_states(&self) -> Vec<Option<nalgebra::DVector<f64>>> {
        self.trajectories
            .iter()
            .map(|s| s.u.last().cloned())
            .collect()
    }
}

pub fn solve_ensemble<P>(
    ensemble: &EnsembleProblem<P>,
    stepper: &StepperKind,
    config: &SolverConfig,
    callbacks: &CallbackSet,
    trajectories: usize,
    algorithm: EnsembleAlgorithm,
) -> EnsembleSolution
where
    P: Send + Sync,
{
    info!(
        "ensemble of {} trajectories, {} execution",
        trajectories, algorithm
    );
    let run_one = |i: usize| {
        let prob = (ensemble.prob_func)(&ensemble.prob, i);
        solve(&prob, stepper, config, callbacks)
    };
    let results: Vec<Solution> = match algorithm {
        EnsembleAlgorithm::Serial => (0..trajectories).map(run_one).collect(),
        EnsembleAlgorithm::Threads => (0..trajectories).into_par_iter().map(run_one).collect(),
    };
    let solution = EnsembleSolution {
        trajectories: results,
    };
    info!(
        "ensemble finished: {} succeeded, {} failed",
        solution.successes().len(),
        solution.failures().len()
    );
    solution
}
