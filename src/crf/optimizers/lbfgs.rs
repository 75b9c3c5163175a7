//! Full-batch L-BFGS with a More-Thuente line search.

use argmin::core::observers::ObserverMode;
use argmin::core::Executor;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use argmin_observer_slog::SlogLogger;

use crate::crf::optimizers::Solution;
use crate::crf::trainer::CrfLoss;
use crate::errors::{Result, RuseqError};

const HISTORY_SIZE: usize = 7;

pub fn optimize(loss_function: CrfLoss, weights_init: Vec<f64>, max_iter: u64) -> Result<Solution> {
    let linesearch = MoreThuenteLineSearch::new().with_c(1e-4, 0.9)?;
    let solver = LBFGS::new(linesearch, HISTORY_SIZE);
    let res = Executor::new(loss_function, solver)
        .configure(|state| state.param(weights_init).max_iters(max_iter))
        .add_observer(SlogLogger::term(), ObserverMode::Always)
        .run()?;

    let state = res.state;
    let loss = state.best_cost;
    let weights = state
        .best_param
        .or(state.param)
        .ok_or_else(|| RuseqError::optimization("no parameter was returned"))?;
    Ok(Solution {
        weights,
        iterations: state.iter,
        loss: loss.is_finite().then_some(loss),
    })
}
