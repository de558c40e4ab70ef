use crate::solver::SolveInfo;
use skoll_expr::{Assignment, EvalError};
use std::error::Error;
use std::fmt;

/// Errors produced by the solver framework.
///
/// Configuration and evaluation errors fail fast, before or at the start of
/// iteration. Convergence failures carry the partial state of the solve so
/// that callers can inspect it or continue from it.
#[derive(Debug)]
pub enum SolverError {
    /// Invalid solver configuration: missing or non-positive tolerance,
    /// mismatched target/residual counts, unknown target argument names.
    Configuration(String),
    /// The external linear solve of the Jacobian system failed.
    Linear(eyre::Report),
    /// Numeric evaluation of a residual or Jacobian expression failed.
    Evaluation(EvalError),
    /// The iteration terminated without converging. The last completed
    /// assignment and the iteration count are preserved for inspection.
    Failed { info: SolveInfo, assignment: Assignment },
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::Configuration(msg) => write!(f, "invalid solver configuration: {}", msg),
            SolverError::Linear(err) => write!(f, "failed to solve Jacobian system: {}", err),
            SolverError::Evaluation(err) => write!(f, "failed to evaluate expression: {}", err),
            SolverError::Failed { info, .. } => write!(
                f,
                "solve failed with status {:?} after {} iterations (residual norm {:.3e})",
                info.status, info.niter, info.resnorm
            ),
        }
    }
}

impl Error for SolverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SolverError::Evaluation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EvalError> for SolverError {
    fn from(err: EvalError) -> Self {
        SolverError::Evaluation(err)
    }
}
