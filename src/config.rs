use crate::linalg::Backend;
use serde::{Deserialize, Serialize};
use skoll_expr::EvalConfig;

/// Explicit solver configuration, passed in at construction rather than
/// read from ambient process state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Linear-algebra backend for the Newton direction solve.
    pub backend: Backend,
    /// Evaluation settings, including the parallelism degree of the
    /// per-point lowering.
    pub eval: EvalConfig,
}
