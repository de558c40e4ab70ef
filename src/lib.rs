//! Nonlinear solver framework over symbolic array expressions.
//!
//! Residuals are array-valued expressions of named unknown arguments (see
//! the [`expr`] module); their Jacobians are derived structurally rather
//! than hand-coded. The drivers in [`solver`] ([`Newton`], [`Minimize`]
//! and [`Pseudotime`]) iterate an argument assignment toward a root or
//! stationary point, delegating the linear solve to a pluggable backend
//! and the step damping to a pluggable line search.

pub mod calculus;
pub mod config;
pub mod error;
pub mod linalg;
pub mod linesearch;
pub mod solver;
pub mod system;
pub mod targets;
pub mod util;

pub mod expr {
    pub use skoll_expr::*;
}

pub use config::SolverConfig;
pub use error::SolverError;
pub use linesearch::{FullStep, LineSearch, NormBased};
pub use solver::{AbortHandle, Minimize, Newton, Pseudotime, Solution, SolveInfo, SolverStatus};
pub use system::ExprSystem;
pub use targets::{ReturnConvention, TargetEntry, TargetList};

pub extern crate nalgebra;
