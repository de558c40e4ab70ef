//! Symbolic, shape-aware array expressions with built-in differentiation.
//!
//! Expressions represent tensor-valued functions of spatial coordinates and
//! named unknown arguments, built by algebraic composition into an acyclic,
//! hash-consed graph. The crate provides three things on top of the graph:
//!
//! - structural differentiation with respect to arguments and spatial
//!   directions ([`derivative`], [`linearize`], [`Expr::grad`]),
//! - numeric lowering over concrete point sets with memoized, per-point
//!   parallel evaluation ([`Evaluator`], [`evaluate`], [`integrate`]),
//! - the argument registry and assignment machinery that connects the two
//!   ([`Context`], [`Assignment`]).
//!
//! The nonlinear solver framework in the `skoll` crate is built directly on
//! these semantics: residuals and Jacobians are derived, not hand-coded.

mod context;
mod diff;
mod eval;
mod expr;
mod node;
mod shape;
mod tensor;

pub use context::Context;
pub use diff::{derivative, linearize, Var};
pub use eval::{evaluate, integrate, Assignment, EvalConfig, EvalError, Evaluator, PointSet};
pub use expr::Expr;
pub use node::{ArgId, ExprId, NodeKind};
pub use shape::{Dtype, Shape};
pub use tensor::{Batch, Tensor};
