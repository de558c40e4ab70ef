//! Lowering of expression graphs to numeric values at concrete points.
//!
//! Evaluation is a single bottom-up pass over the reachable part of the
//! graph. Node ids are assigned in construction order, so ascending-id
//! iteration is a topological order and every distinct node is computed
//! exactly once, regardless of how many parents reference it.
//!
//! Evaluation over a large point set is embarrassingly parallel across
//! points: the [`Evaluator`] splits the point set into contiguous chunks,
//! lowers each chunk on a worker, and concatenates the per-chunk results in
//! order, so results never depend on worker scheduling.

use crate::context::Context;
use crate::expr::Expr;
use crate::node::{ExprId, NodeKind};
use crate::shape::Shape;
use crate::tensor::{Batch, Tensor};
use log::debug;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A set of concrete evaluation points with integration weights, supplied
/// by an external sampling collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    ndims: usize,
    /// Point coordinates, `npoints * ndims` values in point-major order.
    coords: Vec<f64>,
    /// One quadrature weight per point.
    weights: Vec<f64>,
}

impl PointSet {
    /// # Panics
    ///
    /// Panics if the coordinate length is not a multiple of `ndims` or the
    /// weight count does not match the point count.
    pub fn new(ndims: usize, coords: Vec<f64>, weights: Vec<f64>) -> Self {
        assert!(ndims > 0, "a point set requires at least one spatial dimension");
        assert_eq!(coords.len() % ndims, 0, "coordinate data must be a multiple of ndims");
        assert_eq!(coords.len() / ndims, weights.len(), "one weight per point required");
        PointSet { ndims, coords, weights }
    }

    /// A midpoint-rule sampling of the interval `[a, b]` with `n` cells.
    pub fn uniform_1d(n: usize, a: f64, b: f64) -> Self {
        assert!(n > 0, "a point set requires at least one point");
        let h = (b - a) / n as f64;
        let coords = (0..n).map(|i| a + (i as f64 + 0.5) * h).collect();
        let weights = vec![h; n];
        PointSet::new(1, coords, weights)
    }

    pub fn ndims(&self) -> usize {
        self.ndims
    }

    pub fn npoints(&self) -> usize {
        self.weights.len()
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn slice(&self, start: usize, end: usize) -> PointSet {
        PointSet {
            ndims: self.ndims,
            coords: self.coords[start * self.ndims..end * self.ndims].to_vec(),
            weights: self.weights[start..end].to_vec(),
        }
    }
}

/// A mapping from argument names to concrete tensor values.
///
/// Assignments are plain data: the evaluator reads them, the solver
/// replaces them wholesale between iterations, and nothing mutates them
/// during an evaluation.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    values: FxHashMap<String, Tensor>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Tensor) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Tensor)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Assignment {
            values: iter.into_iter().collect(),
        }
    }
}

/// Errors raised when lowering an expression at concrete points.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The expression depends on an argument absent from the assignment.
    UnboundArgument { name: String },
    /// A bound value does not match the registered shape of its argument.
    ArgumentShape { name: String, expected: Shape, got: Shape },
    /// The coordinate leaf dimension does not match the point set.
    PointsDimension { expected: usize, got: usize },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnboundArgument { name } => {
                write!(f, "argument `{}` is not bound in the assignment", name)
            }
            EvalError::ArgumentShape { name, expected, got } => write!(
                f,
                "argument `{}` is bound to a tensor of shape {}, expected {}",
                name, got, expected
            ),
            EvalError::PointsDimension { expected, got } => write!(
                f,
                "expression expects {}-dimensional points, point set has dimension {}",
                expected, got
            ),
        }
    }
}

impl std::error::Error for EvalError {}

/// Evaluation configuration consumed, not owned, by this crate: the
/// parallelism degree is supplied by the caller and realized as a dedicated
/// worker pool rather than ambient global state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Number of worker threads for per-point parallel lowering. `None` or
    /// `Some(1)` evaluates serially.
    pub parallelism: Option<usize>,
}

/// Lowers expression graphs to numeric values over point sets.
pub struct Evaluator {
    pool: Option<rayon::ThreadPool>,
}

impl Evaluator {
    /// A strictly sequential evaluator.
    pub fn serial() -> Self {
        Evaluator { pool: None }
    }

    pub fn new(config: &EvalConfig) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = match config.parallelism {
            Some(n) if n > 1 => Some(rayon::ThreadPoolBuilder::new().num_threads(n).build()?),
            _ => None,
        };
        Ok(Evaluator { pool })
    }

    /// Evaluates `expr` at every point of `points` under the given argument
    /// assignment.
    pub fn evaluate(&self, expr: &Expr, points: &PointSet, args: &Assignment) -> Result<Batch, EvalError> {
        match &self.pool {
            Some(pool) if points.npoints() >= 2 * pool.current_num_threads() => {
                let nchunks = pool.current_num_threads();
                let npoints = points.npoints();
                let chunk = (npoints + nchunks - 1) / nchunks;
                let ranges: Vec<(usize, usize)> = (0..npoints)
                    .step_by(chunk)
                    .map(|start| (start, (start + chunk).min(npoints)))
                    .collect();
                debug!("evaluating {} points in {} parallel chunks", npoints, ranges.len());
                let parts = pool.install(|| {
                    ranges
                        .into_par_iter()
                        .map(|(start, end)| {
                            let sub = points.slice(start, end);
                            lower(expr.context(), expr.id(), &sub, args)
                        })
                        .collect::<Result<Vec<_>, _>>()
                })?;
                Ok(Batch::concat_points(parts))
            }
            _ => lower(expr.context(), expr.id(), points, args),
        }
    }

    /// Evaluates `expr` and contracts the integration weights over the
    /// point axis, producing the integral of the integrand over the sample.
    pub fn integrate(&self, expr: &Expr, points: &PointSet, args: &Assignment) -> Result<Tensor, EvalError> {
        let batch = self.evaluate(expr, points, args)?;
        Ok(batch.contract_weights(points.weights()))
    }
}

/// Serial convenience entry point; see [`Evaluator::evaluate`].
pub fn evaluate(expr: &Expr, points: &PointSet, args: &Assignment) -> Result<Batch, EvalError> {
    Evaluator::serial().evaluate(expr, points, args)
}

/// Serial convenience entry point; see [`Evaluator::integrate`].
pub fn integrate(expr: &Expr, points: &PointSet, args: &Assignment) -> Result<Tensor, EvalError> {
    Evaluator::serial().integrate(expr, points, args)
}

/// Single bottom-up lowering pass over the reachable sub-graph.
fn lower(ctx: &Context, root: ExprId, points: &PointSet, args: &Assignment) -> Result<Batch, EvalError> {
    let np = points.npoints();

    // Reachable node ids, ascending. Operands always precede their parents.
    let mut reachable = FxHashSet::default();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if reachable.insert(id) {
            stack.extend(ctx.node(id).kind.operands());
        }
    }
    let mut order: Vec<ExprId> = reachable.into_iter().collect();
    order.sort_unstable();

    let mut values: FxHashMap<ExprId, Batch> = FxHashMap::default();
    for id in order {
        let node = ctx.node(id);
        let value = match &node.kind {
            NodeKind::Constant(t) => Batch::splat(np, t),
            NodeKind::Zeros => Batch::zeros(np, node.shape.clone()),
            NodeKind::Delta => Batch::splat(np, &delta_tensor(&node.shape)),
            NodeKind::Argument(arg) => {
                let name = ctx.argument_name(*arg);
                let tensor = args
                    .get(&name)
                    .ok_or_else(|| EvalError::UnboundArgument { name: name.clone() })?;
                if tensor.shape() != &node.shape {
                    return Err(EvalError::ArgumentShape {
                        name,
                        expected: node.shape.clone(),
                        got: tensor.shape().clone(),
                    });
                }
                Batch::splat(np, tensor)
            }
            NodeKind::Points => {
                let ndims = node.shape.dims()[0];
                if ndims != points.ndims() {
                    return Err(EvalError::PointsDimension {
                        expected: ndims,
                        got: points.ndims(),
                    });
                }
                Batch::new(np, node.shape.clone(), points.coords().to_vec())
            }
            NodeKind::Add(a, b) => nary(&[&values[a], &values[b]], &node.shape, |v| v[0] + v[1]),
            NodeKind::Mul(a, b) => nary(&[&values[a], &values[b]], &node.shape, |v| v[0] * v[1]),
            NodeKind::Div(a, b) => nary(&[&values[a], &values[b]], &node.shape, |v| v[0] / v[1]),
            NodeKind::Less(a, b) => nary(&[&values[a], &values[b]], &node.shape, |v| {
                if v[0] < v[1] {
                    1.0
                } else {
                    0.0
                }
            }),
            NodeKind::Neg(x) => unary(&values[x], |v| -v),
            NodeKind::Sin(x) => unary(&values[x], f64::sin),
            NodeKind::Cos(x) => unary(&values[x], f64::cos),
            NodeKind::Exp(x) => unary(&values[x], f64::exp),
            NodeKind::Ln(x) => unary(&values[x], f64::ln),
            NodeKind::Power { x, exponent } => {
                let c = exponent.into_inner();
                unary(&values[x], |v| v.powf(c))
            }
            // Casting only changes the dtype; the numeric storage is
            // already f64.
            NodeKind::Cast(x) => values[x].clone(),
            NodeKind::Sum { x, axis } => sum_axis(&values[x], *axis),
            NodeKind::Reshape(x) => values[x].clone().with_shape(node.shape.clone()),
            NodeKind::Concat { parts, axis } => {
                let operands: Vec<&Batch> = parts.iter().map(|p| &values[p]).collect();
                concat_axis(&operands, *axis, &node.shape)
            }
            NodeKind::Get { x, axis, index } => get_axis(&values[x], *axis, *index),
            NodeKind::Choose { cond, a, b } => {
                nary(&[&values[cond], &values[a], &values[b]], &node.shape, |v| {
                    if v[0] != 0.0 {
                        v[1]
                    } else {
                        v[2]
                    }
                })
            }
        };
        values.insert(id, value);
    }
    Ok(values.remove(&root).expect("root value must have been computed"))
}

/// The identity tensor for a `Delta` node of shape `s ++ s`.
fn delta_tensor(shape: &Shape) -> Tensor {
    let half = shape.rank() / 2;
    let s = Shape::from(&shape.dims()[..half]);
    let n = s.len();
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        data[i * n + i] = 1.0;
    }
    Tensor::new(shape.clone(), data)
}

fn unary(x: &Batch, f: impl Fn(f64) -> f64) -> Batch {
    let data = x.data().iter().map(|&v| f(v)).collect();
    Batch::new(x.npoints(), x.shape().clone(), data)
}

/// Per-point element strides of an operand shape against a broadcast
/// output shape; broadcast axes get stride zero.
fn broadcast_strides(operand: &Shape, out: &Shape) -> Vec<usize> {
    let rank = out.rank();
    let pad = rank - operand.rank();
    let mut strides = vec![0; rank];
    let mut running = 1;
    for ax in (0..rank).rev() {
        let dim = if ax < pad { 1 } else { operand.dims()[ax - pad] };
        strides[ax] = if dim == 1 { 0 } else { running };
        running *= dim;
    }
    strides
}

/// Elementwise n-ary operator with trailing-aligned broadcasting, applied
/// independently per point.
fn nary(operands: &[&Batch], out_shape: &Shape, f: impl Fn(&[f64]) -> f64) -> Batch {
    debug_assert!(operands.len() <= 3);
    let np = operands[0].npoints();
    debug_assert!(operands.iter().all(|b| b.npoints() == np));
    let out_numel = out_shape.len();
    let rank = out_shape.rank();
    let strides: Vec<Vec<usize>> = operands
        .iter()
        .map(|b| broadcast_strides(b.shape(), out_shape))
        .collect();
    let numels: Vec<usize> = operands.iter().map(|b| b.shape().len()).collect();

    let mut data = vec![0.0; np * out_numel];
    let mut vals = [0.0f64; 3];
    for p in 0..np {
        for flat in 0..out_numel {
            // Decompose the flat output index into per-axis coordinates and
            // accumulate each operand's strided offset.
            let mut offsets = [0usize; 3];
            let mut rem = flat;
            for ax in (0..rank).rev() {
                let coord = rem % out_shape.dims()[ax];
                rem /= out_shape.dims()[ax];
                for (i, s) in strides.iter().enumerate() {
                    offsets[i] += coord * s[ax];
                }
            }
            for (i, b) in operands.iter().enumerate() {
                vals[i] = b.data()[p * numels[i] + offsets[i]];
            }
            data[p * out_numel + flat] = f(&vals[..operands.len()]);
        }
    }
    Batch::new(np, out_shape.clone(), data)
}

fn sum_axis(x: &Batch, axis: usize) -> Batch {
    let dims = x.shape().dims();
    let outer: usize = dims[..axis].iter().product();
    let d = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    let np = x.npoints();
    let numel = x.shape().len();
    let out_shape = x.shape().removed_axis(axis);

    let mut data = vec![0.0; np * outer * inner];
    for p in 0..np {
        let src = &x.data()[p * numel..(p + 1) * numel];
        let dst = &mut data[p * outer * inner..(p + 1) * outer * inner];
        for o in 0..outer {
            for j in 0..d {
                for i in 0..inner {
                    dst[o * inner + i] += src[(o * d + j) * inner + i];
                }
            }
        }
    }
    Batch::new(np, out_shape, data)
}

fn get_axis(x: &Batch, axis: usize, index: usize) -> Batch {
    let dims = x.shape().dims();
    let outer: usize = dims[..axis].iter().product();
    let d = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    let np = x.npoints();
    let numel = x.shape().len();
    let out_shape = x.shape().removed_axis(axis);

    let mut data = Vec::with_capacity(np * outer * inner);
    for p in 0..np {
        let src = &x.data()[p * numel..(p + 1) * numel];
        for o in 0..outer {
            let start = (o * d + index) * inner;
            data.extend_from_slice(&src[start..start + inner]);
        }
    }
    Batch::new(np, out_shape, data)
}

fn concat_axis(operands: &[&Batch], axis: usize, out_shape: &Shape) -> Batch {
    let np = operands[0].npoints();
    let dims = out_shape.dims();
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();

    let mut data = Vec::with_capacity(np * out_shape.len());
    for p in 0..np {
        for o in 0..outer {
            for b in operands {
                let d = b.shape().dims()[axis];
                let numel = b.shape().len();
                let src = &b.data()[p * numel..(p + 1) * numel];
                let start = o * d * inner;
                data.extend_from_slice(&src[start..start + d * inner]);
            }
        }
    }
    Batch::new(np, out_shape.clone(), data)
}
