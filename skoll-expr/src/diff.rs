//! Structural differentiation of expression graphs.
//!
//! Derivatives are computed by a forward pushforward over the node
//! composition: every operator kind has an exact derivative rule, and a
//! node that does not depend on the differentiation target contributes the
//! literal zero tensor of the appropriate shape, so the result remains a
//! well-typed expression.
//!
//! Two flavors share one recursion. [`derivative`] with respect to an
//! argument of shape `s` appends the axes of `s` to the result, yielding
//! the full Jacobian structure. [`linearize`] substitutes named direction
//! arguments for the seeds instead, so the result keeps the shape of the
//! input and is suitable for symmetric bilinear-form assembly.

use crate::context::Context;
use crate::expr::Expr;
use crate::node::{ArgId, ExprId, NodeKind};
use crate::shape::{Dtype, Shape};
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;

/// A differentiation target: a named argument or a spatial direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var<'a> {
    Argument(&'a str),
    Direction(usize),
}

/// The exact derivative of `expr` with respect to `var`.
///
/// For `Var::Argument(a)` with `a` of shape `s`, the result has shape
/// `expr.shape() ++ s`. For `Var::Direction(k)` the shape of `expr` is
/// preserved. Differentiation is pure; results are memoized against the
/// (node, argument) pair on the context, so repeated differentiation of
/// shared sub-expressions does not duplicate work.
///
/// # Panics
///
/// Panics if a named argument is not registered on the expression's
/// context, or if it is not float-valued.
pub fn derivative(expr: &Expr, var: Var<'_>) -> Expr {
    let ctx = expr.context().clone();
    match var {
        Var::Argument(name) => {
            let arg = ctx
                .argument_id(name)
                .unwrap_or_else(|| panic!("cannot differentiate with respect to unknown argument `{}`", name));
            let (shape, dtype) = ctx.argument_decl(name).unwrap();
            assert!(
                dtype == Dtype::Float,
                "cannot differentiate with respect to non-float argument `{}`",
                name
            );
            if let Some(cached) = ctx.cached_derivative(expr.id(), arg) {
                return ctx.expr(cached);
            }
            let mut seeds = FxHashMap::default();
            seeds.insert(arg, ctx.delta(&shape));
            let mut pf = Pushforward {
                ctx: ctx.clone(),
                seeds,
                direction: None,
                extra: shape,
                memo: FxHashMap::default(),
            };
            let result = pf.tangent(expr.id());
            ctx.cache_derivative(expr.id(), arg, result.id());
            result
        }
        Var::Direction(k) => {
            let mut pf = Pushforward {
                ctx,
                seeds: FxHashMap::default(),
                direction: Some(k),
                extra: Shape::scalar(),
                memo: FxHashMap::default(),
            };
            pf.tangent(expr.id())
        }
    }
}

/// The linearization of `expr` along `(argument, direction)` pairs.
///
/// Each direction name is registered as a new argument with the shape and
/// dtype of the argument it perturbs, and the structural derivative is
/// seeded with those direction arguments instead of identity tensors. The
/// result has the same shape as `expr` and additionally depends on the
/// direction arguments.
///
/// # Panics
///
/// Panics if an argument is unknown, or if a direction name is already
/// registered with an incompatible shape.
pub fn linearize(expr: &Expr, directions: &[(&str, &str)]) -> Expr {
    let ctx = expr.context().clone();
    let mut seeds = FxHashMap::default();
    for &(name, dir) in directions {
        let arg = ctx
            .argument_id(name)
            .unwrap_or_else(|| panic!("cannot linearize along unknown argument `{}`", name));
        let (shape, dtype) = ctx.argument_decl(name).unwrap();
        assert!(
            dtype == Dtype::Float,
            "cannot linearize along non-float argument `{}`",
            name
        );
        seeds.insert(arg, ctx.argument(dir, shape, dtype));
    }
    let mut pf = Pushforward {
        ctx,
        seeds,
        direction: None,
        extra: Shape::scalar(),
        memo: FxHashMap::default(),
    };
    pf.tangent(expr.id())
}

struct Pushforward {
    ctx: Context,
    /// Tangent expressions substituted for argument leaves. Every seed has
    /// the shape of its argument concatenated with `extra`.
    seeds: FxHashMap<ArgId, Expr>,
    /// When differentiating along a spatial direction, the direction index
    /// seeded at the coordinate leaf.
    direction: Option<usize>,
    /// Derivative axes appended to every tangent shape.
    extra: Shape,
    memo: FxHashMap<ExprId, Expr>,
}

impl Pushforward {
    fn zero_tangent(&self, shape: &Shape) -> Expr {
        self.ctx.zeros(shape.concat(&self.extra))
    }

    fn expr(&self, id: ExprId) -> Expr {
        self.ctx.expr(id)
    }

    /// The tangent of a node: shape `node.shape ++ extra`, dtype float.
    /// Each distinct node is visited at most once.
    fn tangent(&mut self, id: ExprId) -> Expr {
        if let Some(t) = self.memo.get(&id) {
            return t.clone();
        }
        let node = self.ctx.node(id);
        let depends = self.seeds.keys().any(|&a| node.depends_on(a))
            || (self.direction.is_some() && node.spatial);
        let result = if !depends {
            self.zero_tangent(&node.shape)
        } else {
            let k = self.extra.rank();
            match node.kind.clone() {
                NodeKind::Constant(_) | NodeKind::Zeros | NodeKind::Delta => {
                    self.zero_tangent(&node.shape)
                }
                NodeKind::Argument(arg) => match self.seeds.get(&arg) {
                    Some(seed) => seed.clone(),
                    None => self.zero_tangent(&node.shape),
                },
                NodeKind::Points => {
                    let ndims = node.shape.dims()[0];
                    match self.direction {
                        Some(dir) => {
                            assert!(
                                dir < ndims,
                                "direction {} out of bounds for {} spatial dimensions",
                                dir,
                                ndims
                            );
                            let mut basis = vec![0.0; ndims];
                            basis[dir] = 1.0;
                            self.ctx.constant(Tensor::from_vec(basis))
                        }
                        None => self.zero_tangent(&node.shape),
                    }
                }
                NodeKind::Add(a, b) => self.tangent(a) + self.tangent(b),
                NodeKind::Mul(a, b) => {
                    let (ea, eb) = (self.expr(a), self.expr(b));
                    ea.cast_float().append_axes(k) * self.tangent(b)
                        + eb.cast_float().append_axes(k) * self.tangent(a)
                }
                NodeKind::Div(a, b) => {
                    let (ea, eb) = (self.expr(a), self.expr(b));
                    let ta = self.tangent(a);
                    let tb = self.tangent(b);
                    &ta / &eb.append_axes(k) - (&ea / (&eb * &eb)).append_axes(k) * tb
                }
                NodeKind::Neg(x) => -self.tangent(x),
                NodeKind::Sum { x, axis } => self.tangent(x).sum(axis),
                NodeKind::Power { x, exponent } => {
                    let c = exponent.into_inner();
                    if c == 0.0 {
                        self.zero_tangent(&node.shape)
                    } else {
                        let ex = self.expr(x);
                        (c * ex.power(c - 1.0)).append_axes(k) * self.tangent(x)
                    }
                }
                NodeKind::Sin(x) => self.expr(x).cos().append_axes(k) * self.tangent(x),
                NodeKind::Cos(x) => -(self.expr(x).sin().append_axes(k) * self.tangent(x)),
                NodeKind::Exp(x) => self.expr(x).exp().append_axes(k) * self.tangent(x),
                NodeKind::Ln(x) => self.tangent(x) / self.expr(x).append_axes(k),
                NodeKind::Reshape(x) => self.tangent(x).reshape(node.shape.concat(&self.extra)),
                NodeKind::Concat { parts, axis } => {
                    let tangents: Vec<Expr> = parts.iter().map(|&p| self.tangent(p)).collect();
                    Expr::concat(&tangents, axis)
                }
                NodeKind::Get { x, axis, index } => self.tangent(x).get(axis, index),
                // Integer-valued and piecewise-constant nodes have exact
                // zero derivatives wherever they are differentiable.
                NodeKind::Cast(_) | NodeKind::Less(_, _) => self.zero_tangent(&node.shape),
                NodeKind::Choose { cond, a, b } => {
                    let (ta, tb) = (self.tangent(a), self.tangent(b));
                    self.expr(cond).append_axes(k).choose(&ta, &tb)
                }
            }
        };
        debug_assert_eq!(result.shape(), node.shape.concat(&self.extra));
        self.memo.insert(id, result.clone());
        result
    }
}
