use crate::context::Context;
use crate::diff::{self, Var};
use crate::node::{ExprId, Node, NodeKind};
use crate::shape::{Dtype, Shape};
use ordered_float::NotNan;
use std::fmt;
use std::ops;
use std::sync::Arc;

/// A handle to an immutable node of a symbolic expression graph.
///
/// Expressions are built by algebraic composition and represent
/// tensor-valued functions of the spatial coordinates and of named
/// arguments. All shape and dtype checking happens at construction time;
/// a successfully constructed expression cannot fail to evaluate for shape
/// reasons.
///
/// Handles are cheap to clone; structurally identical constructions resolve
/// to the same underlying node.
#[derive(Clone)]
pub struct Expr {
    ctx: Context,
    id: ExprId,
}

impl Expr {
    pub(crate) fn from_raw(ctx: Context, id: ExprId) -> Self {
        Expr { ctx, id }
    }

    pub fn id(&self) -> ExprId {
        self.id
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn node(&self) -> Arc<Node> {
        self.ctx.node(self.id)
    }

    pub fn shape(&self) -> Shape {
        self.node().shape.clone()
    }

    pub fn dtype(&self) -> Dtype {
        self.node().dtype
    }

    /// Names of the arguments this expression transitively depends on.
    pub fn arguments(&self) -> Vec<String> {
        self.node()
            .deps
            .iter()
            .map(|&arg| self.ctx.argument_name(arg))
            .collect()
    }

    /// Whether the expression depends on the spatial coordinates.
    pub fn is_spatial(&self) -> bool {
        self.node().spatial
    }

    pub fn is_zeros(&self) -> bool {
        matches!(self.node().kind, NodeKind::Zeros)
    }

    fn make(&self, kind: NodeKind, shape: Shape, dtype: Dtype) -> Expr {
        self.ctx.expr(self.ctx.intern(kind, shape, dtype))
    }

    fn assert_same_context(&self, other: &Expr, op: &str) {
        assert!(
            self.ctx.same_arena(&other.ctx),
            "operands of `{}` must belong to the same expression context",
            op
        );
    }

    fn broadcast_with(&self, other: &Expr, op: &str) -> Shape {
        let (sa, sb) = (self.shape(), other.shape());
        sa.broadcast(&sb).unwrap_or_else(|| {
            panic!("cannot broadcast shapes {} and {} in `{}`", sa, sb, op)
        })
    }

    fn numeric_binary(
        &self,
        other: &Expr,
        op: &str,
        kind: impl FnOnce(ExprId, ExprId) -> NodeKind,
    ) -> Expr {
        self.assert_same_context(other, op);
        assert!(
            self.dtype().is_numeric() && other.dtype().is_numeric(),
            "`{}` requires numeric operands, got {} and {}",
            op,
            self.dtype(),
            other.dtype()
        );
        let shape = self.broadcast_with(other, op);
        let dtype = self.dtype().promote(other.dtype());
        self.make(kind(self.id, other.id), shape, dtype)
    }

    fn add_expr(&self, other: &Expr) -> Expr {
        self.assert_same_context(other, "+");
        let shape = self.broadcast_with(other, "+");
        // A known-zero operand of full shape contributes nothing.
        if self.is_zeros() && other.shape() == shape {
            return other.clone();
        }
        if other.is_zeros() && self.shape() == shape {
            return self.clone();
        }
        self.numeric_binary(other, "+", NodeKind::Add)
    }

    fn mul_expr(&self, other: &Expr) -> Expr {
        self.assert_same_context(other, "*");
        assert!(
            self.dtype().is_numeric() && other.dtype().is_numeric(),
            "`*` requires numeric operands, got {} and {}",
            self.dtype(),
            other.dtype()
        );
        let shape = self.broadcast_with(other, "*");
        if self.is_zeros() || other.is_zeros() {
            return self.ctx.zeros(shape);
        }
        self.numeric_binary(other, "*", NodeKind::Mul)
    }

    fn div_expr(&self, other: &Expr) -> Expr {
        self.assert_same_context(other, "/");
        assert!(
            self.dtype().is_numeric() && other.dtype().is_numeric(),
            "`/` requires numeric operands, got {} and {}",
            self.dtype(),
            other.dtype()
        );
        let shape = self.broadcast_with(other, "/");
        if self.is_zeros() {
            return self.ctx.zeros(shape);
        }
        self.make(NodeKind::Div(self.id, other.id), shape, Dtype::Float)
    }

    fn sub_expr(&self, other: &Expr) -> Expr {
        self.add_expr(&other.neg_expr())
    }

    fn neg_expr(&self) -> Expr {
        assert!(self.dtype().is_numeric(), "unary `-` requires a numeric operand");
        if self.is_zeros() {
            return self.clone();
        }
        self.make(NodeKind::Neg(self.id), self.shape(), self.dtype())
    }

    /// Sum over one explicit axis. There is deliberately no all-axes
    /// default; callers must state the axis they contract.
    ///
    /// # Panics
    ///
    /// Panics if `axis` is out of bounds or the operand is not numeric.
    pub fn sum(&self, axis: usize) -> Expr {
        let shape = self.shape();
        assert!(
            axis < shape.rank(),
            "sum axis {} out of bounds for shape {}",
            axis,
            shape
        );
        assert!(self.dtype().is_numeric(), "`sum` requires a numeric operand");
        let out = shape.removed_axis(axis);
        if self.is_zeros() {
            return self.ctx.zeros(out);
        }
        self.make(NodeKind::Sum { x: self.id, axis }, out, self.dtype())
    }

    /// Contraction of two equally-broadcast operands over one explicit
    /// axis: elementwise product followed by a sum over `axis`.
    ///
    /// The axis argument is mandatory; there is no positional default.
    pub fn dot(&self, other: &Expr, axis: usize) -> Expr {
        self.mul_expr(other).sum(axis)
    }

    /// Elementwise power with a constant exponent.
    ///
    /// # Panics
    ///
    /// Panics if the exponent is NaN or the operand is not numeric.
    pub fn power(&self, exponent: f64) -> Expr {
        assert!(self.dtype().is_numeric(), "`power` requires a numeric operand");
        let exponent = NotNan::new(exponent).expect("power exponent must not be NaN");
        self.make(
            NodeKind::Power { x: self.id, exponent },
            self.shape(),
            Dtype::Float,
        )
    }

    pub fn sqrt(&self) -> Expr {
        self.power(0.5)
    }

    fn float_unary(&self, op: &str, kind: impl FnOnce(ExprId) -> NodeKind) -> Expr {
        assert!(
            self.dtype() == Dtype::Float,
            "`{}` requires a float operand, got {}",
            op,
            self.dtype()
        );
        self.make(kind(self.id), self.shape(), Dtype::Float)
    }

    pub fn sin(&self) -> Expr {
        self.float_unary("sin", NodeKind::Sin)
    }

    pub fn cos(&self) -> Expr {
        self.float_unary("cos", NodeKind::Cos)
    }

    pub fn exp(&self) -> Expr {
        self.float_unary("exp", NodeKind::Exp)
    }

    pub fn ln(&self) -> Expr {
        self.float_unary("ln", NodeKind::Ln)
    }

    /// Shape change preserving the element count and the element order.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Expr {
        let shape = shape.into();
        let own = self.shape();
        assert_eq!(
            shape.len(),
            own.len(),
            "cannot reshape {} into {}: element counts differ",
            own,
            shape
        );
        if shape == own {
            return self.clone();
        }
        if self.is_zeros() {
            return self.ctx.zeros(shape);
        }
        // Nested reshapes collapse to a single node.
        if let NodeKind::Reshape(inner) = self.node().kind {
            return self.ctx.expr(inner).reshape(shape);
        }
        self.make(NodeKind::Reshape(self.id), shape, self.dtype())
    }

    /// Appends `k` axes of size one, so that the expression broadcasts
    /// against operands carrying `k` extra trailing axes.
    pub(crate) fn append_axes(&self, k: usize) -> Expr {
        if k == 0 {
            return self.clone();
        }
        let shape = self.shape().appended_ones(k);
        self.reshape(shape)
    }

    /// Extracts a single index along an axis, removing that axis.
    pub fn get(&self, axis: usize, index: usize) -> Expr {
        let shape = self.shape();
        assert!(axis < shape.rank(), "get axis {} out of bounds for shape {}", axis, shape);
        assert!(
            index < shape.dims()[axis],
            "index {} out of bounds for axis {} of shape {}",
            index,
            axis,
            shape
        );
        let out = shape.removed_axis(axis);
        if self.is_zeros() {
            return self.ctx.zeros(out);
        }
        self.make(NodeKind::Get { x: self.id, axis, index }, out, self.dtype())
    }

    /// Converts an int or bool expression to float. A float expression is
    /// returned unchanged.
    pub fn cast_float(&self) -> Expr {
        if self.dtype() == Dtype::Float {
            return self.clone();
        }
        self.make(NodeKind::Cast(self.id), self.shape(), Dtype::Float)
    }

    /// Elementwise strict comparison, producing a bool expression.
    pub fn less(&self, other: &Expr) -> Expr {
        self.assert_same_context(other, "less");
        assert!(
            self.dtype().is_numeric() && other.dtype().is_numeric(),
            "`less` requires numeric operands"
        );
        let shape = self.broadcast_with(other, "less");
        self.make(NodeKind::Less(self.id, other.id), shape, Dtype::Bool)
    }

    /// Elementwise selection: where `self` holds, the value of `a`,
    /// elsewhere the value of `b`. `self` must be a bool expression, and
    /// `a` and `b` must share a dtype.
    pub fn choose(&self, a: &Expr, b: &Expr) -> Expr {
        self.assert_same_context(a, "choose");
        self.assert_same_context(b, "choose");
        assert!(
            self.dtype() == Dtype::Bool,
            "`choose` requires a bool condition, got {}",
            self.dtype()
        );
        assert!(
            a.dtype() == b.dtype(),
            "`choose` branches must share a dtype, got {} and {}",
            a.dtype(),
            b.dtype()
        );
        let shape = self
            .broadcast_with(a, "choose")
            .broadcast(&b.shape())
            .unwrap_or_else(|| {
                panic!(
                    "cannot broadcast shapes {}, {} and {} in `choose`",
                    self.shape(),
                    a.shape(),
                    b.shape()
                )
            });
        self.make(
            NodeKind::Choose { cond: self.id, a: a.id, b: b.id },
            shape,
            a.dtype(),
        )
    }

    /// Concatenates expressions along an existing axis. All parts must have
    /// equal rank, equal dtype, and equal sizes on every other axis.
    pub fn concat(parts: &[Expr], axis: usize) -> Expr {
        assert!(!parts.is_empty(), "`concat` requires at least one operand");
        let first = &parts[0];
        let rank = first.shape().rank();
        assert!(axis < rank, "concat axis {} out of bounds for rank {}", axis, rank);
        if parts.len() == 1 {
            return first.clone();
        }
        let dtype = first.dtype();
        let mut dims = first.shape().dims().to_vec();
        for part in &parts[1..] {
            first.assert_same_context(part, "concat");
            let shape = part.shape();
            assert_eq!(shape.rank(), rank, "`concat` operands must have equal rank");
            assert_eq!(part.dtype(), dtype, "`concat` operands must share a dtype");
            for (ax, (&a, &b)) in dims.iter().zip(shape.dims()).enumerate() {
                assert!(
                    ax == axis || a == b,
                    "`concat` operands disagree on axis {}: {} vs {}",
                    ax,
                    a,
                    b
                );
            }
            dims[axis] += shape.dims()[axis];
        }
        let out = Shape::from(dims);
        if parts.iter().all(|p| p.is_zeros()) {
            return first.ctx.zeros(out);
        }
        let kind = NodeKind::Concat {
            parts: parts.iter().map(|p| p.id).collect(),
            axis,
        };
        first.make(kind, out, dtype)
    }

    /// The exact derivative with respect to a named argument or a spatial
    /// direction. See [`diff::derivative`].
    pub fn derivative(&self, var: Var<'_>) -> Expr {
        diff::derivative(self, var)
    }

    /// The spatial gradient: direction derivatives stacked into one new
    /// trailing axis of size `ndims`.
    pub fn grad(&self, ndims: usize) -> Expr {
        assert!(ndims > 0, "`grad` requires at least one spatial dimension");
        let rank = self.shape().rank();
        let parts: Vec<Expr> = (0..ndims)
            .map(|k| {
                let partial = self.derivative(Var::Direction(k));
                let shape = partial.shape().appended_ones(1);
                partial.reshape(shape)
            })
            .collect();
        Expr::concat(&parts, rank)
    }

    /// The linearization of this expression along the given
    /// `(argument, direction)` pairs. See [`diff::linearize`].
    pub fn linearize(&self, directions: &[(&str, &str)]) -> Expr {
        diff::linearize(self, directions)
    }

    fn scalar_rhs(&self, value: f64) -> Expr {
        self.ctx.scalar(value)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node();
        f.debug_struct("Expr")
            .field("id", &self.id.index())
            .field("kind", &node.kind)
            .field("shape", &node.shape)
            .field("dtype", &node.dtype)
            .finish()
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.ctx.same_arena(&other.ctx) && self.id == other.id
    }
}

impl Eq for Expr {}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $delegate:ident) => {
        impl ops::$trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                self.$delegate(rhs)
            }
        }

        impl ops::$trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                self.$delegate(&rhs)
            }
        }

        impl ops::$trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                self.$delegate(rhs)
            }
        }

        impl ops::$trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                self.$delegate(&rhs)
            }
        }

        impl ops::$trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                self.$delegate(&self.scalar_rhs(rhs))
            }
        }

        impl ops::$trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                self.$delegate(&self.scalar_rhs(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, add_expr);
impl_binary_op!(Sub, sub, sub_expr);
impl_binary_op!(Mul, mul, mul_expr);
impl_binary_op!(Div, div, div_expr);

impl ops::Mul<&Expr> for f64 {
    type Output = Expr;
    fn mul(self, rhs: &Expr) -> Expr {
        rhs * self
    }
}

impl ops::Mul<Expr> for f64 {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        &rhs * self
    }
}

impl ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.neg_expr()
    }
}

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.neg_expr()
    }
}
