use crate::shape::{Dtype, Shape};
use crate::tensor::Tensor;
use ordered_float::NotNan;

/// Stable identity of an expression node within its [`Context`](crate::Context).
///
/// Operand ids are always strictly smaller than the id of the node that
/// references them, so iterating ids in ascending order is a topological
/// order of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a registered argument within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArgId(pub(crate) u32);

/// The closed set of operator kinds.
///
/// Both the differentiation engine and the evaluator match exhaustively on
/// this enumeration, so a new operator cannot be added without defining its
/// derivative rule and its numeric semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A literal tensor, identical at every point.
    Constant(Tensor),
    /// The all-zero tensor of the node's shape.
    Zeros,
    /// The identity tensor over paired trailing axes: for a node of shape
    /// `s ++ s`, element `(i, j)` is one exactly when the multi-indices `i`
    /// and `j` coincide.
    Delta,
    /// A named unknown, bound to a concrete tensor only at evaluation time.
    Argument(ArgId),
    /// The spatial coordinates of the evaluation point, shape `(ndims,)`.
    Points,
    Add(ExprId, ExprId),
    Mul(ExprId, ExprId),
    Div(ExprId, ExprId),
    Neg(ExprId),
    Sum { x: ExprId, axis: usize },
    Power { x: ExprId, exponent: NotNan<f64> },
    Sin(ExprId),
    Cos(ExprId),
    Exp(ExprId),
    Ln(ExprId),
    /// Shape change without data change; the target shape is the node shape.
    Reshape(ExprId),
    Concat { parts: Vec<ExprId>, axis: usize },
    /// Extraction of one index along one axis, removing that axis.
    Get { x: ExprId, axis: usize, index: usize },
    /// Conversion of an int or bool expression to float.
    Cast(ExprId),
    /// Elementwise strict comparison, producing a bool expression.
    Less(ExprId, ExprId),
    /// Elementwise selection by a bool condition.
    Choose { cond: ExprId, a: ExprId, b: ExprId },
}

impl NodeKind {
    /// The operand ids of this node, in order.
    pub fn operands(&self) -> Vec<ExprId> {
        use NodeKind::*;
        match self {
            Constant(_) | Zeros | Delta | Argument(_) | Points => Vec::new(),
            Add(a, b) | Mul(a, b) | Div(a, b) | Less(a, b) => vec![*a, *b],
            Neg(x) | Sin(x) | Cos(x) | Exp(x) | Ln(x) | Reshape(x) | Cast(x) => vec![*x],
            Sum { x, .. } | Power { x, .. } | Get { x, .. } => vec![*x],
            Concat { parts, .. } => parts.clone(),
            Choose { cond, a, b } => vec![*cond, *a, *b],
        }
    }
}

/// An immutable node of the expression graph.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub shape: Shape,
    pub dtype: Dtype,
    /// Sorted, deduplicated ids of the arguments this node transitively
    /// depends on.
    pub deps: Vec<ArgId>,
    /// Whether the node transitively depends on the spatial coordinates.
    pub spatial: bool,
}

impl Node {
    pub fn depends_on(&self, arg: ArgId) -> bool {
        self.deps.binary_search(&arg).is_ok()
    }
}
