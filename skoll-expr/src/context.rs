use crate::expr::Expr;
use crate::node::{ArgId, ExprId, Node, NodeKind};
use crate::shape::{Dtype, Shape};
use crate::tensor::Tensor;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Interning key: structurally identical constructions map to one node.
#[derive(Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    kind: NodeKind,
    shape: Shape,
    dtype: Dtype,
}

#[derive(Debug, Clone)]
struct ArgDecl {
    name: String,
    shape: Shape,
    dtype: Dtype,
}

#[derive(Default)]
struct ArgRegistry {
    decls: Vec<ArgDecl>,
    by_name: FxHashMap<String, ArgId>,
}

#[derive(Default)]
struct ContextInner {
    nodes: RwLock<Vec<Arc<Node>>>,
    interned: RwLock<FxHashMap<NodeKey, ExprId>>,
    args: RwLock<ArgRegistry>,
    /// Memoized argument derivatives, keyed by (source node, argument).
    diff_cache: RwLock<FxHashMap<(ExprId, ArgId), ExprId>>,
}

/// Owner of an expression graph: an append-only arena of hash-consed nodes
/// plus the registry of named arguments.
///
/// Cloning a `Context` is cheap and yields a handle to the same arena.
/// Nodes are immutable once created; the arena only ever grows, so shared
/// sub-expressions keep their identity for the lifetime of the context.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether two handles refer to the same underlying node arena.
    pub fn same_arena(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn node(&self, id: ExprId) -> Arc<Node> {
        self.inner.nodes.read()[id.index()].clone()
    }

    /// Number of nodes currently interned. Mainly useful for tests that
    /// verify structural sharing.
    pub fn num_nodes(&self) -> usize {
        self.inner.nodes.read().len()
    }

    /// Interns a node, returning the id of an existing structurally
    /// identical node when there is one.
    pub(crate) fn intern(&self, kind: NodeKind, shape: Shape, dtype: Dtype) -> ExprId {
        let key = NodeKey { kind, shape, dtype };
        if let Some(&id) = self.inner.interned.read().get(&key) {
            return id;
        }

        // Dependency sets are derived from the operands before any write
        // lock is taken.
        let mut deps: Vec<ArgId> = Vec::new();
        let mut spatial = false;
        for op in key.kind.operands() {
            let node = self.node(op);
            deps.extend_from_slice(&node.deps);
            spatial |= node.spatial;
        }
        match &key.kind {
            NodeKind::Argument(arg) => deps.push(*arg),
            NodeKind::Points => spatial = true,
            _ => {}
        }
        deps.sort_unstable();
        deps.dedup();

        let mut interned = self.inner.interned.write();
        if let Some(&id) = interned.get(&key) {
            return id;
        }
        let mut nodes = self.inner.nodes.write();
        let id = ExprId(nodes.len() as u32);
        nodes.push(Arc::new(Node {
            kind: key.kind.clone(),
            shape: key.shape.clone(),
            dtype: key.dtype,
            deps,
            spatial,
        }));
        interned.insert(key, id);
        id
    }

    pub(crate) fn expr(&self, id: ExprId) -> Expr {
        Expr::from_raw(self.clone(), id)
    }

    /// A literal tensor expression.
    pub fn constant(&self, tensor: Tensor) -> Expr {
        let shape = tensor.shape().clone();
        let id = self.intern(NodeKind::Constant(tensor), shape, Dtype::Float);
        self.expr(id)
    }

    pub fn scalar(&self, value: f64) -> Expr {
        self.constant(Tensor::scalar(value))
    }

    /// An integer scalar literal.
    pub fn int_scalar(&self, value: i64) -> Expr {
        let id = self.intern(
            NodeKind::Constant(Tensor::scalar(value as f64)),
            Shape::scalar(),
            Dtype::Int,
        );
        self.expr(id)
    }

    /// The exact zero tensor of the given shape.
    pub fn zeros(&self, shape: impl Into<Shape>) -> Expr {
        let id = self.intern(NodeKind::Zeros, shape.into(), Dtype::Float);
        self.expr(id)
    }

    /// The identity tensor over paired axes: for `shape = s`, the result has
    /// shape `s ++ s` and contracts with a tensor of shape `s` to reproduce
    /// it. For a scalar shape this is the literal one.
    pub fn delta(&self, shape: &Shape) -> Expr {
        if shape.is_scalar() {
            return self.scalar(1.0);
        }
        let full = shape.concat(shape);
        let id = self.intern(NodeKind::Delta, full, Dtype::Float);
        self.expr(id)
    }

    /// The spatial coordinate leaf, shape `(ndims,)`.
    pub fn points(&self, ndims: usize) -> Expr {
        assert!(ndims > 0, "the coordinate leaf requires at least one spatial dimension");
        let id = self.intern(NodeKind::Points, Shape::from(vec![ndims]), Dtype::Float);
        self.expr(id)
    }

    /// A named unknown argument.
    ///
    /// The first declaration of a name fixes its shape and dtype; any later
    /// reference must agree.
    ///
    /// # Panics
    ///
    /// Panics if `name` was previously declared with a different shape or
    /// dtype.
    pub fn argument(&self, name: &str, shape: impl Into<Shape>, dtype: Dtype) -> Expr {
        let shape = shape.into();
        let arg = {
            let mut args = self.inner.args.write();
            match args.by_name.get(name) {
                Some(&arg) => {
                    let decl = &args.decls[arg.0 as usize];
                    assert!(
                        decl.shape == shape && decl.dtype == dtype,
                        "argument `{}` already declared with shape {} and dtype {}, \
                         redeclared with shape {} and dtype {}",
                        name,
                        decl.shape,
                        decl.dtype,
                        shape,
                        dtype
                    );
                    arg
                }
                None => {
                    let arg = ArgId(args.decls.len() as u32);
                    args.decls.push(ArgDecl {
                        name: name.to_string(),
                        shape: shape.clone(),
                        dtype,
                    });
                    args.by_name.insert(name.to_string(), arg);
                    arg
                }
            }
        };
        let id = self.intern(NodeKind::Argument(arg), shape, dtype);
        self.expr(id)
    }

    /// A float-valued argument; shorthand for the common case.
    pub fn field(&self, name: &str, shape: impl Into<Shape>) -> Expr {
        self.argument(name, shape, Dtype::Float)
    }

    /// Shape and dtype of a registered argument.
    pub fn argument_decl(&self, name: &str) -> Option<(Shape, Dtype)> {
        let args = self.inner.args.read();
        args.by_name
            .get(name)
            .map(|&arg| {
                let decl = &args.decls[arg.0 as usize];
                (decl.shape.clone(), decl.dtype)
            })
    }

    pub(crate) fn argument_id(&self, name: &str) -> Option<ArgId> {
        self.inner.args.read().by_name.get(name).copied()
    }

    pub(crate) fn argument_name(&self, arg: ArgId) -> String {
        self.inner.args.read().decls[arg.0 as usize].name.clone()
    }

    pub(crate) fn cached_derivative(&self, id: ExprId, arg: ArgId) -> Option<ExprId> {
        self.inner.diff_cache.read().get(&(id, arg)).copied()
    }

    pub(crate) fn cache_derivative(&self, id: ExprId, arg: ArgId, result: ExprId) {
        self.inner.diff_cache.write().insert((id, arg), result);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("num_nodes", &self.num_nodes())
            .finish()
    }
}
