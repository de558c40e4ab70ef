use crate::calculus::{DifferentiableVectorFunction, VectorFunction};
use crate::error::SolverError;
use crate::linalg::LinearSolver;
use crate::targets::TargetList;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use skoll_expr::{Assignment, Dtype, EvalError, Evaluator, Expr, PointSet, Shape, Tensor, Var};

/// One contiguous segment of the flattened unknown vector, corresponding
/// to a single trial argument.
#[derive(Debug, Clone)]
struct Block {
    name: String,
    shape: Shape,
    offset: usize,
    len: usize,
}

/// A square nonlinear system assembled from residual expressions.
///
/// The system flattens the trial arguments of a target list into a single
/// unknown vector and exposes the weight-contracted residual vector and
/// dense Jacobian matrix at any argument assignment. The Jacobian blocks
/// are derived symbolically from the residual expressions, never
/// hand-coded.
pub struct ExprSystem {
    targets: TargetList,
    residuals: Vec<Expr>,
    jacobians: Vec<Vec<Expr>>,
    points: PointSet,
    blocks: Vec<Block>,
    dimension: usize,
}

impl ExprSystem {
    /// Builds a system from one residual integrand per target.
    ///
    /// The residual for target `i` is integrated over the point set and
    /// must have the same number of components as trial argument `i`, so
    /// that the assembled system is square.
    pub fn new(targets: TargetList, residuals: Vec<Expr>, points: PointSet) -> Result<Self, SolverError> {
        if residuals.len() != targets.len() {
            return Err(SolverError::Configuration(format!(
                "expected {} residuals for {} targets, got {}",
                targets.len(),
                targets.len(),
                residuals.len()
            )));
        }
        for pair in residuals.windows(2) {
            if !pair[0].context().same_arena(pair[1].context()) {
                return Err(SolverError::Configuration(
                    "residual expressions belong to different expression graphs".to_string(),
                ));
            }
        }

        let mut blocks = Vec::with_capacity(targets.len());
        let mut offset = 0;
        for (entry, residual) in targets.iter().zip(&residuals) {
            let ctx = residual.context();
            let (shape, dtype) = ctx.argument_decl(&entry.trial).ok_or_else(|| {
                SolverError::Configuration(format!(
                    "unknown target argument `{}`: not declared in the expression graph",
                    entry.trial
                ))
            })?;
            if dtype != Dtype::Float {
                return Err(SolverError::Configuration(format!(
                    "target argument `{}` has dtype {}, solving requires float arguments",
                    entry.trial, dtype
                )));
            }
            if residual.dtype() != Dtype::Float {
                return Err(SolverError::Configuration(format!(
                    "residual for target `{}` has dtype {}, expected float",
                    entry.trial,
                    residual.dtype()
                )));
            }
            if residual.shape().len() != shape.len() {
                return Err(SolverError::Configuration(format!(
                    "residual for target `{}` has {} components, argument has {}: system is not square",
                    entry.trial,
                    residual.shape().len(),
                    shape.len()
                )));
            }
            let len = shape.len();
            blocks.push(Block {
                name: entry.trial.clone(),
                shape,
                offset,
                len,
            });
            offset += len;
        }

        let jacobians = residuals
            .iter()
            .map(|residual| {
                targets
                    .iter()
                    .map(|entry| residual.derivative(Var::Argument(&entry.trial)))
                    .collect()
            })
            .collect();

        Ok(ExprSystem {
            targets,
            residuals,
            jacobians,
            points,
            blocks,
            dimension: offset,
        })
    }

    /// Builds a system from a scalar integrand and colon-paired targets by
    /// differentiating the integrand against each test argument.
    pub fn from_functional(targets: TargetList, integrand: &Expr, points: PointSet) -> Result<Self, SolverError> {
        require_scalar(integrand, "functional integrand")?;
        let residuals = targets
            .iter()
            .map(|entry| {
                let test = entry.test.as_deref().ok_or_else(|| {
                    SolverError::Configuration(format!(
                        "target `{}` has no test argument: the functional form requires trial:test pairs",
                        entry.trial
                    ))
                })?;
                if integrand.context().argument_decl(test).is_none() {
                    return Err(SolverError::Configuration(format!(
                        "unknown test argument `{}`: not declared in the expression graph",
                        test
                    )));
                }
                Ok(integrand.derivative(Var::Argument(test)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(targets, residuals, points)
    }

    /// Builds a system whose residuals are the gradients of a scalar
    /// objective with respect to each trial argument, so that roots of the
    /// system are stationary points of the objective. The Jacobian of such
    /// a system is the Hessian of the objective.
    pub fn from_objective(targets: TargetList, objective: &Expr, points: PointSet) -> Result<Self, SolverError> {
        require_scalar(objective, "objective")?;
        let residuals = targets
            .iter()
            .map(|entry| objective.derivative(Var::Argument(&entry.trial)))
            .collect();
        Self::new(targets, residuals, points)
    }

    /// Total number of unknowns (and residual components).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn targets(&self) -> &TargetList {
        &self.targets
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// Inserts a zero tensor of the registered shape for every trial
    /// argument absent from the assignment. Non-target arguments are left
    /// untouched; if unbound, evaluation reports them as errors.
    pub fn seed_targets(&self, args: &mut Assignment) {
        for block in &self.blocks {
            if !args.contains(&block.name) {
                args.set(block.name.clone(), Tensor::zeros(block.shape.clone()));
            }
        }
    }

    /// Flattens the trial-argument values of the assignment into a single
    /// unknown vector, in target order.
    pub fn gather(&self, args: &Assignment) -> DVector<f64> {
        let mut x = DVector::zeros(self.dimension);
        for block in &self.blocks {
            if let Some(value) = args.get(&block.name) {
                x.rows_mut(block.offset, block.len)
                    .copy_from_slice(value.data());
            }
        }
        x
    }

    /// Writes the segments of an unknown vector back into the assignment
    /// as tensors of the registered shapes.
    pub fn scatter(&self, x: &DVectorView<f64>, args: &mut Assignment) {
        for block in &self.blocks {
            let data = x.rows(block.offset, block.len).iter().copied().collect();
            args.set(block.name.clone(), Tensor::new(block.shape.clone(), data));
        }
    }

    /// Assembles the weight-contracted residual vector at the given
    /// assignment.
    pub fn residual_vector(&self, evaluator: &Evaluator, args: &Assignment) -> Result<DVector<f64>, EvalError> {
        let mut r = DVector::zeros(self.dimension);
        for (block, residual) in self.blocks.iter().zip(&self.residuals) {
            let value = evaluator.integrate(residual, &self.points, args)?;
            r.rows_mut(block.offset, block.len).copy_from_slice(value.data());
        }
        Ok(r)
    }

    /// Assembles the dense Jacobian of the residual vector with respect to
    /// the flattened unknowns.
    pub fn jacobian_matrix(&self, evaluator: &Evaluator, args: &Assignment) -> Result<DMatrix<f64>, EvalError> {
        let mut jac = DMatrix::zeros(self.dimension, self.dimension);
        for (row_block, jac_row) in self.blocks.iter().zip(&self.jacobians) {
            for (col_block, entry) in self.blocks.iter().zip(jac_row) {
                let value = evaluator.integrate(entry, &self.points, args)?;
                let data = value.data();
                debug_assert_eq!(data.len(), row_block.len * col_block.len);
                for r in 0..row_block.len {
                    for c in 0..col_block.len {
                        jac[(row_block.offset + r, col_block.offset + c)] = data[r * col_block.len + c];
                    }
                }
            }
        }
        Ok(jac)
    }

    /// Integrates a scalar expression over the system's point set.
    pub fn scalar(&self, evaluator: &Evaluator, args: &Assignment, expr: &Expr) -> Result<f64, EvalError> {
        let value = evaluator.integrate(expr, &self.points, args)?;
        Ok(value.as_scalar())
    }
}

fn require_scalar(expr: &Expr, role: &str) -> Result<(), SolverError> {
    if !expr.shape().is_scalar() {
        return Err(SolverError::Configuration(format!(
            "{} must be scalar, got shape {}",
            role,
            expr.shape()
        )));
    }
    if expr.dtype() != Dtype::Float {
        return Err(SolverError::Configuration(format!(
            "{} must have dtype float, got {}",
            role,
            expr.dtype()
        )));
    }
    Ok(())
}

/// Adapts an [`ExprSystem`] with a fixed assignment of non-target
/// arguments to the vector-function calculus interface.
pub struct SystemFunction<'a> {
    system: &'a ExprSystem,
    backend: &'a dyn LinearSolver,
    evaluator: Evaluator,
    args: Assignment,
}

impl<'a> SystemFunction<'a> {
    pub fn new(system: &'a ExprSystem, mut args: Assignment, backend: &'a dyn LinearSolver) -> Self {
        system.seed_targets(&mut args);
        SystemFunction {
            system,
            backend,
            evaluator: Evaluator::serial(),
            args,
        }
    }
}

impl VectorFunction<f64> for SystemFunction<'_> {
    fn dimension(&self) -> usize {
        self.system.dimension()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> eyre::Result<()> {
        self.system.scatter(x, &mut self.args);
        let r = self
            .system
            .residual_vector(&self.evaluator, &self.args)
            .map_err(eyre::Report::new)?;
        f.copy_from(&r);
        Ok(())
    }
}

impl DifferentiableVectorFunction<f64> for SystemFunction<'_> {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> eyre::Result<()> {
        self.system.scatter(x, &mut self.args);
        let jac = self
            .system
            .jacobian_matrix(&self.evaluator, &self.args)
            .map_err(eyre::Report::new)?;
        let solution = self.backend.solve(&jac, &rhs.clone_owned())?;
        sol.copy_from(&solution);
        Ok(())
    }
}
