use matrixcompare::assert_matrix_eq;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use skoll::calculus::{
    approximate_gradient_fd, approximate_jacobian, DifferentiableVectorFunction, VectorFunction,
    VectorFunctionBuilder,
};
use skoll::expr::{Assignment, Context, Evaluator, Expr, PointSet, Tensor};
use skoll::linalg::DenseLu;
use skoll::system::{ExprSystem, SystemFunction};
use skoll::targets::TargetList;

fn single_point() -> PointSet {
    PointSet::new(1, vec![0.0], vec![1.0])
}

fn nonlinear_system(ctx: &Context) -> ExprSystem {
    let u = ctx.field("u", [2]);
    let r0 = u.get(0, 0).power(2.0) + u.get(0, 1) - 3.0;
    let r1 = u.get(0, 0) * u.get(0, 1).exp() - 2.0;
    let residual = Expr::concat(&[r0.reshape([1]), r1.reshape([1])], 0);
    let targets = TargetList::parse("u").unwrap();
    ExprSystem::new(targets, vec![residual], single_point()).unwrap()
}

#[test]
fn symbolic_jacobian_matches_finite_differences() {
    let ctx = Context::new();
    let system = nonlinear_system(&ctx);
    let backend = DenseLu;
    let x = DVector::from_vec(vec![0.7, -0.3]);

    let mut args = Assignment::new();
    system.seed_targets(&mut args);
    system.scatter(&DVectorView::from(&x), &mut args);
    let symbolic = system.jacobian_matrix(&Evaluator::serial(), &args).unwrap();

    let mut function = SystemFunction::new(&system, Assignment::new(), &backend);
    let fd = approximate_jacobian(&mut function, &x, &1e-6).unwrap();

    assert_matrix_eq!(symbolic, fd, comp = abs, tol = 1e-6);
}

#[test]
fn jacobian_system_solve_inverts_the_symbolic_jacobian() {
    let ctx = Context::new();
    let system = nonlinear_system(&ctx);
    let backend = DenseLu;
    let x = DVector::from_vec(vec![1.2, 0.4]);
    let rhs = DVector::from_vec(vec![0.5, -1.0]);

    let mut function = SystemFunction::new(&system, Assignment::new(), &backend);
    let mut sol = DVector::zeros(2);
    function
        .solve_jacobian_system(
            &mut DVectorViewMut::from(&mut sol),
            &DVectorView::from(&x),
            &DVectorView::from(&rhs),
        )
        .unwrap();

    let mut args = Assignment::new();
    system.seed_targets(&mut args);
    system.scatter(&DVectorView::from(&x), &mut args);
    let jacobian = system.jacobian_matrix(&Evaluator::serial(), &args).unwrap();
    let recovered = &jacobian * &sol;
    for (a, b) in recovered.iter().zip(rhs.iter()) {
        assert!((a - b).abs() < 1e-10);
    }
}

#[test]
fn builder_based_vector_function_supports_fd_jacobians() {
    // f(x) = (x0 + x1^2, sin(x0))
    let mut f = VectorFunctionBuilder::with_dimension(2).with_function(
        |out: &mut DVectorViewMut<f64>, x: &DVectorView<f64>| -> eyre::Result<()> {
            out[0] = x[0] + x[1] * x[1];
            out[1] = x[0].sin();
            Ok(())
        },
    );
    assert_eq!(f.dimension(), 2);

    let x = DVector::from_vec(vec![0.3, 0.8]);
    let jacobian = approximate_jacobian(&mut f, &x, &1e-6).unwrap();
    assert!((jacobian[(0, 0)] - 1.0).abs() < 1e-6);
    assert!((jacobian[(0, 1)] - 1.6).abs() < 1e-6);
    assert!((jacobian[(1, 0)] - 0.3f64.cos()).abs() < 1e-6);
    assert!(jacobian[(1, 1)].abs() < 1e-6);
}

#[test]
fn fd_gradient_of_a_quadratic_is_linear() {
    let x = DVector::from_vec(vec![1.0, -2.0, 0.5]);
    let grad = approximate_gradient_fd(|x: DVectorView<f64>| x.dot(&x), &x, 1e-6);
    for (g, xi) in grad.iter().zip(x.iter()) {
        assert!((g - 2.0 * xi).abs() < 1e-6);
    }
}

#[test]
fn fd_jacobian_agrees_with_the_derivative_of_a_gradient_expression() {
    // The Hessian of f(u) = (u . u)^2 assembled through a symbolic system
    // must match the finite-difference Jacobian of its gradient.
    let ctx = Context::new();
    let u = ctx.field("u", [2]);
    let objective = u.dot(&u, 0).power(2.0);
    let targets = TargetList::parse("u").unwrap();
    let system = ExprSystem::from_objective(targets, &objective, single_point()).unwrap();
    let backend = DenseLu;

    let x = DVector::from_vec(vec![0.9, -1.3]);
    let mut args = Assignment::new();
    args.set("u", Tensor::from_vec(vec![0.9, -1.3]));
    let hessian = system.jacobian_matrix(&Evaluator::serial(), &args).unwrap();

    let mut gradient = SystemFunction::new(&system, Assignment::new(), &backend);
    let fd = approximate_jacobian(&mut gradient, &x, &1e-5).unwrap();
    assert_matrix_eq!(hessian, fd, comp = abs, tol = 1e-4);
}
