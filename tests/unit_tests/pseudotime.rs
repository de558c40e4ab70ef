use skoll::expr::{Assignment, Context, Expr, PointSet, Tensor};
use skoll::{Newton, Pseudotime, SolverError, SolverStatus};

fn single_point() -> PointSet {
    PointSet::new(1, vec![0.0], vec![1.0])
}

/// u0^2 + u1 = 3, u0 u1 = 2. The Jacobian is singular at the origin, and
/// (1, 2) is a double root, so only residual-level accuracy is attainable
/// there.
fn stiff_residual(ctx: &Context) -> Expr {
    let u = ctx.field("u", [2]);
    let r0 = u.get(0, 0).power(2.0) + u.get(0, 1) - 3.0;
    let r1 = u.get(0, 0) * u.get(0, 1) - 2.0;
    Expr::concat(&[r0.reshape([1]), r1.reshape([1])], 0)
}

/// u0^2 + u1 = 3, u0 + u1 = 3, with a simple, well-conditioned root at
/// (1, 2).
fn regular_residual(ctx: &Context) -> Expr {
    let u = ctx.field("u", [2]);
    let r0 = u.get(0, 0).power(2.0) + u.get(0, 1) - 3.0;
    let r1 = u.get(0, 0) + u.get(0, 1) - 3.0;
    Expr::concat(&[r0.reshape([1]), r1.reshape([1])], 0)
}

#[test]
fn invalid_timestep_is_a_configuration_error() {
    let ctx = Context::new();
    for timestep in [0.0, -0.5, f64::NAN, f64::INFINITY] {
        let result = Pseudotime::new("u", &[stiff_residual(&ctx)], single_point(), timestep);
        assert!(
            matches!(result, Err(SolverError::Configuration(_))),
            "timestep {} should be rejected",
            timestep
        );
    }
}

#[test]
fn continuation_reaches_a_root_from_a_singular_jacobian_start() {
    let ctx = Context::new();
    let residual = stiff_residual(&ctx);
    // Plain Newton cannot leave the origin: the Jacobian is singular there.
    let newton = Newton::new("u", &[residual.clone()], single_point()).unwrap();
    assert!(matches!(newton.solve(1e-10), Err(SolverError::Linear(_))));

    let solver = Pseudotime::new("u", &[residual], single_point(), 0.5)
        .unwrap()
        .with_maxiter(100);
    let (solution, info) = solver.solve_withinfo(1e-10).unwrap();
    assert_eq!(info.status, SolverStatus::Converged);
    let u = solution.as_bare().unwrap();
    let (a, b) = (u.data()[0], u.data()[1]);
    assert!((a * a + b - 3.0).abs() < 1e-8);
    assert!((a * b - 2.0).abs() < 1e-8);
}

#[test]
fn continuation_matches_newton_on_a_well_conditioned_problem() {
    let ctx = Context::new();
    let residual = regular_residual(&ctx);
    let mut start = Assignment::new();
    start.set("u", Tensor::from_vec(vec![1.5, 1.5]));

    let newton = Newton::new("u", &[residual.clone()], single_point())
        .unwrap()
        .with_initial(start.clone())
        .with_maxiter(50);
    let pseudo = Pseudotime::new("u", &[residual], single_point(), 10.0)
        .unwrap()
        .with_initial(start)
        .with_maxiter(50);

    let a = newton.solve(1e-10).unwrap();
    let b = pseudo.solve(1e-10).unwrap();
    let ua = a.as_bare().unwrap();
    let ub = b.as_bare().unwrap();
    for (x, y) in ua.data().iter().zip(ub.data()) {
        assert!((x - y).abs() < 1e-8);
    }
}
