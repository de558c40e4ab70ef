use skoll::expr::{evaluate, Assignment, Context, Expr, PointSet, Tensor};
use skoll::{Minimize, NormBased, SolverError, SolverStatus};

fn single_point() -> PointSet {
    PointSet::new(1, vec![0.0], vec![1.0])
}

/// Strictly convex quadratic with minimum at (1, -0.5).
fn quadratic_objective(ctx: &Context) -> Expr {
    let u = ctx.field("u", [2]);
    (u.get(0, 0) - 1.0).power(2.0) + 2.0 * (u.get(0, 1) + 0.5).power(2.0)
}

#[test]
fn quadratic_objective_is_minimized_in_one_iteration() {
    let ctx = Context::new();
    let solver = Minimize::new("u", &quadratic_objective(&ctx), single_point()).unwrap();
    let (solution, info) = solver.solve_withinfo(1e-10).unwrap();

    assert_eq!(info.status, SolverStatus::Converged);
    assert_eq!(info.niter, 1);
    let u = solution.as_bare().unwrap();
    assert!((u.data()[0] - 1.0).abs() < 1e-10);
    assert!((u.data()[1] + 0.5).abs() < 1e-10);
}

#[test]
fn nonquadratic_objective_converges_to_the_stationary_point() {
    let ctx = Context::new();
    let u = ctx.field("u", [2]);
    // f(u) = exp(u0) - u0 + (u1 - 2)^2, minimum at (0, 2).
    let objective = u.get(0, 0).exp() - u.get(0, 0) + (u.get(0, 1) - 2.0).power(2.0);

    let mut start = Assignment::new();
    start.set("u", Tensor::from_vec(vec![1.0, 0.0]));
    let solver = Minimize::new("u", &objective, single_point())
        .unwrap()
        .with_initial(start)
        .with_maxiter(50)
        .with_linesearch(Some(Box::new(NormBased::default())));
    let (solution, info) = solver.solve_withinfo(1e-10).unwrap();

    assert_eq!(info.status, SolverStatus::Converged);
    let u = solution.as_bare().unwrap();
    assert!(u.data()[0].abs() < 1e-8);
    assert!((u.data()[1] - 2.0).abs() < 1e-8);
}

#[test]
fn accepted_steps_never_increase_the_objective() {
    let ctx = Context::new();
    let objective = quadratic_objective(&ctx);
    let mut start = Assignment::new();
    start.set("u", Tensor::from_vec(vec![5.0, -4.0]));

    let initial_value = {
        let batch = evaluate(&objective, &single_point(), &start).unwrap();
        batch.point(0)[0]
    };

    let solver = Minimize::new("u", &objective, single_point())
        .unwrap()
        .with_initial(start)
        .with_maxiter(50)
        .with_linesearch(Some(Box::new(NormBased::default())));
    let (solution, _) = solver.solve_withinfo(1e-10).unwrap();

    let mut converged = Assignment::new();
    converged.set("u", solution.as_bare().unwrap().clone());
    let final_value = evaluate(&objective, &single_point(), &converged).unwrap().point(0)[0];
    assert!(final_value <= initial_value);
}

#[test]
fn nonscalar_objective_is_rejected() {
    let ctx = Context::new();
    let u = ctx.field("u", [2]);
    let result = Minimize::new("u", &(&u * &u), single_point());
    assert!(matches!(result, Err(SolverError::Configuration(_))));
}

#[test]
fn missing_tolerance_semantics_apply_to_minimize_too() {
    let ctx = Context::new();
    let solver = Minimize::new("u", &quadratic_objective(&ctx), single_point()).unwrap();
    assert!(matches!(solver.solve(f64::NAN), Err(SolverError::Configuration(_))));
    assert!(matches!(solver.solve(0.0), Err(SolverError::Configuration(_))));
}
