use skoll::expr::{Assignment, Context, Expr, PointSet, Tensor};
use skoll::{
    FullStep, Newton, NormBased, SolveInfo, SolverConfig, SolverError, SolverStatus, Solution,
};

fn single_point() -> PointSet {
    PointSet::new(1, vec![0.0], vec![1.0])
}

/// A linear 2x2 system: 2 u0 + u1 = 3, u0 + 3 u1 = 5, solution (0.8, 1.4).
fn linear_residual(ctx: &Context) -> Expr {
    let u = ctx.field("u", [2]);
    let r0 = 2.0 * u.get(0, 0) + u.get(0, 1) - 3.0;
    let r1 = u.get(0, 0) + 3.0 * u.get(0, 1) - 5.0;
    Expr::concat(&[r0.reshape([1]), r1.reshape([1])], 0)
}

/// A nonlinear 2x2 system: u0^2 + u1 = 3, u0 + u1 = 3, with a simple root
/// at (1, 2) where the Jacobian [[2, 1], [1, 1]] is well conditioned, so
/// the parameter error tracks the residual tolerance.
fn nonlinear_residual(ctx: &Context) -> Expr {
    let u = ctx.field("u", [2]);
    let r0 = u.get(0, 0).power(2.0) + u.get(0, 1) - 3.0;
    let r1 = u.get(0, 0) + u.get(0, 1) - 3.0;
    Expr::concat(&[r0.reshape([1]), r1.reshape([1])], 0)
}

fn initial(values: Vec<f64>) -> Assignment {
    let mut args = Assignment::new();
    args.set("u", Tensor::from_vec(values));
    args
}

#[test]
fn linear_system_converges_in_one_iteration() {
    let ctx = Context::new();
    let solver = Newton::new("u", &[linear_residual(&ctx)], single_point()).unwrap();
    let (solution, info) = solver.solve_withinfo(1e-10).unwrap();

    assert_eq!(info.status, SolverStatus::Converged);
    assert_eq!(info.niter, 1);
    let u = solution.as_bare().unwrap();
    assert!((u.data()[0] - 0.8).abs() < 1e-12);
    assert!((u.data()[1] - 1.4).abs() < 1e-12);
}

#[test]
fn nonlinear_system_converges_from_a_nearby_start() {
    let ctx = Context::new();
    let solver = Newton::new("u", &[nonlinear_residual(&ctx)], single_point())
        .unwrap()
        .with_initial(initial(vec![1.5, 1.5]))
        .with_maxiter(50);
    let (solution, info) = solver.solve_withinfo(1e-12).unwrap();

    assert_eq!(info.status, SolverStatus::Converged);
    assert!(info.niter <= 50);
    let u = solution.as_bare().unwrap();
    assert!((u.data()[0] - 1.0).abs() < 1e-8);
    assert!((u.data()[1] - 2.0).abs() < 1e-8);
}

#[test]
fn iteration_count_never_exceeds_maxiter() {
    let ctx = Context::new();
    let solver = Newton::new("u", &[nonlinear_residual(&ctx)], single_point())
        .unwrap()
        .with_initial(initial(vec![10.0, 10.0]))
        .with_maxiter(3);
    match solver.solve_withinfo(1e-14) {
        Err(SolverError::Failed { info, assignment }) => {
            assert_eq!(info.status, SolverStatus::MaxiterExceeded);
            assert_eq!(info.niter, 3);
            // The partial state of the iteration is preserved.
            assert!(assignment.get("u").is_some());
        }
        other => panic!("expected maxiter failure, got {:?}", other.map(|(_, info)| info)),
    }
}

#[test]
fn invalid_tolerance_is_a_configuration_error() {
    let ctx = Context::new();
    let residual = linear_residual(&ctx);
    let solver = Newton::new("u", &[residual], single_point()).unwrap();
    for tol in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        match solver.solve(tol) {
            Err(SolverError::Configuration(_)) => {}
            other => panic!("tol {} should be rejected, got {:?}", tol, other.is_ok()),
        }
    }
}

#[test]
fn bare_target_returns_a_bare_array() {
    let ctx = Context::new();
    let u = ctx.field("u", []);
    let solver = Newton::new("u", &[2.0 * &u - 4.0], single_point()).unwrap();
    let solution = solver.solve(1e-10).unwrap();
    assert!(matches!(solution, Solution::Bare(_)));
    assert!((solution.as_bare().unwrap().as_scalar() - 2.0).abs() < 1e-12);
}

#[test]
fn trailing_comma_target_returns_a_one_tuple() {
    let ctx = Context::new();
    let u = ctx.field("u", []);
    let solver = Newton::new("u,", &[2.0 * &u - 4.0], single_point()).unwrap();
    let solution = solver.solve(1e-10).unwrap();
    let values = solution.as_tuple().unwrap();
    assert_eq!(values.len(), 1);
    assert!((values[0].as_scalar() - 2.0).abs() < 1e-12);
}

#[test]
fn comma_list_target_returns_a_tuple() {
    let ctx = Context::new();
    let u = ctx.field("u", []);
    let v = ctx.field("v", []);
    let residuals = [2.0 * &u - 4.0, 3.0 * &v - 6.0];
    let solver = Newton::new("u,v", &residuals, single_point()).unwrap();
    let solution = solver.solve(1e-10).unwrap();
    let values = solution.as_tuple().unwrap();
    assert_eq!(values.len(), 2);
    assert!((values[0].as_scalar() - 2.0).abs() < 1e-12);
    assert!((values[1].as_scalar() - 2.0).abs() < 1e-12);
}

#[test]
fn colon_target_returns_a_named_mapping() {
    let ctx = Context::new();
    let u = ctx.field("u", []);
    let v = ctx.field("v", []);
    // The integrand v (u^2 - 4) differentiates against v into u^2 - 4.
    let integrand = &v * &(u.power(2.0) - 4.0);
    let solver = Newton::functional("u:v", &integrand, single_point())
        .unwrap()
        .with_initial({
            let mut args = Assignment::new();
            args.set("u", Tensor::scalar(3.0));
            args
        })
        .with_maxiter(30);
    let solution = solver.solve(1e-10).unwrap();
    assert!(matches!(solution, Solution::Named(_)));
    assert!((solution.get("u").unwrap().as_scalar() - 2.0).abs() < 1e-8);
}

#[test]
fn disabled_linesearch_matches_the_full_step_strategy() {
    let ctx = Context::new();
    let residual = nonlinear_residual(&ctx);
    let start = initial(vec![1.5, 1.5]);

    let without = Newton::new("u", &[residual.clone()], single_point())
        .unwrap()
        .with_initial(start.clone())
        .with_maxiter(50);
    let with_full_step = Newton::new("u", &[residual], single_point())
        .unwrap()
        .with_initial(start)
        .with_maxiter(50)
        .with_linesearch(Some(Box::new(FullStep)));

    let (a, info_a) = without.solve_withinfo(1e-12).unwrap();
    let (b, info_b) = with_full_step.solve_withinfo(1e-12).unwrap();
    assert_eq!(info_a.niter, info_b.niter);
    assert_eq!(a.as_bare().unwrap().data(), b.as_bare().unwrap().data());
}

#[test]
fn norm_based_linesearch_still_converges_on_a_well_behaved_system() {
    let ctx = Context::new();
    let solver = Newton::new("u", &[nonlinear_residual(&ctx)], single_point())
        .unwrap()
        .with_initial(initial(vec![1.5, 1.5]))
        .with_maxiter(50)
        .with_linesearch(Some(Box::new(NormBased::default())));
    let (solution, info) = solver.solve_withinfo(1e-10).unwrap();
    assert_eq!(info.status, SolverStatus::Converged);
    let u = solution.as_bare().unwrap();
    assert!((u.data()[0] - 1.0).abs() < 1e-6);
    assert!((u.data()[1] - 2.0).abs() < 1e-6);
}

#[test]
fn stalling_residual_norm_is_reported_as_divergence() {
    let ctx = Context::new();
    let u = ctx.field("u", []);
    // |r| = sqrt(1 + u^2) >= 1 everywhere; from u = 1 the iteration jumps
    // between 1 and -1 with constant norm sqrt(2).
    let residual = (&u * &u + 1.0).power(0.5);
    let solver = Newton::new("u", &[residual], single_point())
        .unwrap()
        .with_initial({
            let mut args = Assignment::new();
            args.set("u", Tensor::scalar(1.0));
            args
        });
    match solver.solve_withinfo(1e-10) {
        Err(SolverError::Failed { info, .. }) => {
            assert_eq!(info.status, SolverStatus::Diverged);
            assert_eq!(info.niter, 5);
        }
        other => panic!("expected divergence, got {:?}", other.map(|(_, info)| info)),
    }
}

#[test]
fn abort_is_honored_before_the_first_iteration() {
    let ctx = Context::new();
    let solver = Newton::new("u", &[nonlinear_residual(&ctx)], single_point())
        .unwrap()
        .with_initial(initial(vec![1.5, 1.5]));
    let handle = solver.abort_handle();
    handle.abort();
    match solver.solve_withinfo(1e-12) {
        Err(SolverError::Failed { info, assignment }) => {
            assert_eq!(info.status, SolverStatus::Aborted);
            assert_eq!(info.niter, 0);
            assert_eq!(assignment.get("u").unwrap().data(), &[1.5, 1.5]);
        }
        other => panic!("expected abort, got {:?}", other.map(|(_, info)| info)),
    }
}

#[test]
fn mismatched_target_and_residual_counts_are_rejected() {
    let ctx = Context::new();
    ctx.field("v", []);
    let result = Newton::new("u,v", &[linear_residual(&ctx)], single_point());
    assert!(matches!(result, Err(SolverError::Configuration(_))));
}

#[test]
fn unknown_target_argument_is_rejected() {
    let ctx = Context::new();
    let residual = linear_residual(&ctx);
    let result = Newton::new("w", &[residual], single_point());
    assert!(matches!(result, Err(SolverError::Configuration(_))));
}

#[test]
fn parallel_evaluation_config_does_not_change_the_result() {
    let ctx = Context::new();
    let x = ctx.points(1);
    let u = ctx.field("u", []);
    // int_0^1 (u - x) dx = u - 1/2
    let residual = &u - &x.get(0, 0);
    let points = PointSet::uniform_1d(512, 0.0, 1.0);

    let serial = Newton::new("u", &[residual.clone()], points.clone()).unwrap();
    let config = SolverConfig {
        eval: skoll::expr::EvalConfig { parallelism: Some(4) },
        ..SolverConfig::default()
    };
    let parallel = Newton::new("u", &[residual], points)
        .unwrap()
        .with_config(config);

    let a = serial.solve(1e-12).unwrap();
    let b = parallel.solve(1e-12).unwrap();
    assert!((a.as_bare().unwrap().as_scalar() - 0.5).abs() < 1e-10);
    assert_eq!(a.as_bare().unwrap().data(), b.as_bare().unwrap().data());
}

#[test]
fn solve_info_roundtrips_through_json() {
    let info = SolveInfo {
        niter: 7,
        resnorm: 3.5e-11,
        status: SolverStatus::Converged,
    };
    let json = serde_json::to_string(&info).unwrap();
    let back: SolveInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(info, back);
}
