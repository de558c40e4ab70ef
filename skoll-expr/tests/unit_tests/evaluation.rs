use skoll_expr::{
    evaluate, integrate, Assignment, Context, EvalConfig, EvalError, Evaluator, Expr, PointSet,
    Shape, Tensor,
};

#[test]
fn broadcasting_aligns_trailing_axes() {
    let ctx = Context::new();
    let a = ctx.field("a", [2, 3]);
    let b = ctx.field("b", [3]);
    let sum = &a + &b;
    assert_eq!(sum.shape(), Shape::from([2, 3]));

    let mut args = Assignment::new();
    args.set("a", Tensor::new([2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    args.set("b", Tensor::new([3], vec![10.0, 20.0, 30.0]));
    let points = PointSet::new(1, vec![0.0], vec![1.0]);
    let value = evaluate(&sum, &points, &args).unwrap();
    assert_eq!(value.point(0), &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
}

#[test]
fn unbound_argument_is_an_error_not_a_zero() {
    let ctx = Context::new();
    let u = ctx.field("u", [2]);
    let f = u.dot(&u, 0);
    let points = PointSet::new(1, vec![0.0], vec![1.0]);
    let err = evaluate(&f, &points, &Assignment::new()).unwrap_err();
    match err {
        EvalError::UnboundArgument { name } => assert_eq!(name, "u"),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn bound_argument_with_wrong_shape_is_rejected() {
    let ctx = Context::new();
    let u = ctx.field("u", [3]);
    let mut args = Assignment::new();
    args.set("u", Tensor::new([2], vec![1.0, 2.0]));
    let points = PointSet::new(1, vec![0.0], vec![1.0]);
    let err = evaluate(&u, &points, &args).unwrap_err();
    assert!(matches!(err, EvalError::ArgumentShape { .. }));
}

#[test]
fn points_leaf_exposes_coordinates_per_point() {
    let ctx = Context::new();
    let x = ctx.points(2);
    let points = PointSet::new(2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![1.0; 3]);
    let value = evaluate(&x, &points, &Assignment::new()).unwrap();
    assert_eq!(value.npoints(), 3);
    assert_eq!(value.point(1), &[3.0, 4.0]);
}

#[test]
fn point_set_dimension_mismatch_is_rejected() {
    let ctx = Context::new();
    let x = ctx.points(3);
    let points = PointSet::new(2, vec![0.0, 0.0], vec![1.0]);
    let err = evaluate(&x, &points, &Assignment::new()).unwrap_err();
    assert!(matches!(err, EvalError::PointsDimension { .. }));
}

#[test]
fn integrate_contracts_quadrature_weights() {
    let ctx = Context::new();
    let x = ctx.points(1);
    // int_0^1 x dx = 1/2; the midpoint rule is exact for linear integrands.
    let value = integrate(&x.get(0, 0), &PointSet::uniform_1d(64, 0.0, 1.0), &Assignment::new())
        .unwrap();
    assert!((value.as_scalar() - 0.5).abs() < 1e-12);
}

#[test]
fn integrate_preserves_tensor_shape() {
    let ctx = Context::new();
    let x = ctx.points(1);
    let integrand = Expr::concat(
        &[x.get(0, 0).reshape([1]), x.get(0, 0).power(2.0).reshape([1])],
        0,
    );
    let value = integrate(&integrand, &PointSet::uniform_1d(200, 0.0, 1.0), &Assignment::new())
        .unwrap();
    assert_eq!(value.shape(), &Shape::from([2]));
    assert!((value.data()[0] - 0.5).abs() < 1e-10);
    // Midpoint rule has O(h^2) error on x^2.
    assert!((value.data()[1] - 1.0 / 3.0).abs() < 1e-5);
}

#[test]
fn choose_selects_per_component() {
    let ctx = Context::new();
    let x = ctx.points(1);
    let t = x.get(0, 0);
    // |x| via choose(x < 0, -x, x)
    let abs = t.less(&ctx.scalar(0.0)).choose(&-&t, &t);
    let points = PointSet::new(1, vec![-2.0, 3.0], vec![1.0, 1.0]);
    let value = evaluate(&abs, &points, &Assignment::new()).unwrap();
    assert_eq!(value.point(0), &[2.0]);
    assert_eq!(value.point(1), &[3.0]);
}

#[test]
fn parallel_evaluation_matches_serial() {
    let ctx = Context::new();
    let x = ctx.points(1);
    let u = ctx.field("u", [4]);
    let f = (u.dot(&u, 0) * x.get(0, 0)).sin() + x.get(0, 0).exp();

    let mut args = Assignment::new();
    args.set("u", Tensor::new([4], vec![0.1, -0.2, 0.3, -0.4]));
    let points = PointSet::uniform_1d(257, -1.0, 1.0);

    let serial = Evaluator::serial().evaluate(&f, &points, &args).unwrap();
    let config = EvalConfig {
        parallelism: Some(4),
    };
    let parallel = Evaluator::new(&config)
        .unwrap()
        .evaluate(&f, &points, &args)
        .unwrap();
    assert_eq!(serial.data(), parallel.data());
}

#[test]
fn reevaluation_with_updated_assignment_sees_new_values() {
    let ctx = Context::new();
    let u = ctx.field("u", []);
    let f = &u * &u;
    let points = PointSet::new(1, vec![0.0], vec![1.0]);

    let mut args = Assignment::new();
    args.set("u", Tensor::scalar(2.0));
    assert_eq!(evaluate(&f, &points, &args).unwrap().point(0), &[4.0]);

    args.set("u", Tensor::scalar(5.0));
    assert_eq!(evaluate(&f, &points, &args).unwrap().point(0), &[25.0]);
}
