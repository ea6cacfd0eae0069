//! End-to-end behaviour of the compiler: interning, address discipline,
//! forward and reverse derivatives, and emission in every language.

use std::sync::Arc;

use symgen::{
    adjoint_of, Backprop, Context, ContextOptions, Deps, Direction, EmittedFunction, Error, Lang,
    NodeId, NodeKind, OpRules, Registry, TypeRegistry, Value,
};

fn types() -> TypeRegistry {
    let mut types = TypeRegistry::new();
    types
        .add_struct("Point", &[("x", "double"), ("y", "double")])
        .unwrap();
    types
}

fn context(name: &str) -> Context {
    Context::new(name, Arc::new(Registry::with_std_ops()), Arc::new(types()))
}

/// `y = x + x*k + x*k + ...` with `terms` nested additions.
fn deep_chain(terms: usize) -> (Context, NodeId) {
    let mut f = context("chain");
    f.declare_args(&[("y", "double")], &[], &[("x", "double"), ("k", "double")])
        .unwrap();
    let (x, k, y) = (f.arg("x").unwrap(), f.arg("k").unwrap(), f.arg("y").unwrap());
    let term = f.mul(x, k).unwrap();
    let mut acc = f.read(x).unwrap();
    for _ in 0..terms {
        acc = f.add(acc, term).unwrap();
    }
    f.write(y, acc).unwrap();
    (f, acc)
}

/// `y = x * x` with one double input.
fn square() -> Context {
    let mut f = context("square");
    f.declare_args(&[("y", "double")], &[], &[("x", "double")])
        .unwrap();
    let (x, y) = (f.arg("x").unwrap(), f.arg("y").unwrap());
    let sq = f.mul(x, x).unwrap();
    f.write(y, sq).unwrap();
    f
}

#[test]
fn structurally_equal_nodes_are_interned() {
    let mut f = context("f");
    f.declare_args(&[], &[], &[("a", "double"), ("b", "double")])
        .unwrap();
    let (a, b) = (f.arg("a").unwrap(), f.arg("b").unwrap());
    let s1 = f.add(a, b).unwrap();
    let n = f.len();
    let s2 = f.add(a, b).unwrap();
    assert_eq!(s1, s2);
    assert_eq!(f.len(), n);
    assert_eq!(f.node(s1).content_key(), f.node(s2).content_key());

    // Same structure, different context: equal keys, distinct ids.
    let mut g = context("g");
    g.declare_args(&[], &[], &[("a", "double"), ("b", "double")])
        .unwrap();
    let (ga, gb) = (g.arg("a").unwrap(), g.arg("b").unwrap());
    let t = g.add(ga, gb).unwrap();
    assert_ne!(s1, t);
    assert_eq!(f.node(s1).content_key(), g.node(t).content_key());
}

#[test]
fn member_of_zero_is_a_typed_zero() {
    let mut f = context("f");
    let point = f.lookup_type("Point").unwrap();
    let z = f.zero(&point);
    let zx = f.member(z, "y").unwrap();
    assert!(f.is_zero(zx));
    assert_eq!(f.ty(zx).name(), "double");
    assert!(f.node(zx).as_constant().is_some());
}

#[test]
fn address_discipline() {
    let mut f = context("f");
    f.declare_args(&[("y", "double")], &[], &[("x", "double")])
        .unwrap();
    let (x, y) = (f.arg("x").unwrap(), f.arg("y").unwrap());
    let e = f.call("exp", x).unwrap();

    assert!(matches!(f.read(e), Err(Error::NotAddress { .. })));
    assert!(matches!(f.write(e, 1.0), Err(Error::NotAddress { .. })));
    assert!(matches!(f.write(x, 1.0), Err(Error::WriteToInput(_))));

    let mut g = context("g");
    g.declare_args(&[("y", "double")], &[], &[]).unwrap();
    let foreign = g.arg("y").unwrap();
    assert!(matches!(f.write(y, foreign), Err(Error::ForeignNode { .. })));
    assert!(matches!(f.arg("nope"), Err(Error::Undeclared(_))));
}

#[test]
fn forward_derivative_of_square() {
    let mut f = square();
    let x = f.arg("x").unwrap();
    let rx = f.read(x).unwrap();
    let sq = f.mul(rx, rx).unwrap();
    let d = f.deriv(x, sq).unwrap();
    assert_eq!(f.fold(d, &[("x", Value::Float(3.0))]).unwrap(), Value::Float(6.0));
}

#[test]
fn adjoint_of_square() {
    let f = square();
    let mut grad = adjoint_of(&f, &[]).unwrap();
    assert_eq!(grad.name(), "squareGrad");

    let layout: Vec<(String, Direction)> = grad
        .args()
        .map(|(name, _, dir)| (name.to_string(), dir))
        .collect();
    assert_eq!(
        layout,
        [
            ("y".to_string(), Direction::Out),
            ("xGrad".to_string(), Direction::Out),
            ("x".to_string(), Direction::In),
            ("yGrad".to_string(), Direction::In),
        ]
    );

    let out = grad
        .fold_writes(&[("x", Value::Float(3.0)), ("yGrad", Value::Float(1.0))])
        .unwrap();
    assert_eq!(out["xGrad"], Value::Float(6.0));
    assert_eq!(out["y"], Value::Float(9.0));
}

#[test]
fn fan_out_contributions_are_summed_once() {
    let mut f = context("f");
    f.declare_args(&[], &[], &[("x", "double"), ("g1", "double"), ("g2", "double")])
        .unwrap();
    let (x, g1, g2) = (f.arg("x").unwrap(), f.arg("g1").unwrap(), f.arg("g2").unwrap());
    let (x, g1, g2) = (f.read(x).unwrap(), f.read(g1).unwrap(), f.read(g2).unwrap());

    let mut bp = Backprop::new();
    bp.push(&f, x, g1).unwrap();
    bp.push(&f, x, g2).unwrap();
    assert_eq!(bp.contributions(x), [g1, g2]);
    let total = bp.total(&mut f, x).unwrap();
    assert_eq!(total, f.add(g1, g2).unwrap());
    assert_eq!(bp.total(&mut f, x).unwrap(), total);
    assert!(bp.is_finalized(x));

    // Pushing after the total is taken fails.
    assert!(matches!(bp.push(&f, x, g1), Err(Error::GradientFinalized { .. })));
}

#[test]
fn fan_out_through_an_adjoint() {
    let mut f = context("f");
    f.declare_args(&[("y", "double")], &[], &[("x", "double")])
        .unwrap();
    let (x, y) = (f.arg("x").unwrap(), f.arg("y").unwrap());
    let sq = f.mul(x, x).unwrap();
    let s = f.call("sin", x).unwrap();
    let sum = f.add(sq, s).unwrap();
    f.write(y, sum).unwrap();

    let mut grad = adjoint_of(&f, &[]).unwrap();
    let at = 0.5;
    let out = grad
        .fold_writes(&[("x", Value::Float(at)), ("yGrad", Value::Float(1.0))])
        .unwrap();
    let expected = 2.0 * at + at.cos();
    assert!((out["xGrad"].as_f64().unwrap() - expected).abs() < 1e-12);
}

#[test]
fn shared_sum_gets_one_temporary_everywhere() {
    let mut f = context("f");
    f.declare_args(&[("y", "double")], &[], &[("a", "double"), ("b", "double")])
        .unwrap();
    let (a, b, y) = (f.arg("a").unwrap(), f.arg("b").unwrap(), f.arg("y").unwrap());
    let s = f.add(a, b).unwrap();
    let p = f.mul(s, s).unwrap();
    f.write(y, p).unwrap();

    let deps = Deps::build(&f);
    assert_eq!(deps.ref_count(s), 2);

    for emitted in f.emit_all().unwrap() {
        let temps: Vec<&String> = emitted
            .body
            .iter()
            .filter(|stmt| stmt.starts_with("const "))
            .collect();
        assert_eq!(temps.len(), 1, "{}: {:?}", emitted.lang, emitted.body);
        assert!(temps[0].ends_with("= (a + b);"));
        assert_eq!(emitted.body.iter().filter(|s| s.contains("(a + b)")).count(), 1);
    }
}

#[test]
fn every_standard_operator_emits_in_every_language() {
    let mut f = context("zoo");
    f.declare_args(
        &[("y", "double"), ("yf", "float"), ("n", "int")],
        &[],
        &[("a", "double"), ("b", "double"), ("h", "float"), ("k", "int")],
    )
    .unwrap();
    let (a, b, h, k) = (
        f.arg("a").unwrap(),
        f.arg("b").unwrap(),
        f.arg("h").unwrap(),
        f.arg("k").unwrap(),
    );
    let unary = [
        "sin", "cos", "tan", "exp", "log", "sqrt", "tanh", "sqr", "cube", "relu", "step", "normangle", "-",
    ];
    let binary = ["+", "-", "*", "/", "atan2", "min", "max", "leaky_relu"];

    for (x, w, out) in [(a, b, "y"), (h, h, "yf")] {
        let mut acc = f.read(x).unwrap();
        for op in unary {
            let t = f.call(op, x).unwrap();
            acc = f.add(acc, t).unwrap();
        }
        for op in binary {
            let t = f.apply(op, &[x.into(), w.into()]).unwrap();
            acc = f.add(acc, t).unwrap();
        }
        let out = f.arg(out).unwrap();
        f.write(out, acc).unwrap();
    }
    let kk = f.mul(k, k).unwrap();
    let nk = f.neg(k).unwrap();
    let isum = f.add(kk, nk).unwrap();
    let isum = f.sub(isum, 1).unwrap();
    let n = f.arg("n").unwrap();
    f.write(n, isum).unwrap();

    for lang in Lang::ALL {
        let emitted = f.emit(lang).unwrap();
        assert!(!emitted.body.is_empty());
    }
    let js = f.emit(Lang::Js).unwrap().source();
    assert!(js.contains("Math.atan2(a, b)"));
    let c = f.emit(Lang::C).unwrap().source();
    assert!(c.contains("sinf(h)"));
    assert!(c.contains("fmin(a, b)"));

    // Every float operator also differentiates in reverse.
    let grad = adjoint_of(&f, &["k"]).unwrap();
    for lang in Lang::ALL {
        grad.emit(lang).unwrap();
    }
}

#[test]
fn missing_gradient_rule_fails_synthesis() {
    let mut reg = Registry::with_std_ops();
    reg.defop(
        "double",
        "lookup",
        &["double"],
        OpRules::new().render_all(|a| format!("lookup({})", a[0])),
    );
    let mut f = Context::new("f", Arc::new(reg), Arc::new(types()));
    f.declare_args(&[("y", "double")], &[], &[("x", "double")])
        .unwrap();
    let (x, y) = (f.arg("x").unwrap(), f.arg("y").unwrap());
    let e = f.call("lookup", x).unwrap();
    f.write(y, e).unwrap();

    // The forward function still emits; only the gradient is missing.
    assert!(f.emit(Lang::C).is_ok());
    assert!(matches!(adjoint_of(&f, &[]), Err(Error::NoGradientRule { op, .. }) if op == "lookup"));
}

#[test]
fn adjoint_emits_struct_gradients() {
    let mut f = context("dist2");
    f.declare_args(&[("d", "double")], &[], &[("p", "Point")])
        .unwrap();
    let (p, d) = (f.arg("p").unwrap(), f.arg("d").unwrap());
    let px = f.member(p, "x").unwrap();
    let py = f.member(p, "y").unwrap();
    let xx = f.mul(px, px).unwrap();
    let yy = f.mul(py, py).unwrap();
    let sum = f.add(xx, yy).unwrap();
    f.write(d, sum).unwrap();

    let mut grad = adjoint_of(&f, &[]).unwrap();
    let pt = Value::Tuple(vec![3.0.into(), 4.0.into()]);
    let out = grad
        .fold_writes(&[("p", pt), ("dGrad", Value::Float(1.0))])
        .unwrap();
    assert_eq!(out["d"], Value::Float(25.0));
    // Only members of p are read, so the gradient lands member by member.
    assert_eq!(out["pGrad.x"], Value::Float(6.0));
    assert_eq!(out["pGrad.y"], Value::Float(8.0));
    assert!(!out.contains_key("pGrad"));

    let cpp = grad.emit(Lang::Cpp).unwrap();
    assert!(cpp.signature.contains("Point &pGrad"));
    assert!(cpp.types.contains(&"Point".to_string()));
}

#[test]
fn writes_keep_their_order() {
    let mut f = context("f");
    f.declare_args(&[("y", "double"), ("z", "double")], &[], &[("x", "double")])
        .unwrap();
    let (x, y, z) = (f.arg("x").unwrap(), f.arg("y").unwrap(), f.arg("z").unwrap());
    f.write(z, x).unwrap();
    let two = f.mul(2.0, x).unwrap();
    f.write(y, two).unwrap();
    let order: Vec<String> = f
        .writes()
        .map(|w| match f.node(w).kind() {
            NodeKind::Write { addr, .. } => f.fmt_node(*addr),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(order, ["z", "y"]);
    assert_eq!(f.emit(Lang::C).unwrap().body, ["*z = x;", "*y = (2.0 * x);"]);
}

#[test]
fn options_and_output_serialize() {
    let opts: ContextOptions = serde_json::from_str(r#"{"grad_suffix": "_d", "temp_prefix": "tmp"}"#).unwrap();
    assert_eq!(opts.grad_suffix, "_d");
    assert_eq!(opts.max_rewrites, ContextOptions::default().max_rewrites);

    let mut f = Context::with_options(
        "sq",
        Arc::new(Registry::with_std_ops()),
        Arc::new(types()),
        opts,
    );
    f.declare_args(&[("y", "double")], &[], &[("x", "double")])
        .unwrap();
    let (x, y) = (f.arg("x").unwrap(), f.arg("y").unwrap());
    let sq = f.mul(x, x).unwrap();
    f.write(y, sq).unwrap();
    let grad = adjoint_of(&f, &[]).unwrap();
    assert_eq!(grad.name(), "sq_d");
    assert!(grad.arg("x_d").is_ok());

    let emitted = grad.emit(Lang::Js).unwrap();
    let json = serde_json::to_string(&emitted).unwrap();
    assert!(json.contains(r#""lang":"js""#));
    let back: EmittedFunction = serde_json::from_str(&json).unwrap();
    assert_eq!(back, emitted);
}

#[test]
fn deep_graphs_run_without_recursion() {
    const TERMS: usize = 20_000;
    let (mut f, acc) = deep_chain(TERMS);
    let x = f.arg("x").unwrap();
    let env = [("x", Value::Float(2.0)), ("k", Value::Float(0.5))];

    let out = f.fold_writes(&env).unwrap();
    assert_eq!(out["y"], Value::Float(2.0 + TERMS as f64));

    let d = f.deriv(x, acc).unwrap();
    assert_eq!(f.fold(d, &env).unwrap(), Value::Float(1.0 + 0.5 * TERMS as f64));

    assert_eq!(f.fmt_node(acc).matches("(x * k)").count(), TERMS);

    // The shared product becomes one temporary, the sum stays inline.
    let c = f.emit(Lang::C).unwrap();
    assert_eq!(c.body.len(), 2);
    assert!(c.body[0].starts_with("const double t") && c.body[0].ends_with(" = (x * k);"));
    assert!(c.body[1].starts_with("*y = "));
    assert_eq!(c.body[1].matches(" + t").count(), TERMS);

    let mut grad = adjoint_of(&f, &[]).unwrap();
    grad.emit(Lang::Js).unwrap();
    let out = grad
        .fold_writes(&[
            ("x", Value::Float(2.0)),
            ("k", Value::Float(0.5)),
            ("yGrad", Value::Float(1.0)),
        ])
        .unwrap();
    assert_eq!(out["xGrad"], Value::Float(1.0 + 0.5 * TERMS as f64));
    assert_eq!(out["kGrad"], Value::Float(2.0 * TERMS as f64));
}

#[test]
fn adjoint_splits_constructed_aggregates() {
    let mut types = types();
    types.add_template("vec2", "vec", &["double"], Some(2)).unwrap();
    let mut f = Context::new("pack", Arc::new(Registry::with_std_ops()), Arc::new(types));
    f.declare_args(
        &[("q", "Point"), ("v", "vec2"), ("h", "float")],
        &[],
        &[("x", "double"), ("z", "double")],
    )
    .unwrap();
    let (x, z) = (f.arg("x").unwrap(), f.arg("z").unwrap());
    let xx = f.mul(x, x).unwrap();
    let point = f.apply("Point", &[xx.into(), z.into()]).unwrap();
    let pair = f.apply("vec2", &[z.into(), xx.into()]).unwrap();
    let narrowed = f.apply("float", &[xx.into()]).unwrap();
    f.write(f.arg("q").unwrap(), point).unwrap();
    f.write(f.arg("v").unwrap(), pair).unwrap();
    f.write(f.arg("h").unwrap(), narrowed).unwrap();

    let mut grad = adjoint_of(&f, &[]).unwrap();
    let out = grad
        .fold_writes(&[
            ("x", Value::Float(3.0)),
            ("z", Value::Float(5.0)),
            ("qGrad", Value::Tuple(vec![1.0.into(), 10.0.into()])),
            ("vGrad", Value::Tuple(vec![100.0.into(), 1000.0.into()])),
            ("hGrad", Value::Float(0.5)),
        ])
        .unwrap();
    // 2x * (qGrad.x + vGrad[1] + hGrad) and qGrad.y + vGrad[0]
    assert_eq!(out["xGrad"], Value::Float(6009.0));
    assert_eq!(out["zGrad"], Value::Float(110.0));
    for lang in Lang::ALL {
        grad.emit(lang).unwrap();
    }
}

#[test]
fn struct_gradients_add_slot_by_slot() {
    let mut f = context("fork");
    f.declare_args(&[("q", "Point"), ("r", "Point")], &[], &[("p", "Point")])
        .unwrap();
    let p = f.arg("p").unwrap();
    f.write(f.arg("q").unwrap(), p).unwrap();
    f.write(f.arg("r").unwrap(), p).unwrap();

    let mut grad = adjoint_of(&f, &[]).unwrap();
    let out = grad
        .fold_writes(&[
            ("p", Value::Tuple(vec![0.0.into(), 0.0.into()])),
            ("qGrad", Value::Tuple(vec![1.0.into(), 2.0.into()])),
            ("rGrad", Value::Tuple(vec![10.0.into(), 20.0.into()])),
        ])
        .unwrap();
    assert_eq!(out["pGrad"], Value::Tuple(vec![11.0.into(), 22.0.into()]));

    let c = grad.emit(Lang::C).unwrap();
    assert!(c
        .body
        .contains(&"*pGrad = (Point){(rGrad.x + qGrad.x), (rGrad.y + qGrad.y)};".to_string()));
}

#[test]
fn member_of_an_operator_result_spreads_its_gradient() {
    let mut reg = Registry::with_std_ops();
    reg.defop(
        "Point",
        "polar",
        &["double"],
        OpRules::new()
            .render_all(|a| format!("polar({})", a[0]))
            .imm(|v| {
                let t = v.first()?.as_f64()?;
                Some(Value::Tuple(vec![t.cos().into(), t.sin().into()]))
            })
            .gradient(|ctx, bp, g, a| {
                // d/dt (cos t, sin t) = (-sin t, cos t)
                let gx = ctx.member(g, "x")?;
                let gy = ctx.member(g, "y")?;
                let s = ctx.call("sin", a[0])?;
                let c = ctx.call("cos", a[0])?;
                let along_x = ctx.mul(gx, s)?;
                let along_y = ctx.mul(gy, c)?;
                let dt = ctx.sub(along_y, along_x)?;
                bp.push(ctx, a[0], dt)
            }),
    );
    let mut f = Context::new("f", Arc::new(reg), Arc::new(types()));
    f.declare_args(&[("y", "double")], &[], &[("t", "double")])
        .unwrap();
    let (t, y) = (f.arg("t").unwrap(), f.arg("y").unwrap());
    let unit = f.call("polar", t).unwrap();
    let ux = f.member(unit, "x").unwrap();
    f.write(y, ux).unwrap();

    let mut grad = adjoint_of(&f, &[]).unwrap();
    let at = 0.5;
    let out = grad
        .fold_writes(&[("t", Value::Float(at)), ("yGrad", Value::Float(2.0))])
        .unwrap();
    assert_eq!(out["y"], Value::Float(at.cos()));
    let expected = -2.0 * at.sin();
    assert!((out["tGrad"].as_f64().unwrap() - expected).abs() < 1e-12);
}
