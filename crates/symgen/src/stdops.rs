//! The standard scalar operator library and arithmetic shorthands.
//!
//! `double` and `float` get the arithmetic operators plus the usual
//! elementary functions and rectifiers, each with renders for every
//! language, constant folding, forward and reverse calculus, and algebraic
//! identities.
//! `int` gets arithmetic only; integer expressions carry no gradient.

use symgen_types::{Lang, Value};

use crate::context::{Context, Operand};
use crate::error::Result;
use crate::node::{ExprOp, NodeId, NodeKind};
use crate::registry::{OpRules, Registry};

impl Registry {
    /// A registry holding the standard operators.
    pub fn with_std_ops() -> Self {
        let mut reg = Self::new();
        register_std_ops(&mut reg);
        reg
    }
}

/// Add the standard operators to `reg`.
pub fn register_std_ops(reg: &mut Registry) {
    register_float(reg, DOUBLE);
    register_float(reg, FLOAT);
    register_int(reg);
}

impl Context {
    pub fn add(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> Result<NodeId> {
        self.apply("+", &[a.into(), b.into()])
    }

    pub fn sub(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> Result<NodeId> {
        self.apply("-", &[a.into(), b.into()])
    }

    pub fn mul(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> Result<NodeId> {
        self.apply("*", &[a.into(), b.into()])
    }

    pub fn div(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> Result<NodeId> {
        self.apply("/", &[a.into(), b.into()])
    }

    pub fn neg(&mut self, a: impl Into<Operand>) -> Result<NodeId> {
        self.apply("-", &[a.into()])
    }

    /// Apply a one-argument operator.
    pub fn call(&mut self, op: &str, a: impl Into<Operand>) -> Result<NodeId> {
        self.apply(op, &[a.into()])
    }
}

#[derive(Clone, Copy)]
struct Flavor {
    ty: &'static str,
    /// C math-library suffix (`sinf`).
    c_fn: &'static str,
    /// C and C++ literal suffix.
    lit: &'static str,
    round: fn(f64) -> f64,
}

const DOUBLE: Flavor = Flavor {
    ty: "double",
    c_fn: "",
    lit: "",
    round: keep,
};

const FLOAT: Flavor = Flavor {
    ty: "float",
    c_fn: "f",
    lit: "f",
    round: to_f32,
};

fn keep(v: f64) -> f64 {
    v
}

fn to_f32(v: f64) -> f64 {
    v as f32 as f64
}

/// `f'(a)` for a one-argument function.
type Local = fn(&mut Context, NodeId) -> Result<NodeId>;
/// `(∂f/∂a, ∂f/∂b)` for a two-argument function.
type Partials = fn(&mut Context, NodeId, NodeId) -> Result<(NodeId, NodeId)>;

fn register_float(reg: &mut Registry, fl: Flavor) {
    let t = fl.ty;
    let round = fl.round;
    let bin = [t, t];
    let un = [t];

    reg.defop(
        t,
        "+",
        &bin,
        infix("+")
            .imm(imm2(round, |a, b| a + b))
            .replace(replace_add)
            .is_zero(both_zero)
            .deriv(|ctx, wrt, a| {
                let da = ctx.deriv(wrt, a[0])?;
                let db = ctx.deriv(wrt, a[1])?;
                ctx.add(da, db)
            })
            .gradient(|ctx, bp, g, a| {
                bp.push(ctx, a[0], g)?;
                bp.push(ctx, a[1], g)
            }),
    );
    reg.defop(
        t,
        "-",
        &bin,
        infix("-")
            .imm(imm2(round, |a, b| a - b))
            .replace(replace_sub)
            .deriv(|ctx, wrt, a| {
                let da = ctx.deriv(wrt, a[0])?;
                let db = ctx.deriv(wrt, a[1])?;
                ctx.sub(da, db)
            })
            .gradient(|ctx, bp, g, a| {
                bp.push(ctx, a[0], g)?;
                let ng = ctx.neg(g)?;
                bp.push(ctx, a[1], ng)
            }),
    );
    reg.defop(
        t,
        "-",
        &un,
        OpRules::new()
            .render_all(|a| format!("(-{})", a[0]))
            .imm(imm1(round, |a| -a))
            .replace(replace_neg)
            .is_zero(|ctx, a| const_zero(ctx, a[0]))
            .deriv(|ctx, wrt, a| {
                let da = ctx.deriv(wrt, a[0])?;
                ctx.neg(da)
            })
            .gradient(|ctx, bp, g, a| {
                let ng = ctx.neg(g)?;
                bp.push(ctx, a[0], ng)
            }),
    );
    reg.defop(
        t,
        "*",
        &bin,
        infix("*")
            .imm(imm2(round, |a, b| a * b))
            .replace(replace_mul)
            .is_zero(either_zero)
            .is_one(both_one)
            .deriv(|ctx, wrt, a| {
                // d(a * b) = da*b + a*db
                let da = ctx.deriv(wrt, a[0])?;
                let db = ctx.deriv(wrt, a[1])?;
                let t1 = ctx.mul(da, a[1])?;
                let t2 = ctx.mul(a[0], db)?;
                ctx.add(t1, t2)
            })
            .gradient(|ctx, bp, g, a| {
                let ga = ctx.mul(g, a[1])?;
                bp.push(ctx, a[0], ga)?;
                let gb = ctx.mul(g, a[0])?;
                bp.push(ctx, a[1], gb)
            }),
    );
    reg.defop(
        t,
        "/",
        &bin,
        infix("/")
            .imm(imm2(round, |a, b| a / b))
            .replace(replace_div)
            .is_zero(|ctx, a| const_zero(ctx, a[0]))
            .deriv(|ctx, wrt, a| {
                // d(a / b) = da/b - a*db/(b*b)
                let da = ctx.deriv(wrt, a[0])?;
                let db = ctx.deriv(wrt, a[1])?;
                let t1 = ctx.div(da, a[1])?;
                let num = ctx.mul(a[0], db)?;
                let bb = ctx.mul(a[1], a[1])?;
                let t2 = ctx.div(num, bb)?;
                ctx.sub(t1, t2)
            })
            .gradient(|ctx, bp, g, a| {
                let ga = ctx.div(g, a[1])?;
                bp.push(ctx, a[0], ga)?;
                let num = ctx.mul(g, a[0])?;
                let bb = ctx.mul(a[1], a[1])?;
                let q = ctx.div(num, bb)?;
                let gb = ctx.neg(q)?;
                bp.push(ctx, a[1], gb)
            }),
    );

    let elementary: [(&'static str, &'static str, fn(f64) -> f64, Local); 7] = [
        ("sin", "sin", f64::sin, |ctx, a| ctx.call("cos", a)),
        ("cos", "cos", f64::cos, |ctx, a| {
            let s = ctx.call("sin", a)?;
            ctx.neg(s)
        }),
        ("tan", "tan", f64::tan, |ctx, a| {
            let c = ctx.call("cos", a)?;
            let c2 = ctx.call("sqr", c)?;
            ctx.div(1.0, c2)
        }),
        ("exp", "exp", f64::exp, |ctx, a| ctx.call("exp", a)),
        ("log", "log", f64::ln, |ctx, a| ctx.div(1.0, a)),
        ("sqrt", "sqrt", f64::sqrt, |ctx, a| {
            let s = ctx.call("sqrt", a)?;
            ctx.div(0.5, s)
        }),
        ("tanh", "tanh", f64::tanh, |ctx, a| {
            let th = ctx.call("tanh", a)?;
            let th2 = ctx.call("sqr", th)?;
            ctx.sub(1.0, th2)
        }),
    ];
    for (name, js, f, local) in elementary {
        let rules = math_call(fl, name, js).imm(imm1(round, f));
        reg.defop(t, name, &un, unary_calculus(rules, local));
    }

    reg.defop(
        t,
        "sqr",
        &un,
        unary_calculus(
            OpRules::new()
                .render_all(|a| format!("({0} * {0})", a[0]))
                .imm(imm1(round, |x| x * x)),
            |ctx, a| ctx.mul(2.0, a),
        ),
    );
    reg.defop(
        t,
        "cube",
        &un,
        unary_calculus(
            OpRules::new()
                .render_all(|a| format!("({0} * {0} * {0})", a[0]))
                .imm(imm1(round, |x| x * x * x)),
            |ctx, a| {
                let a2 = ctx.call("sqr", a)?;
                ctx.mul(3.0, a2)
            },
        ),
    );

    let lit = fl.lit;
    reg.defop(
        t,
        "relu",
        &un,
        unary_calculus(
            OpRules::new()
                .render(Lang::C, move |a| format!("({0} > 0.0{lit} ? {0} : 0.0{lit})", a[0]))
                .render(Lang::Cpp, move |a| format!("({0} > 0.0{lit} ? {0} : 0.0{lit})", a[0]))
                .render(Lang::Js, |a| format!("Math.max({}, 0)", a[0]))
                .imm(imm1(round, |x| if x > 0.0 { x } else { 0.0 })),
            |ctx, a| ctx.call("step", a),
        ),
    );
    reg.defop(
        t,
        "leaky_relu",
        &bin,
        binary_calculus(
            OpRules::new()
                .render(Lang::C, move |a| format!("({0} > 0.0{lit} ? {0} : {1} * {0})", a[0], a[1]))
                .render(Lang::Cpp, move |a| format!("({0} > 0.0{lit} ? {0} : {1} * {0})", a[0], a[1]))
                .render(Lang::Js, |a| format!("({0} > 0 ? {0} : {1} * {0})", a[0], a[1]))
                .imm(imm2(round, |x, slope| if x > 0.0 { x } else { slope * x })),
            |ctx, x, slope| {
                let on = ctx.call("step", x)?;
                let off = ctx.sub(1.0, on)?;
                let leak = ctx.mul(off, slope)?;
                let px = ctx.add(on, leak)?;
                let pslope = ctx.mul(off, x)?;
                Ok((px, pslope))
            },
        ),
    );
    reg.defop(
        t,
        "step",
        &un,
        no_calculus(
            OpRules::new()
                .render(Lang::C, move |a| format!("({} > 0.0{lit} ? 1.0{lit} : 0.0{lit})", a[0]))
                .render(Lang::Cpp, move |a| format!("({} > 0.0{lit} ? 1.0{lit} : 0.0{lit})", a[0]))
                .render(Lang::Js, |a| format!("({} > 0 ? 1 : 0)", a[0]))
                .imm(imm1(round, |x| if x > 0.0 { 1.0 } else { 0.0 })),
        ),
    );
    let fmod = format!("fmod{}", fl.c_fn);
    reg.defop(
        t,
        "normangle",
        &un,
        unary_calculus(
            OpRules::new()
                .render(Lang::C, move |a| format!("({fmod}({} + M_PI, 2.0 * M_PI) - M_PI)", a[0]))
                .render(Lang::Cpp, |a| format!("(std::fmod({} + M_PI, 2.0 * M_PI) - M_PI)", a[0]))
                .render(Lang::Js, |a| format!("(({} + Math.PI) % (2 * Math.PI) - Math.PI)", a[0]))
                .imm(imm1(round, |x| (x + std::f64::consts::PI) % std::f64::consts::TAU - std::f64::consts::PI)),
            |ctx, a| {
                let ty = ctx.ty(a);
                ctx.one(&ty)
            },
        ),
    );

    let binary: [(&'static str, &'static str, &'static str, fn(f64, f64) -> f64, Partials); 3] = [
        ("atan2", "atan2", "atan2", f64::atan2, |ctx, y, x| {
            let xx = ctx.mul(x, x)?;
            let yy = ctx.mul(y, y)?;
            let r = ctx.add(xx, yy)?;
            let py = ctx.div(x, r)?;
            let q = ctx.div(y, r)?;
            let px = ctx.neg(q)?;
            Ok((py, px))
        }),
        ("min", "fmin", "min", f64::min, |ctx, a, b| {
            let d = ctx.sub(b, a)?;
            let pa = ctx.call("step", d)?;
            let pb = ctx.sub(1.0, pa)?;
            Ok((pa, pb))
        }),
        ("max", "fmax", "max", f64::max, |ctx, a, b| {
            let d = ctx.sub(a, b)?;
            let pa = ctx.call("step", d)?;
            let pb = ctx.sub(1.0, pa)?;
            Ok((pa, pb))
        }),
    ];
    for (name, c, js, f, partials) in binary {
        let rules = math_call(fl, c, js).imm(imm2(round, f));
        reg.defop(t, name, &bin, binary_calculus(rules, partials));
    }
}

fn register_int(reg: &mut Registry) {
    let bin = ["int", "int"];
    reg.defop(
        "int",
        "+",
        &bin,
        no_calculus(
            infix("+")
                .imm(int_imm2(i64::wrapping_add))
                .replace(replace_add)
                .is_zero(both_zero),
        ),
    );
    reg.defop(
        "int",
        "-",
        &bin,
        no_calculus(infix("-").imm(int_imm2(i64::wrapping_sub)).replace(replace_sub)),
    );
    reg.defop(
        "int",
        "-",
        &["int"],
        no_calculus(
            OpRules::new()
                .render_all(|a| format!("(-{})", a[0]))
                .imm(|v| Some(Value::Int(v.first()?.as_i64()?.wrapping_neg())))
                .replace(replace_neg),
        ),
    );
    reg.defop(
        "int",
        "*",
        &bin,
        no_calculus(
            infix("*")
                .imm(int_imm2(i64::wrapping_mul))
                .replace(replace_mul)
                .is_zero(either_zero)
                .is_one(both_one),
        ),
    );
}

// --- rule builders ---------------------------------------------------------

fn infix(op: &'static str) -> OpRules {
    OpRules::new().render_all(move |a| format!("({} {op} {})", a[0], a[1]))
}

fn math_call(fl: Flavor, c: &'static str, js: &'static str) -> OpRules {
    let c_name = format!("{c}{}", fl.c_fn);
    OpRules::new()
        .render(Lang::C, move |a| format!("{c_name}({})", a.join(", ")))
        .render(Lang::Cpp, move |a| format!("std::{c}({})", a.join(", ")))
        .render(Lang::Js, move |a| format!("Math.{js}({})", a.join(", ")))
}

fn imm1(round: fn(f64) -> f64, f: fn(f64) -> f64) -> impl Fn(&[Value]) -> Option<Value> + Send + Sync + 'static {
    move |v: &[Value]| Some(Value::Float(round(f(v.first()?.as_f64()?))))
}

fn imm2(
    round: fn(f64) -> f64,
    f: fn(f64, f64) -> f64,
) -> impl Fn(&[Value]) -> Option<Value> + Send + Sync + 'static {
    move |v: &[Value]| {
        let [a, b] = v else {
            return None;
        };
        Some(Value::Float(round(f(a.as_f64()?, b.as_f64()?))))
    }
}

fn int_imm2(f: fn(i64, i64) -> i64) -> impl Fn(&[Value]) -> Option<Value> + Send + Sync + 'static {
    move |v: &[Value]| {
        let [a, b] = v else {
            return None;
        };
        Some(Value::Int(f(a.as_i64()?, b.as_i64()?)))
    }
}

/// Chain rule for `f(a)` given `f'`.
fn unary_calculus(rules: OpRules, local: Local) -> OpRules {
    rules
        .deriv(move |ctx, wrt, a| {
            let da = ctx.deriv(wrt, a[0])?;
            if ctx.is_zero(da) {
                return Ok(da);
            }
            let fa = local(ctx, a[0])?;
            ctx.mul(fa, da)
        })
        .gradient(move |ctx, bp, g, a| {
            let fa = local(ctx, a[0])?;
            let ga = ctx.mul(g, fa)?;
            bp.push(ctx, a[0], ga)
        })
}

/// Chain rule for `f(a, b)` given both partials.
fn binary_calculus(rules: OpRules, partials: Partials) -> OpRules {
    rules
        .deriv(move |ctx, wrt, a| {
            let da = ctx.deriv(wrt, a[0])?;
            let db = ctx.deriv(wrt, a[1])?;
            let (pa, pb) = partials(ctx, a[0], a[1])?;
            let ta = ctx.mul(pa, da)?;
            let tb = ctx.mul(pb, db)?;
            ctx.add(ta, tb)
        })
        .gradient(move |ctx, bp, g, a| {
            let (pa, pb) = partials(ctx, a[0], a[1])?;
            let ga = ctx.mul(g, pa)?;
            bp.push(ctx, a[0], ga)?;
            let gb = ctx.mul(g, pb)?;
            bp.push(ctx, a[1], gb)
        })
}

/// Piecewise-constant or integer operators: zero derivative, no gradient.
fn no_calculus(rules: OpRules) -> OpRules {
    rules
        .deriv(|ctx, _wrt, a| {
            let ty = ctx.ty(a[0]);
            Ok(ctx.zero(&ty))
        })
        .gradient(|_ctx, _bp, _g, _a| Ok(()))
}

// --- identities ------------------------------------------------------------

// Zero and unit operands are rewritten away on construction, so the
// identities only ever need to inspect constants.

fn const_zero(ctx: &Context, id: NodeId) -> bool {
    ctx.node(id).as_constant().is_some_and(Value::is_zero)
}

fn const_one(ctx: &Context, id: NodeId) -> bool {
    ctx.node(id).as_constant().is_some_and(Value::is_one)
}

fn both_zero(ctx: &Context, a: &[NodeId]) -> bool {
    const_zero(ctx, a[0]) && const_zero(ctx, a[1])
}

fn either_zero(ctx: &Context, a: &[NodeId]) -> bool {
    const_zero(ctx, a[0]) || const_zero(ctx, a[1])
}

fn both_one(ctx: &Context, a: &[NodeId]) -> bool {
    const_one(ctx, a[0]) && const_one(ctx, a[1])
}

fn zero_like(ctx: &mut Context, a: NodeId) -> NodeId {
    let ty = ctx.ty(a);
    ctx.zero(&ty)
}

/// `x + 0`, `0 + x`
fn replace_add(ctx: &mut Context, a: &[NodeId]) -> Result<Option<NodeId>> {
    if const_zero(ctx, a[1]) {
        return Ok(Some(a[0]));
    }
    if const_zero(ctx, a[0]) {
        return Ok(Some(a[1]));
    }
    Ok(None)
}

/// `x - 0`, `0 - x`, `x - x`
fn replace_sub(ctx: &mut Context, a: &[NodeId]) -> Result<Option<NodeId>> {
    if const_zero(ctx, a[1]) {
        return Ok(Some(a[0]));
    }
    if const_zero(ctx, a[0]) {
        return ctx.neg(a[1]).map(Some);
    }
    if a[0] == a[1] {
        return Ok(Some(zero_like(ctx, a[0])));
    }
    Ok(None)
}

/// `--x`
fn replace_neg(ctx: &mut Context, a: &[NodeId]) -> Result<Option<NodeId>> {
    Ok(match ctx.node(a[0]).kind() {
        NodeKind::Expr {
            op: ExprOp::Op { name, .. },
            args,
        } if name == "-" && args.len() == 1 => Some(args[0]),
        _ => None,
    })
}

/// `x * 0`, `0 * x`, `x * 1`, `1 * x`
fn replace_mul(ctx: &mut Context, a: &[NodeId]) -> Result<Option<NodeId>> {
    if const_zero(ctx, a[0]) || const_zero(ctx, a[1]) {
        return Ok(Some(zero_like(ctx, a[0])));
    }
    if const_one(ctx, a[1]) {
        return Ok(Some(a[0]));
    }
    if const_one(ctx, a[0]) {
        return Ok(Some(a[1]));
    }
    Ok(None)
}

/// `x / 1`, `0 / x`
fn replace_div(ctx: &mut Context, a: &[NodeId]) -> Result<Option<NodeId>> {
    if const_one(ctx, a[1]) {
        return Ok(Some(a[0]));
    }
    if const_zero(ctx, a[0]) {
        return Ok(Some(a[0]));
    }
    Ok(None)
}
