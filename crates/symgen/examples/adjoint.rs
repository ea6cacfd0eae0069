//! A damped 2D oscillator step and its gradient function, emitted in all
//! three languages.
//!
//! ```sh
//! cargo run --example adjoint -p symgen
//! ```

use std::sync::Arc;

use symgen::{adjoint_of, Context, Lang, Registry, Result, TypeRegistry, Value};

fn build() -> Result<Context> {
    let mut types = TypeRegistry::new();
    types.add_struct("State", &[("pos", "double"), ("vel", "double")])?;

    let mut f = Context::new("step", Arc::new(Registry::with_std_ops()), Arc::new(types));
    f.declare_args(
        &[("energy", "double")],
        &[("s", "State")],
        &[("dt", "double"), ("k", "double"), ("damping", "double")],
    )?;
    let (s, dt, k, damping, energy) = (
        f.arg("s")?,
        f.arg("dt")?,
        f.arg("k")?,
        f.arg("damping")?,
        f.arg("energy")?,
    );
    let pos = f.member(s, "pos")?;
    let vel = f.member(s, "vel")?;

    // vel' = vel - dt * (k * pos + damping * vel)
    let spring = f.mul(k, pos)?;
    let drag = f.mul(damping, vel)?;
    let force = f.add(spring, drag)?;
    let dv = f.mul(dt, force)?;
    let vel_next = f.sub(vel, dv)?;
    // pos' = normangle(pos + dt * vel')
    let dp = f.mul(dt, vel_next)?;
    let moved = f.add(pos, dp)?;
    let pos_next = f.call("normangle", moved)?;

    let state_ty = f.ty(s);
    let next = f.construct(&state_ty, &[pos_next, vel_next])?;
    f.write(s, next)?;

    let v2 = f.call("sqr", vel_next)?;
    let p2 = f.call("sqr", pos_next)?;
    let kp2 = f.mul(k, p2)?;
    let sum = f.add(v2, kp2)?;
    let e = f.mul(0.5, sum)?;
    f.write(energy, e)?;
    Ok(f)
}

fn main() -> Result<()> {
    let f = build()?;
    let grad = adjoint_of(&f, &["dt"])?;

    for lang in Lang::ALL {
        println!("// ---- {lang} ----");
        for func in [&f, &grad] {
            let emitted = func.emit(lang)?;
            if let Some(decl) = &emitted.forward_decl {
                println!("{decl}");
            }
            println!("{}", emitted.source());
        }
    }

    let mut grad = grad;
    let state = Value::Tuple(vec![0.5.into(), 0.0.into()]);
    let zero_state = Value::Tuple(vec![0.0.into(), 0.0.into()]);
    let values = grad.fold_writes(&[
        ("s", state),
        ("sGrad", zero_state),
        ("dt", Value::Float(0.01)),
        ("k", Value::Float(4.0)),
        ("damping", Value::Float(0.1)),
        ("energyGrad", Value::Float(1.0)),
    ])?;
    for (addr, v) in &values {
        println!("{addr} = {v:?}");
    }
    Ok(())
}
