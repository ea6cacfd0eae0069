//! Graph fixtures shared by the symgen benchmarks.

use std::sync::Arc;

use symgen::{Context, Registry, Result, TypeRegistry};

/// Std operators plus a `Vec3 {x, y, z}` struct of doubles.
pub fn setup() -> Result<(Arc<Registry>, Arc<TypeRegistry>)> {
    let mut types = TypeRegistry::new();
    types.add_struct("Vec3", &[("x", "double"), ("y", "double"), ("z", "double")])?;
    Ok((Arc::new(Registry::with_std_ops()), Arc::new(types)))
}

/// `y = x * x` over doubles.
pub fn x_squared() -> Result<Context> {
    let (reg, types) = setup()?;
    let mut f = Context::new("x_squared", reg, types);
    f.declare_args(&[("y", "double")], &[], &[("x", "double")])?;
    let (x, y) = (f.arg("x")?, f.arg("y")?);
    let sq = f.mul(x, x)?;
    f.write(y, sq)?;
    Ok(f)
}

/// `n = |a × b|` for two `Vec3` inputs.
pub fn norm_cross() -> Result<Context> {
    let (reg, types) = setup()?;
    let mut f = Context::new("norm_cross", reg, types);
    f.declare_args(&[("n", "double")], &[], &[("a", "Vec3"), ("b", "Vec3")])?;
    let (a, b, n) = (f.arg("a")?, f.arg("b")?, f.arg("n")?);
    let mut ca = Vec::new();
    let mut cb = Vec::new();
    for axis in ["x", "y", "z"] {
        ca.push(f.member(a, axis)?);
        cb.push(f.member(b, axis)?);
    }
    let double = f.ty(n);
    let mut sum = f.constant(&double, 0.0);
    for i in 0..3 {
        let (j, k) = ((i + 1) % 3, (i + 2) % 3);
        let p = f.mul(ca[j], cb[k])?;
        let q = f.mul(ca[k], cb[j])?;
        let c = f.sub(p, q)?;
        let c2 = f.call("sqr", c)?;
        sum = f.add(sum, c2)?;
    }
    let len = f.call("sqrt", sum)?;
    f.write(n, len)?;
    Ok(f)
}

/// A recurrent cell unrolled `steps` times: `h = tanh(w*h + x)` with `h`
/// as an update argument and `y = h` after the last step.
pub fn unrolled_cell(steps: usize) -> Result<Context> {
    let (reg, types) = setup()?;
    let mut f = Context::new("cell", reg, types);
    f.declare_args(&[("y", "double")], &[("h", "double")], &[("w", "double"), ("x", "double")])?;
    let (w, x, h, y) = (f.arg("w")?, f.arg("x")?, f.arg("h")?, f.arg("y")?);
    let mut state = f.read(h)?;
    for _ in 0..steps {
        let wh = f.mul(w, state)?;
        let pre = f.add(wh, x)?;
        state = f.call("tanh", pre)?;
    }
    f.write(h, state)?;
    f.write(y, state)?;
    Ok(f)
}
