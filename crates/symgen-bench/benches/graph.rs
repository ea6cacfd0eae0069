use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use symgen::{adjoint_of, Context, Deps, Lang, NodeId, NodeKind, Value};
use symgen_bench::{norm_cross, unrolled_cell, x_squared};

// ---------------------------------------------------------------------------
// 1. Graph construction
// ---------------------------------------------------------------------------

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/construction");

    group.bench_function("x_squared", |b| b.iter(|| black_box(x_squared().unwrap())));
    group.bench_function("norm_cross", |b| b.iter(|| black_box(norm_cross().unwrap())));
    group.bench_function("unrolled_cell_32", |b| {
        b.iter(|| black_box(unrolled_cell(32).unwrap()))
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Forward derivatives
// ---------------------------------------------------------------------------

/// Derivative of every written value with respect to `wrt`.
fn deriv_writes(f: &mut Context, wrt: NodeId) -> Vec<NodeId> {
    let values: Vec<_> = f
        .writes()
        .filter_map(|w| match f.node(w).kind() {
            NodeKind::Write { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    values.into_iter().map(|v| f.deriv(wrt, v).unwrap()).collect()
}

fn arg(f: &Context, name: &str) -> NodeId {
    f.arg(name).unwrap()
}

fn bench_deriv(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/deriv");

    group.bench_function("x_squared", |b| {
        b.iter_batched(
            || x_squared().unwrap(),
            |mut f| {
                let x = arg(&f, "x");
                black_box(deriv_writes(&mut f, x))
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("norm_cross_d_ax", |b| {
        b.iter_batched(
            || norm_cross().unwrap(),
            |mut f| {
                let a = arg(&f, "a");
                let ax = f.member(a, "x").unwrap();
                black_box(deriv_writes(&mut f, ax))
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("unrolled_cell_32_d_w", |b| {
        b.iter_batched(
            || unrolled_cell(32).unwrap(),
            |mut f| {
                let w = arg(&f, "w");
                black_box(deriv_writes(&mut f, w))
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Adjoint synthesis
// ---------------------------------------------------------------------------

fn bench_adjoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/adjoint");

    let f = norm_cross().unwrap();
    group.bench_function("norm_cross", |b| b.iter(|| black_box(adjoint_of(&f, &[]).unwrap())));

    for steps in [8, 64] {
        let f = unrolled_cell(steps).unwrap();
        group.bench_function(format!("unrolled_cell_{steps}"), |b| {
            b.iter(|| black_box(adjoint_of(&f, &[]).unwrap()))
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 4. Dependency analysis and emission
// ---------------------------------------------------------------------------

fn bench_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/emit");

    let f = unrolled_cell(64).unwrap();
    group.bench_function("deps_unrolled_cell_64", |b| b.iter(|| black_box(Deps::build(&f))));
    for lang in Lang::ALL {
        group.bench_function(format!("unrolled_cell_64_{lang}"), |b| {
            b.iter(|| black_box(f.emit(lang).unwrap()))
        });
    }

    let grad = adjoint_of(&norm_cross().unwrap(), &[]).unwrap();
    group.bench_function("norm_cross_adjoint_cpp", |b| {
        b.iter(|| black_box(grad.emit(Lang::Cpp).unwrap().source()))
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 5. Constant folding through the graph
// ---------------------------------------------------------------------------

fn bench_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/fold");

    let env = [
        ("w", Value::Float(0.5)),
        ("x", Value::Float(0.25)),
        ("h", Value::Float(0.0)),
    ];
    group.bench_function("unrolled_cell_32", |b| {
        b.iter_batched(
            || unrolled_cell(32).unwrap(),
            |mut f| black_box(f.fold_writes(&env).unwrap()),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_construction,
    bench_deriv,
    bench_adjoint,
    bench_emit,
    bench_fold,
);
criterion_main!(benches);
