use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::DMatrix;

use lirkgen::block_matrix::BlockMatrix;
use lirkgen::codegen::{codegen, CodegenOptions};
use lirkgen::config::{
    ButcherTableau, GeneratorOptions, Grid, IntegratorMode, MeasurementGrid, SensitivityMode,
    StatePartition,
};
use lirkgen::generator::generate;
use lirkgen::linsolve::GaussianElimination;
use lirkgen::models;

// KPI-aligned benchmark scenarios: generation latency for the reference
// problems and the block-sparse accumulation the merit function leans on.

fn vdp_problem(
    sensitivity: SensitivityMode,
    lift_mode: u8,
) -> (StatePartition, ButcherTableau, Grid, GeneratorOptions) {
    (
        StatePartition {
            nx2: 2,
            nu: 1,
            ..Default::default()
        },
        ButcherTableau::gauss_legendre_2(),
        Grid {
            t_start: 0.0,
            t_end: 0.4,
            num_shooting_nodes: 20,
            num_intervals: 4,
            equidistant: true,
        },
        GeneratorOptions {
            sensitivity,
            integrator_mode: IntegratorMode::Lifted,
            lift_mode,
            parallel: false,
            measurement_grid: MeasurementGrid::Offline,
            debug: false,
            num_outputs: 0,
        },
    )
}

fn bench_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    for (name, sens, lift) in [
        ("forward_lift4", SensitivityMode::Forward, 4),
        ("forward_lift1", SensitivityMode::Forward, 1),
        ("inexact_lift4", SensitivityMode::Inexact, 4),
    ] {
        let (p, t, g, o) = vdp_problem(sens, lift);
        let dynamics = models::builtin("vdp").unwrap();
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                let generated = generate(
                    black_box(&p),
                    &t,
                    &g,
                    &o,
                    &dynamics,
                    &GaussianElimination,
                )
                .expect("valid configuration");
                black_box(generated.module.stmt_count())
            })
        });
    }
    group.finish();
}

fn bench_codegen(c: &mut Criterion) {
    let (p, t, g, o) = vdp_problem(SensitivityMode::Forward, 4);
    let dynamics = models::builtin("vdp").unwrap();
    let generated = generate(&p, &t, &g, &o, &dynamics, &GaussianElimination).expect("valid");
    c.bench_function("codegen_c", |b| {
        b.iter(|| {
            let rendered = codegen(black_box(&generated.module), &CodegenOptions::default());
            black_box(rendered.generated.c_source.len())
        })
    });
}

fn bench_block_matrix(c: &mut Criterion) {
    // A sparse multiplier grid against a sparse residual grid, the shape
    // the merit assembler produces for a 40-node horizon.
    let nodes = 40;
    let mut lambda = BlockMatrix::new(nodes, 1);
    let mut residuum = BlockMatrix::new(nodes, 1);
    for i in 0..nodes {
        if i % 3 == 0 {
            continue; // inactive nodes stay Zero
        }
        lambda.set_dense(i, 0, DMatrix::from_fn(6, 1, |r, _| (i + r) as f64 * 0.25 - 1.0));
        residuum.set_dense(i, 0, DMatrix::from_fn(6, 1, |r, _| 1.0 - (i * r) as f64 * 0.125));
    }
    c.bench_function("block_matT_mat_mul", |b| {
        let mut out = BlockMatrix::default();
        b.iter(|| {
            BlockMatrix::mat_t_mat_mul(black_box(&lambda), black_box(&residuum), &mut out);
            black_box(out.sub_block(0, 0, 1, 1)[(0, 0)])
        })
    });
}

criterion_group!(benches, bench_generation, bench_codegen, bench_block_matrix);
criterion_main!(benches);
