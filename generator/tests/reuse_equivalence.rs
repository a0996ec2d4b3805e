// Reuse-path equivalence: on an equidistant lifted grid, the stage values
// produced by "full rebuild every sub-step" (lift mode 3) and by "rebuild
// at the first sub-step, back-substitution reuse thereafter" (lift mode 4)
// must agree once the lifted Newton iteration has converged across outer
// calls — both schemes share the same fixed point.

use lirkgen::config::{
    ButcherTableau, GeneratorOptions, Grid, IntegratorMode, MeasurementGrid, SensitivityMode,
    StatePartition,
};
use lirkgen::exec::{Externals, Machine};
use lirkgen::generator::{generate, INTEGRATE};
use lirkgen::linsolve::{GaussianElimination, LinearSolverGen};
use lirkgen::models;

const X0: [f64; 2] = [1.2, -0.8];
const U0: f64 = 0.3;
const OUTER_ITERATIONS: usize = 80;

struct Outcome {
    ktraj: Vec<f64>,
    x_end: [f64; 2],
    health: i64,
}

/// Generate the Van der Pol integrator for the given lift mode and drive
/// it to convergence over repeated outer calls with a fixed initial state.
fn run_variant(lift_mode: u8) -> Outcome {
    let partition = StatePartition {
        nx2: 2,
        nu: 1,
        ..Default::default()
    };
    let grid = Grid {
        t_start: 0.0,
        t_end: 0.3,
        num_shooting_nodes: 1,
        num_intervals: 3,
        equidistant: true,
    };
    let options = GeneratorOptions {
        sensitivity: SensitivityMode::Forward,
        integrator_mode: IntegratorMode::Lifted,
        lift_mode,
        parallel: false,
        measurement_grid: MeasurementGrid::Offline,
        debug: false,
        num_outputs: 0,
    };
    let dynamics = models::builtin("vdp").unwrap();
    let solver = GaussianElimination;
    let generated = generate(
        &partition,
        &ButcherTableau::gauss_legendre_2(),
        &grid,
        &options,
        &dynamics,
        &solver,
    )
    .expect("valid configuration");

    // Newton dimension: numStages * nx2 = 4.
    let mut externals = Externals::new();
    solver.register_runtime(&mut externals, 4);
    let mut machine = Machine::with_externals(&generated.module, externals);

    // eta = [x (2), dx_end/dx0 (2x2), dx_end/du (2x1), u (1)] — 9 entries
    let mut eta = vec![0.0; 9];
    let mut health = 0;
    for _ in 0..OUTER_ITERATIONS {
        eta.iter_mut().for_each(|x| *x = 0.0);
        eta[..2].copy_from_slice(&X0);
        eta[8] = U0;
        health = machine
            .call(INTEGRATE, &mut [&mut eta[..]], &[0])
            .expect("integration runs") as i64;
    }

    Outcome {
        ktraj: machine.buffer("rk_ktraj").unwrap().to_vec(),
        x_end: [eta[0], eta[1]],
        health,
    }
}

#[test]
fn rebuilt_and_reused_factorizations_share_the_stage_trajectory() {
    let full = run_variant(3);
    let reused = run_variant(4);

    assert_eq!(full.ktraj.len(), reused.ktraj.len());
    // 1 node * 3 sub-intervals * 2 states * 2 stages
    assert_eq!(full.ktraj.len(), 12);
    for (i, (a, b)) in full.ktraj.iter().zip(&reused.ktraj).enumerate() {
        assert!(
            (a - b).abs() < 1e-8,
            "stage value {i} diverged: {a} vs {b}"
        );
    }
    for i in 0..2 {
        assert!(
            (full.x_end[i] - reused.x_end[i]).abs() < 1e-9,
            "x_end[{i}]: {} vs {}",
            full.x_end[i],
            reused.x_end[i]
        );
    }
    assert_eq!(full.health, 0);
    assert_eq!(reused.health, 0);
}

#[test]
fn converged_stage_values_satisfy_the_collocation_equations() {
    // K_s = f(x + h Σ_j a_sj K_j) at every sub-interval start state.
    let outcome = run_variant(3);
    let tableau = ButcherTableau::gauss_legendre_2();
    let h = 0.1;
    let mu = 1.0;
    let f = |x0: f64, x1: f64| [x1, mu * (1.0 - x0 * x0) * x1 - x0 + U0];

    let mut x = X0;
    for interval in 0..3 {
        // K layout: row (interval * 2 + state), column = stage.
        let k = |state: usize, stage: usize| outcome.ktraj[(interval * 2 + state) * 2 + stage];
        for s in 0..2 {
            let xs0 = x[0] + h * (tableau.a[s][0] * k(0, 0) + tableau.a[s][1] * k(0, 1));
            let xs1 = x[1] + h * (tableau.a[s][0] * k(1, 0) + tableau.a[s][1] * k(1, 1));
            let rhs = f(xs0, xs1);
            assert!(
                (k(0, s) - rhs[0]).abs() < 1e-8 && (k(1, s) - rhs[1]).abs() < 1e-8,
                "interval {interval}, stage {s} violates collocation"
            );
        }
        for state in 0..2 {
            x[state] += h * (tableau.b[0] * k(state, 0) + tableau.b[1] * k(state, 1));
        }
    }
    assert!((x[0] - outcome.x_end[0]).abs() < 1e-10);
    assert!((x[1] - outcome.x_end[1]).abs() < 1e-10);
}
