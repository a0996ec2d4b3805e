// Validation must fail fast, before any emission: every rejected
// configuration leaves the sink untouched (emission is all-or-nothing).

use lirkgen::config::{
    ButcherTableau, GeneratorOptions, Grid, IntegratorMode, MeasurementGrid, SensitivityMode,
    StatePartition,
};
use lirkgen::diag::{codes, DiagCode};
use lirkgen::generator::generate_into;
use lirkgen::ir::IrModule;
use lirkgen::linsolve::GaussianElimination;
use lirkgen::model::IrDynamics;
use lirkgen::models;
use lirkgen::phase::StageCert;

fn base_partition() -> StatePartition {
    StatePartition {
        nx2: 1,
        ..Default::default()
    }
}

fn base_grid() -> Grid {
    Grid {
        t_start: 0.0,
        t_end: 0.1,
        num_shooting_nodes: 1,
        num_intervals: 1,
        equidistant: true,
    }
}

fn base_options() -> GeneratorOptions {
    GeneratorOptions {
        sensitivity: SensitivityMode::Forward,
        integrator_mode: IntegratorMode::Lifted,
        lift_mode: 4,
        parallel: false,
        measurement_grid: MeasurementGrid::Offline,
        debug: false,
        num_outputs: 0,
    }
}

/// Run generation and require a rejection carrying `code`, with zero
/// statements emitted.
fn assert_rejected(
    partition: StatePartition,
    grid: Grid,
    options: GeneratorOptions,
    dynamics: &IrDynamics,
    code: DiagCode,
) {
    let mut module = IrModule::default();
    let err = generate_into(
        &partition,
        &ButcherTableau::backward_euler(),
        &grid,
        &options,
        dynamics,
        &GaussianElimination,
        &mut module,
    )
    .expect_err("configuration must be rejected");
    assert!(
        err.iter().any(|d| d.code == Some(code)),
        "expected {code}, got {err:?}"
    );
    assert!(module.is_untouched(), "rejected run must emit nothing");
    assert_eq!(module.stmt_count(), 0);
}

#[test]
fn adjoint_sensitivities_are_rejected() {
    let mut options = base_options();
    options.sensitivity = SensitivityMode::Adjoint;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(base_partition(), base_grid(), options, &dynamics, codes::E0101);
}

#[test]
fn non_lifted_integrator_mode_is_rejected() {
    let mut options = base_options();
    options.integrator_mode = IntegratorMode::NonLifted;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(base_partition(), base_grid(), options, &dynamics, codes::E0102);
}

#[test]
fn lift_mode_two_is_rejected() {
    let mut options = base_options();
    options.lift_mode = 2;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(base_partition(), base_grid(), options, &dynamics, codes::E0103);
}

#[test]
fn lift_mode_out_of_range_is_rejected() {
    let mut options = base_options();
    options.lift_mode = 5;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(base_partition(), base_grid(), options, &dynamics, codes::E0103);
}

#[test]
fn inexact_with_delta_lifting_is_rejected() {
    let mut options = base_options();
    options.sensitivity = SensitivityMode::Inexact;
    options.lift_mode = 1;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(base_partition(), base_grid(), options, &dynamics, codes::E0104);
}

#[test]
fn continuous_output_is_rejected() {
    let mut options = base_options();
    options.num_outputs = 2;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(base_partition(), base_grid(), options, &dynamics, codes::E0201);
}

#[test]
fn linear_input_states_are_rejected() {
    let mut partition = base_partition();
    partition.nx1 = 2;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(partition, base_grid(), base_options(), &dynamics, codes::E0202);
}

#[test]
fn linear_output_states_are_rejected() {
    let mut partition = base_partition();
    partition.nx3 = 1;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(partition, base_grid(), base_options(), &dynamics, codes::E0203);
}

#[test]
fn non_equidistant_grid_is_rejected() {
    let mut grid = base_grid();
    grid.equidistant = false;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(base_partition(), grid, base_options(), &dynamics, codes::E0204);
}

#[test]
fn algebraic_states_are_rejected() {
    let mut partition = base_partition();
    partition.nxa = 1;
    let dynamics = models::builtin("decay").unwrap();
    assert_rejected(partition, base_grid(), base_options(), &dynamics, codes::E0205);
}

#[test]
fn state_derivative_dependence_is_rejected() {
    let mut dynamics = models::builtin("decay").unwrap();
    dynamics.ndx = 1; // within [nx2, nx], so recognized but unimplemented
    assert_rejected(
        base_partition(),
        base_grid(),
        base_options(),
        &dynamics,
        codes::E0206,
    );
}

#[test]
fn state_derivative_count_out_of_range_is_rejected() {
    let mut partition = base_partition();
    partition.nx2 = 2;
    let mut dynamics = models::builtin("decay").unwrap();
    dynamics.ndx = 1; // 0 < ndx < nx2
    assert_rejected(partition, base_grid(), base_options(), &dynamics, codes::E0105);
}

#[test]
fn inexact_without_sweep_function_is_rejected() {
    let mut options = base_options();
    options.sensitivity = SensitivityMode::Inexact;
    let mut dynamics = models::builtin("decay").unwrap();
    dynamics.sweep = None;
    assert_rejected(base_partition(), base_grid(), options, &dynamics, codes::E0207);
}

#[test]
fn every_rejection_reports_all_errors_at_once() {
    let mut partition = base_partition();
    partition.nx1 = 1;
    partition.nx3 = 1;
    let mut options = base_options();
    options.lift_mode = 2;
    let dynamics = models::builtin("decay").unwrap();
    let mut module = IrModule::default();
    let err = generate_into(
        &partition,
        &ButcherTableau::backward_euler(),
        &base_grid(),
        &options,
        &dynamics,
        &GaussianElimination,
        &mut module,
    )
    .expect_err("rejected");
    let codes_seen: Vec<_> = err.iter().filter_map(|d| d.code).collect();
    assert!(codes_seen.contains(&codes::E0103));
    assert!(codes_seen.contains(&codes::E0202));
    assert!(codes_seen.contains(&codes::E0203));
    assert!(module.is_untouched());
}

#[test]
fn valid_configuration_emits_into_the_sink() {
    let dynamics = models::builtin("decay").unwrap();
    let mut module = IrModule::default();
    let report = generate_into(
        &base_partition(),
        &ButcherTableau::backward_euler(),
        &base_grid(),
        &base_options(),
        &dynamics,
        &GaussianElimination,
        &mut module,
    )
    .expect("valid configuration");
    assert!(report.cert.all_pass());
    assert!(module.stmt_count() > 0);
    assert!(module.find_function("lirk_integrate").is_some());
}
