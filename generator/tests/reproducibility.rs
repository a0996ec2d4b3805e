// Hermetic-generation guarantees: identical problem descriptions must
// produce byte-identical C output and identical provenance hashes, and
// any change to the problem must change the provenance.

use lirkgen::codegen::{codegen, CodegenOptions};
use lirkgen::config::{
    ButcherTableau, GeneratorOptions, Grid, IntegratorMode, MeasurementGrid, SensitivityMode,
    StatePartition,
};
use lirkgen::generator::{compute_provenance, generate};
use lirkgen::linsolve::GaussianElimination;
use lirkgen::models;

fn vdp_setup(lift_mode: u8) -> (StatePartition, ButcherTableau, Grid, GeneratorOptions) {
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
            num_shooting_nodes: 10,
            num_intervals: 4,
            equidistant: true,
        },
        GeneratorOptions {
            sensitivity: SensitivityMode::Forward,
            integrator_mode: IntegratorMode::Lifted,
            lift_mode,
            parallel: false,
            measurement_grid: MeasurementGrid::Offline,
            debug: false,
            num_outputs: 0,
        },
    )
}

fn generate_source(lift_mode: u8) -> String {
    let (p, t, g, o) = vdp_setup(lift_mode);
    let dynamics = models::builtin("vdp").unwrap();
    let generated =
        generate(&p, &t, &g, &o, &dynamics, &GaussianElimination).expect("valid configuration");
    codegen(&generated.module, &CodegenOptions::default())
        .generated
        .c_source
}

#[test]
fn generation_is_deterministic() {
    assert_eq!(generate_source(4), generate_source(4));
}

#[test]
fn provenance_hashes_are_stable() {
    let problem = r#"{"model":"vdp","lift_mode":4}"#;
    let source = generate_source(4);
    let a = compute_provenance(problem, &source);
    let b = compute_provenance(problem, &source);
    assert_eq!(a.problem_hash_hex(), b.problem_hash_hex());
    assert_eq!(a.source_hash_hex(), b.source_hash_hex());
    assert_eq!(a.problem_hash_hex().len(), 64);
}

#[test]
fn different_configurations_change_the_source_hash() {
    let full = generate_source(3);
    let reuse = generate_source(4);
    assert_ne!(full, reuse, "lift modes must emit different code");
    let a = compute_provenance("{}", &full);
    let b = compute_provenance("{}", &reuse);
    assert_ne!(a.source_hash_hex(), b.source_hash_hex());
    assert_eq!(a.problem_hash_hex(), b.problem_hash_hex());
}

#[test]
fn build_info_json_carries_both_hashes() {
    let source = generate_source(4);
    let info = compute_provenance("{\"model\":\"vdp\"}", &source).to_json();
    let parsed: serde_json::Value = serde_json::from_str(&info).expect("valid JSON");
    assert_eq!(parsed["problem_hash"].as_str().unwrap().len(), 64);
    assert_eq!(parsed["source_hash"].as_str().unwrap().len(), 64);
    assert!(parsed["generator_version"].is_string());
}
