// config.rs — Configuration surface for the integrator generator
//
// The complete option table, state partition, Butcher tableau and control
// grid, read once before generation starts. Deserialized from the problem
// JSON by the CLI driver; constructed directly by library callers.

use serde::{Deserialize, Serialize};

// ── Option table ────────────────────────────────────────────────────────────

/// Sensitivity propagation scheme of the generated routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityMode {
    /// Exact forward sensitivities via the implicit function theorem.
    Forward,
    /// Lifted-Newton inexact sensitivities (requires lift mode 4).
    Inexact,
    /// Recognized but not generated by this exporter.
    Adjoint,
}

/// Integrator family. Only the lifted scheme is generated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorMode {
    Lifted,
    NonLifted,
}

/// Measurement-grid bookkeeping for continuous outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementGrid {
    Offline,
    Online,
}

/// Warm-start correction scheme, validated from the raw `lift_mode` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftScheme {
    /// Mode 1: fold the state/control correction into the right-hand side
    /// every sub-interval.
    Delta,
    /// Mode 3: plain lifting, full rebuild every sub-interval.
    Plain,
    /// Mode 4: reuse the factorization across sub-intervals; combined with
    /// INEXACT this is the fully lifted Newton-type sensitivity update.
    FactorReuse,
}

/// The recognized generator options, each read-only once generation starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorOptions {
    pub sensitivity: SensitivityMode,
    pub integrator_mode: IntegratorMode,
    /// Raw lift mode; 1, 3 and 4 are valid, 2 is rejected.
    pub lift_mode: u8,
    /// Mark shared scratch as execution-context-private and emit the
    /// corresponding directive.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_grid")]
    pub measurement_grid: MeasurementGrid,
    /// Emit an extra diagnostic copy of the Newton matrix.
    #[serde(default)]
    pub debug: bool,
    /// Number of continuous-output functions (rejected when non-zero).
    #[serde(default)]
    pub num_outputs: usize,
}

fn default_grid() -> MeasurementGrid {
    MeasurementGrid::Offline
}

// ── State partition ─────────────────────────────────────────────────────────

/// Disjoint blocks of the dynamic state.
///
/// Only the fully implicit partition (`nx2`, `nxa`) is generated for; the
/// linear input/output partitions are recognized and rejected. The
/// state-derivative count `ndx` comes from the dynamics oracle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatePartition {
    #[serde(default)]
    pub nx1: usize,
    pub nx2: usize,
    #[serde(default)]
    pub nx3: usize,
    #[serde(default)]
    pub nxa: usize,
    #[serde(default)]
    pub nu: usize,
    #[serde(default)]
    pub nod: usize,
}

impl StatePartition {
    /// Total differential state count.
    pub fn nx(&self) -> usize {
        self.nx1 + self.nx2 + self.nx3
    }
}

// ── Butcher tableau ─────────────────────────────────────────────────────────

/// IRK coefficients: stage matrix `a`, weights `b`, abscissae `c`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButcherTableau {
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
}

impl ButcherTableau {
    pub fn num_stages(&self) -> usize {
        self.b.len()
    }

    /// Backward Euler: one stage, A-stable, stiffly accurate.
    pub fn backward_euler() -> Self {
        Self {
            a: vec![vec![1.0]],
            b: vec![1.0],
            c: vec![1.0],
        }
    }

    /// Gauss–Legendre collocation with two stages (order 4).
    pub fn gauss_legendre_2() -> Self {
        let s3 = 3.0_f64.sqrt();
        Self {
            a: vec![
                vec![0.25, 0.25 - s3 / 6.0],
                vec![0.25 + s3 / 6.0, 0.25],
            ],
            b: vec![0.5, 0.5],
            c: vec![0.5 - s3 / 6.0, 0.5 + s3 / 6.0],
        }
    }

    /// Radau IIA with two stages (order 3), stiffly accurate.
    pub fn radau_iia_2() -> Self {
        Self {
            a: vec![
                vec![5.0 / 12.0, -1.0 / 12.0],
                vec![0.75, 0.25],
            ],
            b: vec![0.75, 0.25],
            c: vec![1.0 / 3.0, 1.0],
        }
    }

    /// True if `a` is square and matches the stage count of `b` and `c`.
    pub fn is_consistent(&self) -> bool {
        let ns = self.num_stages();
        ns > 0
            && self.c.len() == ns
            && self.a.len() == ns
            && self.a.iter().all(|row| row.len() == ns)
    }
}

// ── Control grid ────────────────────────────────────────────────────────────

/// Shooting-horizon discretization: `num_shooting_nodes` outer nodes, each
/// split into `num_intervals` fixed sub-steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    pub t_start: f64,
    pub t_end: f64,
    pub num_shooting_nodes: usize,
    pub num_intervals: usize,
    #[serde(default = "default_true")]
    pub equidistant: bool,
}

fn default_true() -> bool {
    true
}

impl Grid {
    /// Fixed step size of one sub-interval.
    pub fn step(&self) -> f64 {
        (self.t_end - self.t_start) / self.num_intervals as f64
    }
}

// ── Problem description ─────────────────────────────────────────────────────

/// Everything the CLI reads from one problem JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Name of a built-in dynamics model (see `models::builtin`).
    pub model: String,
    pub partition: StatePartition,
    pub tableau: ButcherTableau,
    pub grid: Grid,
    pub options: GeneratorOptions,
    /// Optional simulation request handled by `--simulate`.
    #[serde(default)]
    pub simulate: Option<SimulateRequest>,
}

/// Initial condition and controls for the CLI simulation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateRequest {
    pub x0: Vec<f64>,
    #[serde(default)]
    pub u: Vec<f64>,
    #[serde(default)]
    pub od: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tableau_constructors_are_consistent() {
        for t in [
            ButcherTableau::backward_euler(),
            ButcherTableau::gauss_legendre_2(),
            ButcherTableau::radau_iia_2(),
        ] {
            assert!(t.is_consistent());
            let sum: f64 = t.b.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "weights must sum to one");
        }
    }

    #[test]
    fn grid_step() {
        let g = Grid {
            t_start: 0.0,
            t_end: 1.0,
            num_shooting_nodes: 10,
            num_intervals: 4,
            equidistant: true,
        };
        assert!((g.step() - 0.25).abs() < 1e-15);
    }

    #[test]
    fn problem_config_roundtrips_through_json() {
        let json = r#"{
            "model": "decay",
            "partition": { "nx2": 1 },
            "tableau": { "a": [[1.0]], "b": [1.0], "c": [1.0] },
            "grid": {
                "t_start": 0.0, "t_end": 0.1,
                "num_shooting_nodes": 1, "num_intervals": 1
            },
            "options": {
                "sensitivity": "forward",
                "integrator_mode": "lifted",
                "lift_mode": 4
            }
        }"#;
        let cfg: ProblemConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(cfg.model, "decay");
        assert_eq!(cfg.partition.nx(), 1);
        assert_eq!(cfg.options.lift_mode, 4);
        assert_eq!(cfg.options.measurement_grid, MeasurementGrid::Offline);
        assert!(!cfg.options.parallel);
        let back = serde_json::to_string(&cfg).expect("serialize");
        let again: ProblemConfig = serde_json::from_str(&back).expect("reparse");
        assert_eq!(again.grid.num_intervals, 1);
    }
}
