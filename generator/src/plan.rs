// plan.rs — The immutable export plan
//
// `ExportPlan::new` performs every §-validation check against the raw
// configuration and, on success, precomputes all constants the emission
// phases need (step size, scaled tableau, collocation weights, buffer
// shapes, vector layouts). The plan is never mutated after construction;
// the emission phases are pure functions over it.
//
// Preconditions: none.
// Postconditions: a returned plan satisfies every validation rule; all
//                 derived constants are finite.
// Failure modes: Err carries the full list of configuration diagnostics.
// Side effects: none.

use crate::config::{
    ButcherTableau, GeneratorOptions, Grid, IntegratorMode, LiftScheme, MeasurementGrid,
    SensitivityMode, StatePartition,
};
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::model::DynamicsOracle;

// ── Pipeline-stage capability model ────────────────────────────────────────

/// The three state partitions as pipeline-stage values. The two linear
/// stages are permanently unsupported by this exporter; they report so
/// instead of carrying unreachable stub code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    LinearInput,
    ImplicitCore,
    LinearOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported(DiagCode),
}

impl PipelineStage {
    /// Whether this exporter can generate the stage for the given partition.
    /// An empty linear stage is trivially supported (there is nothing to
    /// emit for it).
    pub fn capability(self, p: &StatePartition) -> Capability {
        match self {
            PipelineStage::LinearInput if p.nx1 > 0 => Capability::Unsupported(codes::E0202),
            PipelineStage::LinearOutput if p.nx3 > 0 => Capability::Unsupported(codes::E0203),
            PipelineStage::ImplicitCore if p.nx2 == 0 => Capability::Unsupported(codes::E0106),
            _ => Capability::Supported,
        }
    }
}

// ── Export plan ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExportPlan {
    // options
    pub sens: SensitivityMode,
    pub lift: LiftScheme,
    pub parallel: bool,
    pub debug: bool,
    pub measurement_grid: MeasurementGrid,

    // partition
    pub nx: usize,
    pub nx2: usize,
    pub nxa: usize,
    pub nu: usize,
    pub nod: usize,
    /// Jacobian variable count per residual row: x, z, u.
    pub nvars: usize,

    // grid
    pub n_nodes: usize,
    pub ni: usize,
    pub h: f64,
    pub t_start: f64,

    // tableau, pre-scaled
    pub ns: usize,
    /// `a * h`, row-major ns×ns.
    pub a_h: Vec<f64>,
    /// `b * h`.
    pub b_h: Vec<f64>,
    /// `c / num_intervals` (normalized interval time).
    pub c_scaled: Vec<f64>,
    /// Lagrange collocation weights evaluated at interval start; used to
    /// read algebraic stage values.
    pub coll0: Vec<f64>,

    pub time_dependent: bool,

    // derived shapes and layouts
    /// Newton system dimension: ns·(nx2+nxa).
    pub dim: usize,
    pub eta_len: usize,
    /// eta offset of d x_end / d x0, row-major (nx+nxa)×nx.
    pub base_gx: usize,
    /// eta offset of d x_end / d u, row-major (nx+nxa)×nu.
    pub base_gu: usize,
    /// eta offset of the control vector.
    pub base_u: usize,
    /// eta offset of the online-data vector.
    pub base_od: usize,
    pub xxx_len: usize,
    pub seed_len: usize,

    /// Non-fatal findings from validation.
    pub warnings: Vec<Diagnostic>,
}

impl ExportPlan {
    pub fn new(
        partition: &StatePartition,
        tableau: &ButcherTableau,
        grid: &Grid,
        options: &GeneratorOptions,
        dynamics: &dyn DynamicsOracle,
    ) -> Result<ExportPlan, Vec<Diagnostic>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let lift = match options.lift_mode {
            1 => Some(LiftScheme::Delta),
            3 => Some(LiftScheme::Plain),
            4 => Some(LiftScheme::FactorReuse),
            other => {
                errors.push(
                    Diagnostic::error(
                        codes::E0103,
                        format!("lift mode {other} is not supported"),
                    )
                    .with_hint("use lift mode 1, 3 or 4"),
                );
                None
            }
        };

        match options.sensitivity {
            SensitivityMode::Forward => {}
            SensitivityMode::Inexact => {
                if lift.is_some() && lift != Some(LiftScheme::FactorReuse) {
                    errors.push(Diagnostic::error(
                        codes::E0104,
                        "inexact sensitivities require lift mode 4",
                    ));
                }
                if dynamics.sweep_name().is_none() {
                    errors.push(Diagnostic::error(
                        codes::E0207,
                        "inexact sensitivities need a variational sweep function, \
                         but the dynamics oracle provides none",
                    ));
                }
            }
            other => {
                errors.push(Diagnostic::error(
                    codes::E0101,
                    format!("sensitivity mode {other:?} is not generated by this exporter"),
                ));
            }
        }

        if options.integrator_mode != IntegratorMode::Lifted {
            errors.push(Diagnostic::error(
                codes::E0102,
                "integrator mode must be LIFTED",
            ));
        }

        if options.num_outputs > 0 {
            errors.push(Diagnostic::error(
                codes::E0201,
                "continuous output is not implemented",
            ));
        } else if options.measurement_grid == MeasurementGrid::Online {
            warnings.push(Diagnostic::warning(
                codes::W0101,
                "online measurement grid has no effect without continuous outputs",
            ));
        }

        for stage in [
            PipelineStage::LinearInput,
            PipelineStage::ImplicitCore,
            PipelineStage::LinearOutput,
        ] {
            if let Capability::Unsupported(code) = stage.capability(partition) {
                errors.push(Diagnostic::error(
                    code,
                    format!("{stage:?} partition is not supported for this state layout"),
                ));
            }
        }

        if !grid.equidistant {
            errors.push(Diagnostic::error(
                codes::E0204,
                "non-equidistant control grids are not implemented",
            ));
        }

        if partition.nxa > 0 {
            errors.push(Diagnostic::error(
                codes::E0205,
                "algebraic states are not implemented",
            ));
        }

        let nx = partition.nx();
        let ndx = dynamics.state_derivative_count();
        if ndx != 0 && (ndx < partition.nx2 || ndx > nx) {
            errors.push(Diagnostic::error(
                codes::E0105,
                format!("state-derivative count {ndx} outside {{0}} ∪ [{}, {nx}]", partition.nx2),
            ));
        } else if ndx > 0 {
            errors.push(Diagnostic::error(
                codes::E0206,
                "implicit state-derivative dependence is not implemented",
            ));
        }

        if !tableau.is_consistent() {
            errors.push(Diagnostic::error(
                codes::E0106,
                "Butcher tableau is inconsistent (a must be ns×ns, c of length ns)",
            ));
        }
        if grid.num_intervals == 0 || grid.num_shooting_nodes == 0 || !(grid.step() > 0.0) {
            errors.push(Diagnostic::error(
                codes::E0106,
                "grid must have positive node, interval and step counts",
            ));
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        let lift = lift.expect("checked above");

        let ns = tableau.num_stages();
        let ni = grid.num_intervals;
        let h = grid.step();
        let nx2 = partition.nx2;
        let nxa = partition.nxa;
        let nu = partition.nu;
        let nod = partition.nod;
        let nvars = nx2 + nxa + nu;
        let time_dependent = dynamics.has_time_dependence();
        let tdep = usize::from(time_dependent);

        let mut a_h = Vec::with_capacity(ns * ns);
        for row in &tableau.a {
            a_h.extend(row.iter().map(|aij| aij * h));
        }
        let b_h: Vec<f64> = tableau.b.iter().map(|bi| bi * h).collect();
        let c_scaled: Vec<f64> = tableau.c.iter().map(|ci| ci / ni as f64).collect();
        let coll0 = lagrange_weights_at(&tableau.c, 0.0);

        let base_gx = nx + nxa;
        let base_gu = (nx + nxa) * (nx + 1);
        let base_u = (nx + nxa) * (1 + nx + nu);
        let base_od = base_u + nu;

        Ok(ExportPlan {
            sens: options.sensitivity,
            lift,
            parallel: options.parallel,
            debug: options.debug,
            measurement_grid: options.measurement_grid,
            nx,
            nx2,
            nxa,
            nu,
            nod,
            nvars,
            n_nodes: grid.num_shooting_nodes,
            ni,
            h,
            t_start: grid.t_start,
            ns,
            a_h,
            b_h,
            c_scaled,
            coll0,
            time_dependent,
            dim: ns * (nx2 + nxa),
            eta_len: (nx + nxa) * (1 + nx + nu) + nu + nod,
            base_gx,
            base_gu,
            base_u,
            base_od,
            xxx_len: nx + nxa + nu + nod + tdep,
            seed_len: nx + nxa + nx + nu + nu + nod + tdep,
            warnings,
        })
    }

    pub fn inexact(&self) -> bool {
        self.sens == SensitivityMode::Inexact
    }

    /// Whether the warm-start correction buffers are live.
    pub fn carries_delta(&self) -> bool {
        self.lift == LiftScheme::Delta || (self.lift == LiftScheme::FactorReuse && self.inexact())
    }

    /// One-line-per-field summary for logs and snapshot tests.
    pub fn describe(&self) -> String {
        format!(
            "sensitivity: {:?}\nlift: {:?}\nparallel: {}\ndebug: {}\n\
             nx: {}\nnxa: {}\nnu: {}\nnod: {}\nstages: {}\nnodes: {}\n\
             intervals: {}\nstep: {:.6}\nnewton dim: {}\neta len: {}",
            self.sens,
            self.lift,
            self.parallel,
            self.debug,
            self.nx,
            self.nxa,
            self.nu,
            self.nod,
            self.ns,
            self.n_nodes,
            self.ni,
            self.h,
            self.dim,
            self.eta_len
        )
    }
}

/// Lagrange basis weights of the collocation polynomial through the
/// abscissae `c`, evaluated at `t`.
fn lagrange_weights_at(cs: &[f64], t: f64) -> Vec<f64> {
    let ns = cs.len();
    if ns == 1 {
        return vec![1.0];
    }
    (0..ns)
        .map(|s| {
            let mut w = 1.0;
            for (j, cj) in cs.iter().enumerate() {
                if j != s {
                    w *= (t - cj) / (cs[s] - cj);
                }
            }
            w
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;

    fn decay_problem() -> (StatePartition, ButcherTableau, Grid, GeneratorOptions) {
        (
            StatePartition {
                nx2: 1,
                ..Default::default()
            },
            ButcherTableau::backward_euler(),
            Grid {
                t_start: 0.0,
                t_end: 0.1,
                num_shooting_nodes: 1,
                num_intervals: 1,
                equidistant: true,
            },
            GeneratorOptions {
                sensitivity: SensitivityMode::Forward,
                integrator_mode: IntegratorMode::Lifted,
                lift_mode: 4,
                parallel: false,
                measurement_grid: MeasurementGrid::Offline,
                debug: false,
                num_outputs: 0,
            },
        )
    }

    #[test]
    fn valid_decay_plan() {
        let (p, t, g, o) = decay_problem();
        let dynamics = models::builtin("decay").unwrap();
        let plan = ExportPlan::new(&p, &t, &g, &o, &dynamics).expect("valid");
        assert_eq!(plan.ns, 1);
        assert_eq!(plan.dim, 1);
        assert_eq!(plan.eta_len, 1 + 1); // x + dx/dx0
        assert!((plan.a_h[0] - 0.1).abs() < 1e-15);
        assert!((plan.b_h[0] - 0.1).abs() < 1e-15);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn lift_mode_two_is_rejected() {
        let (p, t, g, mut o) = decay_problem();
        o.lift_mode = 2;
        let dynamics = models::builtin("decay").unwrap();
        let err = ExportPlan::new(&p, &t, &g, &o, &dynamics).unwrap_err();
        assert!(err.iter().any(|d| d.code == Some(codes::E0103)));
    }

    #[test]
    fn inexact_requires_factor_reuse() {
        let (p, t, g, mut o) = decay_problem();
        o.sensitivity = SensitivityMode::Inexact;
        o.lift_mode = 1;
        let dynamics = models::builtin("decay").unwrap();
        let err = ExportPlan::new(&p, &t, &g, &o, &dynamics).unwrap_err();
        assert!(err.iter().any(|d| d.code == Some(codes::E0104)));
    }

    #[test]
    fn linear_partitions_report_unsupported() {
        let p = StatePartition {
            nx1: 2,
            nx2: 1,
            nx3: 1,
            ..Default::default()
        };
        assert_eq!(
            PipelineStage::LinearInput.capability(&p),
            Capability::Unsupported(codes::E0202)
        );
        assert_eq!(
            PipelineStage::LinearOutput.capability(&p),
            Capability::Unsupported(codes::E0203)
        );
        assert_eq!(
            PipelineStage::ImplicitCore.capability(&p),
            Capability::Supported
        );
    }

    #[test]
    fn online_grid_without_outputs_warns() {
        let (p, t, g, mut o) = decay_problem();
        o.measurement_grid = MeasurementGrid::Online;
        let dynamics = models::builtin("decay").unwrap();
        let plan = ExportPlan::new(&p, &t, &g, &o, &dynamics).expect("valid");
        assert_eq!(plan.warnings.len(), 1);
        assert_eq!(plan.warnings[0].code, Some(codes::W0101));
    }

    #[test]
    fn collocation_weights_interpolate_at_zero() {
        // Two-point Lagrange basis at t=0 for c = [1/3, 1]:
        // w0 = (0-1)/(1/3-1) = 1.5, w1 = (0-1/3)/(1-1/3) = -0.5.
        let w = lagrange_weights_at(&[1.0 / 3.0, 1.0], 0.0);
        assert!((w[0] - 1.5).abs() < 1e-12);
        assert!((w[1] + 0.5).abs() < 1e-12);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
