// models.rs — Built-in demonstration dynamics
//
// Hand-differentiated IR bodies for small reference systems, used by the
// CLI driver and the test-suite. Production users supply their own
// `DynamicsOracle` produced by an external differentiation tool.

use crate::ir::{assign, c, l, lit, param, slot, Expr, IrFunction, Stmt};
use crate::model::IrDynamics;

/// `out[i] = e` — every dynamics function writes through an `out` buffer.
fn assign_out(i: i64, e: Expr) -> Stmt {
    assign(slot("out", c(i)), e)
}

/// Look up a built-in model by name.
pub fn builtin(name: &str) -> Option<IrDynamics> {
    match name {
        "decay" => Some(linear_decay(-1.0)),
        "vdp" => Some(van_der_pol(1.0)),
        _ => None,
    }
}

/// Names of all built-in models, for CLI error messages.
pub fn builtin_names() -> &'static [&'static str] {
    &["decay", "vdp"]
}

/// One-state linear system `dx/dt = rate · x`, no controls.
pub fn linear_decay(rate: f64) -> IrDynamics {
    let mut rhs = IrFunction::new("lirk_rhs");
    rhs.doc = Some(format!("dx/dt = {rate} * x"));
    rhs.params = vec![param("in", 1), param("out", 1)];
    rhs.body = vec![assign_out(0, lit(rate) * l("in", c(0)))];

    let mut diffs = IrFunction::new("lirk_diffs");
    diffs.params = vec![param("in", 1), param("out", 1)];
    diffs.body = vec![assign_out(0, lit(rate))];

    // in = [x, sx]
    let mut sweep = IrFunction::new("lirk_diff_sweep");
    sweep.params = vec![param("in", 2), param("out", 1)];
    sweep.body = vec![assign_out(0, lit(rate) * l("in", c(1)))];

    IrDynamics {
        ndx: 0,
        time_dependent: false,
        rhs,
        diffs,
        sweep: Some(sweep),
    }
}

/// Van der Pol oscillator with one control:
///   dx0/dt = x1
///   dx1/dt = mu·(1 − x0²)·x1 − x0 + u
pub fn van_der_pol(mu: f64) -> IrDynamics {
    let x0 = || l("in", c(0));
    let x1 = || l("in", c(1));
    let u = || l("in", c(2));
    // ∂f1/∂x0 = −2·mu·x0·x1 − 1, ∂f1/∂x1 = mu·(1 − x0²)
    let df1_dx0 = || lit(-2.0 * mu) * x0() * x1() - lit(1.0);
    let df1_dx1 = || lit(mu) * (lit(1.0) - x0() * x0());

    let mut rhs = IrFunction::new("lirk_rhs");
    rhs.doc = Some("Van der Pol oscillator".into());
    rhs.params = vec![param("in", 3), param("out", 2)];
    rhs.body = vec![
        assign_out(0, x1()),
        assign_out(1, lit(mu) * (lit(1.0) - x0() * x0()) * x1() - x0() + u()),
    ];

    // Jacobian rows over [x0, x1, u], row-major 2×3.
    let mut diffs = IrFunction::new("lirk_diffs");
    diffs.params = vec![param("in", 3), param("out", 6)];
    diffs.body = vec![
        assign_out(0, lit(0.0)),
        assign_out(1, lit(1.0)),
        assign_out(2, lit(0.0)),
        assign_out(3, df1_dx0()),
        assign_out(4, df1_dx1()),
        assign_out(5, lit(1.0)),
    ];

    // in = [x0, x1, sx0, sx1, su, u]
    let mut sweep = IrFunction::new("lirk_diff_sweep");
    sweep.params = vec![param("in", 6), param("out", 2)];
    let sx0 = || l("in", c(2));
    let sx1 = || l("in", c(3));
    let su = || l("in", c(4));
    sweep.body = vec![
        assign_out(0, sx1()),
        assign_out(1, df1_dx0() * sx0() + df1_dx1() * sx1() + su()),
    ];

    IrDynamics {
        ndx: 0,
        time_dependent: false,
        rhs,
        diffs,
        sweep: Some(sweep),
    }
}
