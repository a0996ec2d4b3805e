// model.rs — The differentiation collaborator seam
//
// The symbolic front end is external to this crate: dynamics arrive as
// already-differentiated function bodies in the statement IR. The oracle
// answers the setup-time queries the generator needs (state-derivative
// count, time dependence) and emits the right-hand-side, Jacobian and
// variational-sweep functions into the sink.
//
// Function conventions (all buffers flat, row-major):
//   rhs(in, out)    in  = [x (nx), z (nxa), u (nu), od (nod), t?]
//                   out = residual values, nx2+nxa wide
//   diffs(in, out)  in  as rhs; out = Jacobian, (nx2+nxa) × (nx2+nxa+nu)
//   sweep(in, out)  in  = [x (nx), z (nxa), sx (nx), su (nu), u (nu), od, t?]
//                   out = J_x·sx + J_u·su, nx2+nxa wide

use crate::ir::{IrFunction, StatementSink};

pub trait DynamicsOracle {
    /// Number of differential-state derivatives the right-hand side depends
    /// on implicitly (NDX). Zero for explicit ODEs.
    fn state_derivative_count(&self) -> usize;

    /// Whether the right-hand side reads the time variable.
    fn has_time_dependence(&self) -> bool;

    fn rhs_name(&self) -> &str;

    fn diffs_name(&self) -> &str;

    /// Name of the variational-sweep function, when the oracle provides one.
    /// Required for inexact sensitivity generation.
    fn sweep_name(&self) -> Option<&str>;

    /// Emit the dynamics functions into the sink. The sweep function is
    /// emitted only when `needs_sweep` is set.
    fn emit_functions(&self, sink: &mut dyn StatementSink, needs_sweep: bool);
}

/// A concrete oracle whose functions are IR bodies, typically produced by
/// an external differentiation tool or written by hand for small models.
#[derive(Debug, Clone)]
pub struct IrDynamics {
    pub ndx: usize,
    pub time_dependent: bool,
    pub rhs: IrFunction,
    pub diffs: IrFunction,
    pub sweep: Option<IrFunction>,
}

impl DynamicsOracle for IrDynamics {
    fn state_derivative_count(&self) -> usize {
        self.ndx
    }

    fn has_time_dependence(&self) -> bool {
        self.time_dependent
    }

    fn rhs_name(&self) -> &str {
        &self.rhs.name
    }

    fn diffs_name(&self) -> &str {
        &self.diffs.name
    }

    fn sweep_name(&self) -> Option<&str> {
        self.sweep.as_ref().map(|f| f.name.as_str())
    }

    fn emit_functions(&self, sink: &mut dyn StatementSink, needs_sweep: bool) {
        sink.declare_function(self.rhs.clone());
        sink.declare_function(self.diffs.clone());
        if needs_sweep {
            if let Some(sweep) = &self.sweep {
                sink.declare_function(sweep.clone());
            }
        }
    }
}
