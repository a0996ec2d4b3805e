// phase.rs — Generation phase descriptors and stage certificates
//
// Declares the generator's 6 phases, their execution order, and the
// machine-checkable postconditions a finished run must satisfy. Any
// validation failure transitions directly to the `Failed` terminal state
// with zero emitted statements.

// ── Phase identifiers ──────────────────────────────────────────────────────

/// Identifies each generation phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseId {
    Validate,
    DeclareBuffers,
    EmitAuxFunctions,
    EmitLoopBody,
    EmitPostLoopFixup,
    EmitDiagnostic,
}

/// Terminal states of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Done,
    Failed,
}

/// All phases in execution order.
pub const ALL_PHASES: [PhaseId; 6] = [
    PhaseId::Validate,
    PhaseId::DeclareBuffers,
    PhaseId::EmitAuxFunctions,
    PhaseId::EmitLoopBody,
    PhaseId::EmitPostLoopFixup,
    PhaseId::EmitDiagnostic,
];

// ── Phase descriptor ───────────────────────────────────────────────────────

/// Static metadata about a generation phase.
pub struct PhaseDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Invariant the phase establishes.
    pub invariant: &'static str,
}

/// Return the static descriptor for a given phase.
pub fn descriptor(id: PhaseId) -> PhaseDescriptor {
    match id {
        PhaseId::Validate => PhaseDescriptor {
            name: "validate",
            invariant: "configuration accepted; every derived constant finite",
        },
        PhaseId::DeclareBuffers => PhaseDescriptor {
            name: "declare_buffers",
            invariant: "all trajectory and scratch buffers declared with fixed shapes",
        },
        PhaseId::EmitAuxFunctions => PhaseDescriptor {
            name: "emit_aux_functions",
            invariant: "dynamics and solver routines present in the module",
        },
        PhaseId::EmitLoopBody => PhaseDescriptor {
            name: "emit_loop_body",
            invariant: "per-interval update and sensitivity statements emitted",
        },
        PhaseId::EmitPostLoopFixup => PhaseDescriptor {
            name: "emit_post_loop_fixup",
            invariant: "previous-iterate buffers persisted",
        },
        PhaseId::EmitDiagnostic => PhaseDescriptor {
            name: "emit_diagnostic",
            invariant: "conditioning classification and return value emitted",
        },
    }
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a stage met its postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

/// Evidence for generator postconditions (G1-G3).
#[derive(Debug, Clone)]
pub struct GenCert {
    /// G1: The integration routine was declared in the module.
    pub g1_integrate_present: bool,
    /// G2: Every symbol referenced by an emitted statement was declared.
    pub g2_symbols_declared: bool,
    /// G3: Emission was all-or-nothing (a failed run left the sink empty).
    pub g3_all_or_nothing: bool,
}

impl StageCert for GenCert {
    fn all_pass(&self) -> bool {
        self.g1_integrate_present && self.g2_symbols_declared && self.g3_all_or_nothing
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("G1_integrate_present", self.g1_integrate_present),
            ("G2_symbols_declared", self.g2_symbols_declared),
            ("G3_all_or_nothing", self.g3_all_or_nothing),
        ]
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered_and_named() {
        assert_eq!(ALL_PHASES[0], PhaseId::Validate);
        assert_eq!(ALL_PHASES[5], PhaseId::EmitDiagnostic);
        for p in &ALL_PHASES {
            assert!(!descriptor(*p).name.is_empty());
            assert!(!descriptor(*p).invariant.is_empty());
        }
    }

    #[test]
    fn cert_obligations_reported_in_order() {
        let cert = GenCert {
            g1_integrate_present: true,
            g2_symbols_declared: false,
            g3_all_or_nothing: true,
        };
        assert!(!cert.all_pass());
        let failed: Vec<_> = cert
            .obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect();
        assert_eq!(failed, vec!["G2_symbols_declared"]);
    }
}
