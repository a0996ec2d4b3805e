// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all generation phases.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0101`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes.
///
/// `E01xx` — configuration errors (unsupported option value/combination).
/// `E02xx` — recognized but unimplemented partitions and features.
/// `E06xx` — stage-certificate failures (generator postconditions).
/// `W01xx` — warnings.
pub mod codes {
    use super::DiagCode;

    /// Sensitivity mode must be FORWARD or INEXACT.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Integrator mode must be LIFTED.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Lift mode must be 1, 3 or 4.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// INEXACT sensitivities require lift mode 4.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// State-derivative count outside {0} ∪ [NX2, NX].
    pub const E0105: DiagCode = DiagCode("E0105");
    /// Degenerate Butcher tableau or grid constants.
    pub const E0106: DiagCode = DiagCode("E0106");

    /// Continuous output is not implemented.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// Linear input subsystem (NX1 > 0) is not implemented.
    pub const E0202: DiagCode = DiagCode("E0202");
    /// Linear output subsystem (NX3 > 0) is not implemented.
    pub const E0203: DiagCode = DiagCode("E0203");
    /// Non-equidistant control grids are not implemented.
    pub const E0204: DiagCode = DiagCode("E0204");
    /// Algebraic states (NXA > 0) are not implemented.
    pub const E0205: DiagCode = DiagCode("E0205");
    /// Implicit state-derivative dependence (NDX > 0) is not implemented.
    pub const E0206: DiagCode = DiagCode("E0206");
    /// Dynamics oracle lacks a variational sweep function.
    pub const E0207: DiagCode = DiagCode("E0207");

    /// Generation verification failed (G1-G3 obligations not met).
    pub const E0601: DiagCode = DiagCode("E0601");

    /// Online measurement grid has no effect without continuous outputs.
    pub const W0101: DiagCode = DiagCode("W0101");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any generation phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for an error-level diagnostic with a code attached.
    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message).with_code(code)
    }

    /// Shorthand for a warning-level diagnostic with a code attached.
    pub fn warning(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}
