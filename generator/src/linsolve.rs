// linsolve.rs — The linear-solve collaborator seam
//
// The generated routine solves one dense Newton system per sub-interval
// through two entry points: a full factorize-and-solve that returns a
// determinant-magnitude conditioning diagnostic, and a back-substitution-
// only reuse entry that requires a prior factorization of the same matrix.
// The collaborator owns the kernel text spliced into the emitted source
// and the matching executor-side implementation; all factorization state
// lives in the caller's buffers (the kernel itself is reentrant).

use crate::exec::Externals;
use crate::ir::StatementSink;

pub trait LinearSolverGen {
    fn solve_name(&self) -> &str;

    fn solve_reuse_name(&self) -> &str;

    /// Length of the auxiliary buffer the caller must provide (pivot
    /// bookkeeping) for an n×n system.
    fn aux_len(&self, dim: usize) -> usize;

    /// Solver-owned scratch buffers that must be marked execution-context-
    /// private for parallel runs. Empty when all state lives in caller
    /// buffers.
    fn scratch_names(&self) -> Vec<String>;

    /// Emit the kernel routines for an n×n system into the sink.
    fn emit_aux_routines(&self, sink: &mut dyn StatementSink, dim: usize);

    /// Register the executor-side implementation of both entry points.
    fn register_runtime(&self, externals: &mut Externals, dim: usize);
}

// ── Gaussian elimination with partial pivoting ─────────────────────────────

/// Reference kernel: in-place LU with partial pivoting. The factors
/// overwrite the matrix argument and the row permutation is recorded in
/// the auxiliary buffer, which is what makes the reuse entry possible
/// without solver-owned state.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianElimination;

impl GaussianElimination {
    /// Factorize `a` (n×n, row-major) in place and solve `a·x = b` into
    /// `b`. Records the pivot permutation in `aux`. Returns |det a|.
    pub fn solve_in_place(a: &mut [f64], b: &mut [f64], aux: &mut [f64], n: usize) -> f64 {
        assert!(a.len() >= n * n && b.len() >= n && aux.len() >= n, "buffer shapes");
        let mut det = 1.0;
        for j in 0..n {
            let mut piv = j;
            for i in j + 1..n {
                if a[i * n + j].abs() > a[piv * n + j].abs() {
                    piv = i;
                }
            }
            aux[j] = piv as f64;
            if piv != j {
                for k in 0..n {
                    a.swap(j * n + k, piv * n + k);
                }
                b.swap(j, piv);
            }
            det *= a[j * n + j];
            for i in j + 1..n {
                let m = a[i * n + j] / a[j * n + j];
                a[i * n + j] = m;
                for k in j + 1..n {
                    a[i * n + k] -= m * a[j * n + k];
                }
                b[i] -= m * b[j];
            }
        }
        for i in (0..n).rev() {
            for k in i + 1..n {
                b[i] -= a[i * n + k] * b[k];
            }
            b[i] /= a[i * n + i];
        }
        det.abs()
    }

    /// Solve against the factors left in `a` by a prior `solve_in_place`.
    pub fn solve_reuse_in_place(a: &[f64], b: &mut [f64], aux: &[f64], n: usize) {
        assert!(a.len() >= n * n && b.len() >= n && aux.len() >= n, "buffer shapes");
        for j in 0..n {
            let piv = aux[j] as usize;
            if piv != j {
                b.swap(j, piv);
            }
            for i in j + 1..n {
                b[i] -= a[i * n + j] * b[j];
            }
        }
        for i in (0..n).rev() {
            for k in i + 1..n {
                b[i] -= a[i * n + k] * b[k];
            }
            b[i] /= a[i * n + i];
        }
    }
}

impl LinearSolverGen for GaussianElimination {
    fn solve_name(&self) -> &str {
        "lirk_solve"
    }

    fn solve_reuse_name(&self) -> &str {
        "lirk_solve_reuse"
    }

    fn aux_len(&self, dim: usize) -> usize {
        dim
    }

    fn scratch_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn emit_aux_routines(&self, sink: &mut dyn StatementSink, dim: usize) {
        let n = dim;
        let solve = format!(
            "real_t {name}( real_t* A, real_t* b, real_t* aux )\n\
             {{\n\
             int i, j, k, piv;\n\
             real_t m, tmp;\n\
             real_t det = 1.0;\n\
             for (j = 0; j < {n}; ++j) {{\n\
             piv = j;\n\
             for (i = j + 1; i < {n}; ++i) {{\n\
             if (fabs(A[i * {n} + j]) > fabs(A[piv * {n} + j])) piv = i;\n\
             }}\n\
             aux[j] = (real_t)piv;\n\
             if (piv != j) {{\n\
             for (k = 0; k < {n}; ++k) {{\n\
             tmp = A[j * {n} + k]; A[j * {n} + k] = A[piv * {n} + k]; A[piv * {n} + k] = tmp;\n\
             }}\n\
             tmp = b[j]; b[j] = b[piv]; b[piv] = tmp;\n\
             }}\n\
             det *= A[j * {n} + j];\n\
             for (i = j + 1; i < {n}; ++i) {{\n\
             m = A[i * {n} + j] / A[j * {n} + j];\n\
             A[i * {n} + j] = m;\n\
             for (k = j + 1; k < {n}; ++k) A[i * {n} + k] -= m * A[j * {n} + k];\n\
             b[i] -= m * b[j];\n\
             }}\n\
             }}\n\
             for (i = {n} - 1; i >= 0; --i) {{\n\
             for (k = i + 1; k < {n}; ++k) b[i] -= A[i * {n} + k] * b[k];\n\
             b[i] = b[i] / A[i * {n} + i];\n\
             }}\n\
             return fabs(det);\n\
             }}\n",
            name = self.solve_name(),
        );
        let reuse = format!(
            "real_t {name}( real_t* A, real_t* b, real_t* aux )\n\
             {{\n\
             int i, j, k, piv;\n\
             real_t tmp;\n\
             for (j = 0; j < {n}; ++j) {{\n\
             piv = (int)aux[j];\n\
             if (piv != j) {{\n\
             tmp = b[j]; b[j] = b[piv]; b[piv] = tmp;\n\
             }}\n\
             for (i = j + 1; i < {n}; ++i) b[i] -= A[i * {n} + j] * b[j];\n\
             }}\n\
             for (i = {n} - 1; i >= 0; --i) {{\n\
             for (k = i + 1; k < {n}; ++k) b[i] -= A[i * {n} + k] * b[k];\n\
             b[i] = b[i] / A[i * {n} + i];\n\
             }}\n\
             return 0.0;\n\
             }}\n",
            name = self.solve_reuse_name(),
        );
        sink.add_raw_function(self.solve_name().into(), solve);
        sink.add_raw_function(self.solve_reuse_name().into(), reuse);
    }

    fn register_runtime(&self, externals: &mut Externals, dim: usize) {
        let n = dim;
        externals.register(
            self.solve_name(),
            Box::new(move |args: &mut [Vec<f64>]| {
                let (a, rest) = args.split_at_mut(1);
                let (b, aux) = rest.split_at_mut(1);
                GaussianElimination::solve_in_place(&mut a[0], &mut b[0], &mut aux[0], n)
            }),
        );
        externals.register(
            self.solve_reuse_name(),
            Box::new(move |args: &mut [Vec<f64>]| {
                let (a, rest) = args.split_at_mut(1);
                let (b, aux) = rest.split_at_mut(1);
                GaussianElimination::solve_reuse_in_place(&a[0], &mut b[0], &aux[0], n);
                0.0
            }),
        );
    }
}
