// exec.rs — Reference executor for the statement IR
//
// Interprets an `IrModule` over flat f64 arenas, standing in for the
// embedded target: module-level buffers persist across calls exactly like
// the static storage of the emitted C, so the lifting memory behaves the
// same way the generated routine's does. Used by the test-suite and the
// CLI `--simulate` path.
//
// Preconditions: the module is self-contained (every referenced symbol is
//                a declaration, parameter, local, or registered external).
// Postconditions: persistent buffers reflect all writes of the call.
// Failure modes: unknown symbols, shape mismatches (reported as ExecError).
// Side effects: mutates the machine's arenas and the caller's buffers.

use std::collections::HashMap;
use std::fmt;

use crate::ir::{CallArg, Cond, Expr, Idx, IrFunction, IrModule, Slot, Stmt};

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ExecError {
    UnknownFunction(String),
    UnknownBuffer(String),
    UnknownIndex(String),
    OutOfBounds {
        var: String,
        index: i64,
        len: usize,
    },
    ArgMismatch {
        func: String,
        expected: usize,
        got: usize,
    },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::UnknownFunction(name) => write!(f, "unknown function `{name}`"),
            ExecError::UnknownBuffer(name) => write!(f, "unknown buffer `{name}`"),
            ExecError::UnknownIndex(name) => write!(f, "unknown index variable `{name}`"),
            ExecError::OutOfBounds { var, index, len } => {
                write!(f, "index {index} out of bounds for `{var}` (len {len})")
            }
            ExecError::ArgMismatch {
                func,
                expected,
                got,
            } => write!(f, "`{func}` expects {expected} buffer arguments, got {got}"),
        }
    }
}

impl std::error::Error for ExecError {}

// ── External functions ─────────────────────────────────────────────────────

/// An externally-implemented routine. Receives copies of its buffer
/// arguments (written back after the call) and returns a scalar.
pub type ExternalFn = Box<dyn FnMut(&mut [Vec<f64>]) -> f64>;

#[derive(Default)]
pub struct Externals {
    fns: HashMap<String, ExternalFn>,
}

impl Externals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, f: ExternalFn) {
        self.fns.insert(name.into(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }
}

// ── Call frame ─────────────────────────────────────────────────────────────

struct Frame {
    bufs: HashMap<String, Vec<f64>>,
    idx: HashMap<String, i64>,
}

// ── Machine ────────────────────────────────────────────────────────────────

pub struct Machine<'m> {
    module: &'m IrModule,
    mem: HashMap<String, Vec<f64>>,
    externals: Externals,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m IrModule) -> Self {
        Self::with_externals(module, Externals::new())
    }

    pub fn with_externals(module: &'m IrModule, externals: Externals) -> Self {
        let mut mem = HashMap::new();
        for d in &module.decls {
            let data = d.init.clone().unwrap_or_else(|| vec![0.0; d.len()]);
            mem.insert(d.name.clone(), data);
        }
        Self {
            module,
            mem,
            externals,
        }
    }

    /// Read a persistent buffer (trajectory memory inspection in tests).
    pub fn buffer(&self, name: &str) -> Option<&[f64]> {
        self.mem.get(name).map(|v| v.as_slice())
    }

    pub fn buffer_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        self.mem.get_mut(name)
    }

    /// Call a module function with caller-owned buffer arguments, bound to
    /// the function's parameters by position, plus integer index arguments.
    pub fn call(
        &mut self,
        func: &str,
        bufs: &mut [&mut [f64]],
        idx_args: &[i64],
    ) -> Result<f64, ExecError> {
        let f = self
            .module
            .find_function(func)
            .ok_or_else(|| ExecError::UnknownFunction(func.into()))?;
        if f.params.len() != bufs.len() || f.index_args.len() != idx_args.len() {
            return Err(ExecError::ArgMismatch {
                func: func.into(),
                expected: f.params.len(),
                got: bufs.len(),
            });
        }
        let owned: Vec<Vec<f64>> = bufs.iter().map(|b| b.to_vec()).collect();
        let (results, ret) = self.call_owned(f, owned, idx_args)?;
        for (dst, src) in bufs.iter_mut().zip(results) {
            dst.copy_from_slice(&src);
        }
        Ok(ret)
    }

    fn call_owned(
        &mut self,
        f: &IrFunction,
        args: Vec<Vec<f64>>,
        idx_args: &[i64],
    ) -> Result<(Vec<Vec<f64>>, f64), ExecError> {
        let mut frame = Frame {
            bufs: HashMap::new(),
            idx: HashMap::new(),
        };
        for (p, data) in f.params.iter().zip(args) {
            frame.bufs.insert(p.name.clone(), data);
        }
        for (name, val) in f.index_args.iter().zip(idx_args) {
            frame.idx.insert(name.clone(), *val);
        }
        for local in &f.locals {
            frame.bufs.insert(local.name.clone(), vec![0.0; local.len()]);
        }
        let ret = self.exec_stmts(&mut frame, &f.body)?.unwrap_or(0.0);
        let results = f
            .params
            .iter()
            .map(|p| frame.bufs.remove(&p.name).expect("param frame entry"))
            .collect();
        Ok((results, ret))
    }

    fn exec_stmts(&mut self, frame: &mut Frame, stmts: &[Stmt]) -> Result<Option<f64>, ExecError> {
        for stmt in stmts {
            match stmt {
                Stmt::Comment(_) => {}
                Stmt::SetIndex { name, value } => {
                    let val = eval_idx(frame, value)?;
                    frame.idx.insert(name.clone(), val);
                }
                Stmt::Assign { dst, src } => {
                    let val = self.eval(frame, src)?;
                    self.store(frame, dst, val)?;
                }
                Stmt::AddAssign { dst, src } => {
                    let val = self.eval(frame, src)?;
                    let old = self.load(frame, dst)?;
                    self.store(frame, dst, old + val)?;
                }
                Stmt::For { idx, lo, hi, body } => {
                    let lo = eval_idx(frame, lo)?;
                    let hi = eval_idx(frame, hi)?;
                    let saved = frame.idx.get(idx).copied();
                    for i in lo..hi {
                        frame.idx.insert(idx.clone(), i);
                        if let Some(ret) = self.exec_stmts(frame, body)? {
                            return Ok(Some(ret));
                        }
                    }
                    match saved {
                        Some(prev) => {
                            frame.idx.insert(idx.clone(), prev);
                        }
                        None => {
                            frame.idx.remove(idx);
                        }
                    }
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    let taken = match cond {
                        Cond::IdxEq(a, b) => eval_idx(frame, a)? == eval_idx(frame, b)?,
                        Cond::IdxGt(a, b) => eval_idx(frame, a)? > eval_idx(frame, b)?,
                        Cond::Lt(a, b) => self.eval(frame, a)? < self.eval(frame, b)?,
                    };
                    let body = if taken { then_body } else { else_body };
                    if let Some(ret) = self.exec_stmts(frame, body)? {
                        return Ok(Some(ret));
                    }
                }
                Stmt::Call { ret, func, args } => {
                    let val = self.run_call(frame, func, args)?;
                    if let Some(dst) = ret {
                        self.store(frame, dst, val)?;
                    }
                }
                Stmt::Return(e) => {
                    return Ok(Some(self.eval(frame, e)?));
                }
            }
        }
        Ok(None)
    }

    fn run_call(
        &mut self,
        frame: &mut Frame,
        func: &str,
        args: &[CallArg],
    ) -> Result<f64, ExecError> {
        // Callee parameter lengths decide the slice widths; externals and
        // raw routines take the rest of each source buffer.
        let callee = self.module.find_function(func);
        let mut slices: Vec<(String, usize, usize)> = Vec::with_capacity(args.len());
        let mut copies: Vec<Vec<f64>> = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            let offset = eval_idx(frame, &a.offset)?;
            let src = self.resolve(frame, &a.var)?;
            if offset < 0 || offset as usize > src.len() {
                return Err(ExecError::OutOfBounds {
                    var: a.var.clone(),
                    index: offset,
                    len: src.len(),
                });
            }
            let offset = offset as usize;
            let end = match callee {
                Some(f) => {
                    let want = f.params.get(i).map(|p| p.len).ok_or(ExecError::ArgMismatch {
                        func: func.into(),
                        expected: f.params.len(),
                        got: args.len(),
                    })?;
                    offset + want
                }
                None => src.len(),
            };
            if end > src.len() {
                return Err(ExecError::OutOfBounds {
                    var: a.var.clone(),
                    index: end as i64,
                    len: src.len(),
                });
            }
            slices.push((a.var.clone(), offset, end));
            copies.push(src[offset..end].to_vec());
        }

        let ret = match callee {
            Some(f) => {
                let (results, ret) = self.call_owned(f, copies, &[])?;
                copies = results;
                ret
            }
            None => {
                let ext = self
                    .externals
                    .fns
                    .get_mut(func)
                    .ok_or_else(|| ExecError::UnknownFunction(func.into()))?;
                ext(&mut copies)
            }
        };

        for ((var, offset, end), data) in slices.into_iter().zip(copies) {
            let dst = self.resolve_mut(frame, &var)?;
            dst[offset..end].copy_from_slice(&data);
        }
        Ok(ret)
    }

    fn resolve<'a>(&'a self, frame: &'a Frame, var: &str) -> Result<&'a [f64], ExecError> {
        if let Some(buf) = frame.bufs.get(var) {
            return Ok(buf);
        }
        self.mem
            .get(var)
            .map(|v| v.as_slice())
            .ok_or_else(|| ExecError::UnknownBuffer(var.into()))
    }

    fn resolve_mut<'a>(
        &'a mut self,
        frame: &'a mut Frame,
        var: &str,
    ) -> Result<&'a mut [f64], ExecError> {
        if let Some(buf) = frame.bufs.get_mut(var) {
            return Ok(buf);
        }
        self.mem
            .get_mut(var)
            .map(|v| v.as_mut_slice())
            .ok_or_else(|| ExecError::UnknownBuffer(var.into()))
    }

    fn load(&self, frame: &Frame, s: &Slot) -> Result<f64, ExecError> {
        let at = eval_idx(frame, &s.at)?;
        let buf = self.resolve(frame, &s.var)?;
        if at < 0 || at as usize >= buf.len() {
            return Err(ExecError::OutOfBounds {
                var: s.var.clone(),
                index: at,
                len: buf.len(),
            });
        }
        Ok(buf[at as usize])
    }

    fn store(&mut self, frame: &mut Frame, s: &Slot, val: f64) -> Result<(), ExecError> {
        let at = eval_idx(frame, &s.at)?;
        let buf = self.resolve_mut(frame, &s.var)?;
        if at < 0 || at as usize >= buf.len() {
            return Err(ExecError::OutOfBounds {
                var: s.var.clone(),
                index: at,
                len: buf.len(),
            });
        }
        buf[at as usize] = val;
        Ok(())
    }

    fn eval(&self, frame: &Frame, e: &Expr) -> Result<f64, ExecError> {
        Ok(match e {
            Expr::Lit(x) => *x,
            Expr::Load(s) => self.load(frame, s)?,
            Expr::Neg(a) => -self.eval(frame, a)?,
            Expr::Add(a, b) => self.eval(frame, a)? + self.eval(frame, b)?,
            Expr::Sub(a, b) => self.eval(frame, a)? - self.eval(frame, b)?,
            Expr::Mul(a, b) => self.eval(frame, a)? * self.eval(frame, b)?,
            Expr::Div(a, b) => self.eval(frame, a)? / self.eval(frame, b)?,
        })
    }
}

fn eval_idx(frame: &Frame, idx: &Idx) -> Result<i64, ExecError> {
    Ok(match idx {
        Idx::Const(v) => *v,
        Idx::Var(name) => *frame
            .idx
            .get(name)
            .ok_or_else(|| ExecError::UnknownIndex(name.clone()))?,
        Idx::Add(a, b) => eval_idx(frame, a)? + eval_idx(frame, b)?,
        Idx::Mul(a, b) => eval_idx(frame, a)? * eval_idx(frame, b)?,
    })
}
