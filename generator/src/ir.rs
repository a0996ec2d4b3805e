//! Statement IR — the low-level representation the generator emits into.
//!
//! An `IrModule` is a self-contained, pre-resolved description of the
//! generated translation unit: flat buffer declarations, functions whose
//! bodies are statement lists over affine index arithmetic, and module
//! directives. The C renderer and the reference executor both read it
//! without consulting the generator.
//!
//! The generator only writes through the `StatementSink` trait and never
//! reads emitted content back.

use std::ops;

// ── Declarations ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Real,
    Int,
}

/// Storage class of a declared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Scratch shared by the routine's internals; rebuilt every call.
    Workspace,
    /// Persistent across calls (the lifting memory).
    Variables,
    /// Constant data baked in at generation time.
    StaticConst,
}

/// A flat buffer declaration. `rows`/`cols` document the logical shape;
/// storage and addressing are one-dimensional (`rows * cols`).
#[derive(Debug, Clone)]
pub struct Decl {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub scalar: Scalar,
    pub storage: Storage,
    /// Row-major initializer; required for `StaticConst`.
    pub init: Option<Vec<f64>>,
}

impl Decl {
    pub fn workspace(name: &str, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            rows,
            cols,
            scalar: Scalar::Real,
            storage: Storage::Workspace,
            init: None,
        }
    }

    pub fn variables(name: &str, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            rows,
            cols,
            scalar: Scalar::Real,
            storage: Storage::Variables,
            init: None,
        }
    }

    pub fn const_data(name: &str, rows: usize, cols: usize, init: Vec<f64>) -> Self {
        assert_eq!(init.len(), rows * cols, "initializer shape mismatch");
        Self {
            name: name.into(),
            rows,
            cols,
            scalar: Scalar::Real,
            storage: Storage::StaticConst,
            init: Some(init),
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Affine index expressions ───────────────────────────────────────────────

/// Integer index expression, affine in loop indices and index locals.
#[derive(Debug, Clone, PartialEq)]
pub enum Idx {
    Const(i64),
    Var(String),
    Add(Box<Idx>, Box<Idx>),
    Mul(Box<Idx>, Box<Idx>),
}

/// Constant index.
pub fn c(v: i64) -> Idx {
    Idx::Const(v)
}

/// Index variable reference.
pub fn v(name: &str) -> Idx {
    Idx::Var(name.into())
}

impl ops::Add for Idx {
    type Output = Idx;
    fn add(self, rhs: Idx) -> Idx {
        Idx::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Idx {
    type Output = Idx;
    fn sub(self, rhs: Idx) -> Idx {
        Idx::Add(Box::new(self), Box::new(Idx::Mul(Box::new(c(-1)), Box::new(rhs))))
    }
}

impl ops::Mul for Idx {
    type Output = Idx;
    fn mul(self, rhs: Idx) -> Idx {
        Idx::Mul(Box::new(self), Box::new(rhs))
    }
}

// ── Real-valued expressions ────────────────────────────────────────────────

/// A single element of a declared or parameter buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub var: String,
    pub at: Idx,
}

/// Element reference.
pub fn slot(var: &str, at: Idx) -> Slot {
    Slot { var: var.into(), at }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(f64),
    Load(Slot),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

/// Load of a buffer element.
pub fn l(var: &str, at: Idx) -> Expr {
    Expr::Load(slot(var, at))
}

/// Floating literal.
pub fn lit(x: f64) -> Expr {
    Expr::Lit(x)
}

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::Div(Box::new(self), Box::new(rhs))
    }
}

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

// ── Statements ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    IdxEq(Idx, Idx),
    IdxGt(Idx, Idx),
    Lt(Expr, Expr),
}

/// A buffer argument to a function call: the callee receives the slice
/// starting at `offset`, of the callee parameter's declared length.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub var: String,
    pub offset: Idx,
}

pub fn arg(var: &str) -> CallArg {
    CallArg {
        var: var.into(),
        offset: c(0),
    }
}

pub fn arg_at(var: &str, offset: Idx) -> CallArg {
    CallArg {
        var: var.into(),
        offset,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Comment(String),
    /// Bind an index local to an affine expression.
    SetIndex { name: String, value: Idx },
    Assign { dst: Slot, src: Expr },
    AddAssign { dst: Slot, src: Expr },
    For {
        idx: String,
        lo: Idx,
        hi: Idx,
        body: Vec<Stmt>,
    },
    If {
        cond: Cond,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    Call {
        /// Optional scalar return destination.
        ret: Option<Slot>,
        func: String,
        args: Vec<CallArg>,
    },
    Return(Expr),
}

/// Build a counted loop.
pub fn for_loop(idx: &str, lo: Idx, hi: Idx, body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        idx: idx.into(),
        lo,
        hi,
        body,
    }
}

pub fn assign(dst: Slot, src: Expr) -> Stmt {
    Stmt::Assign { dst, src }
}

pub fn add_assign(dst: Slot, src: Expr) -> Stmt {
    Stmt::AddAssign { dst, src }
}

// ── Functions ──────────────────────────────────────────────────────────────

/// A buffer parameter of an IR function.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub len: usize,
}

pub fn param(name: &str, len: usize) -> Param {
    Param {
        name: name.into(),
        len,
    }
}

#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<Param>,
    /// Integer-valued arguments (e.g. the shooting-node index).
    pub index_args: Vec<String>,
    /// Names of index locals assigned via `SetIndex`.
    pub index_locals: Vec<String>,
    /// Local real buffers, zero-initialized per call.
    pub locals: Vec<Decl>,
    pub returns: Option<Scalar>,
    pub body: Vec<Stmt>,
    pub doc: Option<String>,
}

impl IrFunction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            index_args: Vec::new(),
            index_locals: Vec::new(),
            locals: Vec::new(),
            returns: None,
            body: Vec::new(),
            doc: None,
        }
    }
}

// ── Module ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Directive {
    /// Mark the named buffers execution-context-private for parallel runs.
    ThreadPrivate(Vec<String>),
}

/// The sink the generator emits into. Implementations must accept entries
/// in emission order; the generator never reads back.
pub trait StatementSink {
    fn declare_variable(&mut self, decl: Decl);
    fn declare_function(&mut self, func: IrFunction);
    fn add_directive(&mut self, directive: Directive);
    /// Pre-rendered collaborator routine (e.g. the linear-solve kernel),
    /// spliced verbatim by textual backends and resolved by name at
    /// execution time.
    fn add_raw_function(&mut self, name: String, source: String);
}

#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub decls: Vec<Decl>,
    pub functions: Vec<IrFunction>,
    pub directives: Vec<Directive>,
    /// (name, C source) pairs of canned collaborator routines.
    pub raw_functions: Vec<(String, String)>,
}

impl StatementSink for IrModule {
    fn declare_variable(&mut self, decl: Decl) {
        self.decls.push(decl);
    }

    fn declare_function(&mut self, func: IrFunction) {
        self.functions.push(func);
    }

    fn add_directive(&mut self, directive: Directive) {
        self.directives.push(directive);
    }

    fn add_raw_function(&mut self, name: String, source: String) {
        self.raw_functions.push((name, source));
    }
}

impl IrModule {
    pub fn is_untouched(&self) -> bool {
        self.decls.is_empty()
            && self.functions.is_empty()
            && self.directives.is_empty()
            && self.raw_functions.is_empty()
    }

    pub fn find_decl(&self, name: &str) -> Option<&Decl> {
        self.decls.iter().find(|d| d.name == name)
    }

    pub fn find_function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Total statement count across all functions, nested statements
    /// included. Zero for a failed (all-or-nothing) run.
    pub fn stmt_count(&self) -> usize {
        fn count(stmts: &[Stmt]) -> usize {
            stmts
                .iter()
                .map(|s| match s {
                    Stmt::For { body, .. } => 1 + count(body),
                    Stmt::If {
                        then_body,
                        else_body,
                        ..
                    } => 1 + count(then_body) + count(else_body),
                    _ => 1,
                })
                .sum()
        }
        self.functions.iter().map(|f| count(&f.body)).sum()
    }
}
