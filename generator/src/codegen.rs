// codegen.rs — C code generation from the statement IR
//
// Renders an `IrModule` into one self-contained, allocation-free C99
// translation unit: static storage for scratch and constants, extern
// storage for the persistent trajectory memory, the collaborator kernels
// verbatim, and one function per IR function.
//
// Preconditions: the module passed generation verification.
// Postconditions: returns `CodegenResult` with the generated C source.
// Failure modes: none (the IR is pre-resolved).
// Side effects: none.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::diag::Diagnostic;
use crate::ir::{Cond, Decl, Directive, Expr, Idx, IrFunction, IrModule, Scalar, Stmt, Storage};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CodegenResult {
    pub generated: GeneratedCode,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct GeneratedCode {
    pub c_source: String,
}

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Scalar type behind the `real_t` typedef.
    pub real_type: &'static str,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            real_type: "double",
        }
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn codegen(module: &IrModule, options: &CodegenOptions) -> CodegenResult {
    let mut ctx = CodegenCtx {
        module,
        options,
        out: String::with_capacity(8192),
    };
    ctx.emit_all();
    CodegenResult {
        generated: GeneratedCode { c_source: ctx.out },
        diagnostics: Vec::new(),
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct CodegenCtx<'a> {
    module: &'a IrModule,
    options: &'a CodegenOptions,
    out: String,
}

impl<'a> CodegenCtx<'a> {
    fn emit_all(&mut self) {
        self.emit_preamble();
        self.emit_storage();
        self.emit_directives();
        self.emit_raw_functions();
        self.emit_functions();
    }

    // ── Phase 1: Preamble ───────────────────────────────────────────────

    fn emit_preamble(&mut self) {
        self.out
            .push_str("/* Generated by lirkgen. Do not edit. */\n");
        self.out.push_str("#include <math.h>\n");
        self.out.push('\n');
        let _ = writeln!(self.out, "typedef {} real_t;", self.options.real_type);
        self.out.push('\n');
    }

    // ── Phase 2: Storage ────────────────────────────────────────────────

    fn emit_storage(&mut self) {
        let consts: Vec<&Decl> = self.storage_class(Storage::StaticConst);
        if !consts.is_empty() {
            self.out.push_str("/* generation-time constants */\n");
            for d in consts {
                let init = d
                    .init
                    .as_ref()
                    .expect("const decl carries an initializer")
                    .iter()
                    .map(|x| format_real(*x))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(
                    self.out,
                    "static const real_t {}[{}] = {{ {} }};",
                    d.name,
                    d.len(),
                    init
                );
            }
            self.out.push('\n');
        }

        let persistent: Vec<&Decl> = self.storage_class(Storage::Variables);
        if !persistent.is_empty() {
            self.out
                .push_str("/* persistent trajectory memory (lifting) */\n");
            for d in persistent {
                let _ = writeln!(self.out, "real_t {}[{}];", d.name, d.len());
            }
            self.out.push('\n');
        }

        let scratch: Vec<&Decl> = self.storage_class(Storage::Workspace);
        if !scratch.is_empty() {
            self.out.push_str("/* workspace */\n");
            for d in scratch {
                let _ = writeln!(self.out, "static real_t {}[{}];", d.name, d.len());
            }
            self.out.push('\n');
        }
    }

    fn storage_class(&self, storage: Storage) -> Vec<&'a Decl> {
        self.module
            .decls
            .iter()
            .filter(|d| d.storage == storage && !d.is_empty())
            .collect()
    }

    // ── Phase 3: Directives ─────────────────────────────────────────────

    fn emit_directives(&mut self) {
        for directive in &self.module.directives {
            match directive {
                Directive::ThreadPrivate(names) => {
                    let _ = writeln!(
                        self.out,
                        "#pragma omp threadprivate( {} )",
                        names.join(", ")
                    );
                    self.out.push('\n');
                }
            }
        }
    }

    // ── Phase 4: Collaborator kernels ───────────────────────────────────

    fn emit_raw_functions(&mut self) {
        for (_, source) in &self.module.raw_functions {
            self.out.push_str(source);
            self.out.push('\n');
        }
    }

    // ── Phase 5: Functions ──────────────────────────────────────────────

    fn emit_functions(&mut self) {
        for f in &self.module.functions {
            self.emit_function(f);
            self.out.push('\n');
        }
    }

    fn emit_function(&mut self, f: &IrFunction) {
        if let Some(doc) = &f.doc {
            let _ = writeln!(self.out, "/* {} */", doc);
        }
        let ret = match f.returns {
            Some(Scalar::Int) => "int",
            Some(Scalar::Real) => "real_t",
            None => "void",
        };
        let mut args: Vec<String> = f
            .params
            .iter()
            .map(|p| format!("real_t* {}", p.name))
            .collect();
        args.extend(f.index_args.iter().map(|n| format!("int {}", n)));
        let _ = writeln!(self.out, "{} {}( {} )", ret, f.name, args.join(", "));
        self.out.push_str("{\n");

        let indices = collect_indices(f);
        if !indices.is_empty() {
            let _ = writeln!(self.out, "int {};", indices.join(", "));
        }
        for local in &f.locals {
            let _ = writeln!(self.out, "real_t {}[{}] = {{ 0 }};", local.name, local.len());
        }

        let is_int = f.returns == Some(Scalar::Int);
        for stmt in &f.body {
            self.emit_stmt(stmt, 0, is_int);
        }
        self.out.push_str("}\n");
    }

    fn emit_stmt(&mut self, stmt: &Stmt, depth: usize, int_return: bool) {
        let pad = "    ".repeat(depth);
        match stmt {
            Stmt::Comment(text) => {
                let _ = writeln!(self.out, "{pad}/* {} */", text);
            }
            Stmt::SetIndex { name, value } => {
                let _ = writeln!(self.out, "{pad}{} = {};", name, render_idx(value));
            }
            Stmt::Assign { dst, src } => {
                let _ = writeln!(
                    self.out,
                    "{pad}{}[{}] = {};",
                    dst.var,
                    render_idx(&dst.at),
                    render_expr(src)
                );
            }
            Stmt::AddAssign { dst, src } => {
                let _ = writeln!(
                    self.out,
                    "{pad}{}[{}] += {};",
                    dst.var,
                    render_idx(&dst.at),
                    render_expr(src)
                );
            }
            Stmt::For { idx, lo, hi, body } => {
                let _ = writeln!(
                    self.out,
                    "{pad}for ({idx} = {}; {idx} < {}; ++{idx}) {{",
                    render_idx(lo),
                    render_idx(hi)
                );
                for s in body {
                    self.emit_stmt(s, depth + 1, int_return);
                }
                let _ = writeln!(self.out, "{pad}}}");
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond_str = match cond {
                    Cond::IdxEq(a, b) => format!("{} == {}", render_idx(a), render_idx(b)),
                    Cond::IdxGt(a, b) => format!("{} > {}", render_idx(a), render_idx(b)),
                    Cond::Lt(a, b) => format!("{} < {}", render_expr(a), render_expr(b)),
                };
                let _ = writeln!(self.out, "{pad}if ({cond_str}) {{");
                for s in then_body {
                    self.emit_stmt(s, depth + 1, int_return);
                }
                if else_body.is_empty() {
                    let _ = writeln!(self.out, "{pad}}}");
                } else {
                    let _ = writeln!(self.out, "{pad}}} else {{");
                    for s in else_body {
                        self.emit_stmt(s, depth + 1, int_return);
                    }
                    let _ = writeln!(self.out, "{pad}}}");
                }
            }
            Stmt::Call { ret, func, args } => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| match &a.offset {
                        Idx::Const(0) => a.var.clone(),
                        offset => format!("&{}[{}]", a.var, render_idx(offset)),
                    })
                    .collect();
                let call = format!("{}( {} )", func, rendered.join(", "));
                match ret {
                    Some(dst) => {
                        let _ = writeln!(
                            self.out,
                            "{pad}{}[{}] = {};",
                            dst.var,
                            render_idx(&dst.at),
                            call
                        );
                    }
                    None => {
                        let _ = writeln!(self.out, "{pad}{};", call);
                    }
                }
            }
            Stmt::Return(e) => {
                if int_return {
                    let _ = writeln!(self.out, "{pad}return (int)({});", render_expr(e));
                } else {
                    let _ = writeln!(self.out, "{pad}return {};", render_expr(e));
                }
            }
        }
    }
}

// ── Rendering helpers ──────────────────────────────────────────────────────

/// Loop indices and computed index locals of a function, in first-use order.
fn collect_indices(f: &IrFunction) -> Vec<String> {
    let mut seen: HashSet<String> = f.index_args.iter().cloned().collect();
    let mut out: Vec<String> = Vec::new();
    fn walk(stmts: &[Stmt], seen: &mut HashSet<String>, out: &mut Vec<String>) {
        for s in stmts {
            match s {
                Stmt::For { idx, body, .. } => {
                    if seen.insert(idx.clone()) {
                        out.push(idx.clone());
                    }
                    walk(body, seen, out);
                }
                Stmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    walk(then_body, seen, out);
                    walk(else_body, seen, out);
                }
                _ => {}
            }
        }
    }
    for name in &f.index_locals {
        if seen.insert(name.clone()) {
            out.push(name.clone());
        }
    }
    walk(&f.body, &mut seen, &mut out);
    out
}

fn render_idx(idx: &Idx) -> String {
    match idx {
        Idx::Const(v) => v.to_string(),
        Idx::Var(name) => name.clone(),
        Idx::Add(a, b) => format!("({} + {})", render_idx(a), render_idx(b)),
        Idx::Mul(a, b) => format!("({} * {})", render_idx(a), render_idx(b)),
    }
}

fn render_expr(e: &Expr) -> String {
    match e {
        Expr::Lit(x) => format_real(*x),
        Expr::Load(s) => format!("{}[{}]", s.var, render_idx(&s.at)),
        Expr::Neg(a) => format!("(-{})", render_expr(a)),
        Expr::Add(a, b) => format!("({} + {})", render_expr(a), render_expr(b)),
        Expr::Sub(a, b) => format!("({} - {})", render_expr(a), render_expr(b)),
        Expr::Mul(a, b) => format!("({} * {})", render_expr(a), render_expr(b)),
        Expr::Div(a, b) => format!("({} / {})", render_expr(a), render_expr(b)),
    }
}

fn format_real(x: f64) -> String {
    if x == x.trunc() && x.abs() < 1e15 {
        format!("{:.1}", x)
    } else {
        format!("{:.16e}", x)
    }
}
