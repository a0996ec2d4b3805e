// generator.rs — Lifted-IRK generation
//
// Emits the per-shooting-interval integration routine: one Newton solve
// (or factorization reuse) per sub-interval on the stage-derivative
// system, forward sensitivity propagation with respect to every state and
// control direction, the explicit Runge-Kutta update, and the chain-rule
// combination across sub-intervals. Persistent trajectory buffers carry
// the lifting memory across outer optimization iterations.
//
// Preconditions: none (validation is the first phase).
// Postconditions: on success the sink holds the declarations, auxiliary
//                 functions and the integration routine; the returned
//                 certificate's obligations G1-G3 hold.
// Failure modes: configuration diagnostics; nothing is emitted on failure.
// Side effects: none beyond the sink.

use std::collections::HashSet;

use crate::config::{ButcherTableau, GeneratorOptions, Grid, LiftScheme, StatePartition};
use crate::diag::{codes, Diagnostic};
use crate::ir::{
    add_assign, arg, arg_at, assign, c, for_loop, l, lit, param, slot, v, Cond, Decl, Directive,
    IrFunction, IrModule, Scalar, StatementSink, Stmt,
};
use crate::linsolve::LinearSolverGen;
use crate::model::DynamicsOracle;
use crate::phase::{GenCert, PhaseId, StageCert};
use crate::plan::ExportPlan;

// ── Emitted symbol names ───────────────────────────────────────────────────

pub const INTEGRATE: &str = "lirk_integrate";
const ETA: &str = "eta";
const NODE: &str = "node";
const TTT: &str = "rk_ttt";
const XXX: &str = "rk_xxx";
const KTRAJ: &str = "rk_ktraj";
const DIFFK_TRAJ: &str = "rk_diffktraj";
const DIFFK: &str = "rk_diffk";
const XPREV: &str = "rk_xprev";
const UPREV: &str = "rk_uprev";
const DELTA: &str = "rk_delta";
const MAT: &str = "rk_mat";
const RHS_B: &str = "rk_b";
const AUX: &str = "rk_aux";
const DIFFS_TEMP: &str = "rk_diffstemp";
const DIFFS_PREV: &str = "rk_diffsprev";
const DIFFS_NEW: &str = "rk_diffsnew";
const RHS_TEMP: &str = "rk_rhstemp";
const SEED: &str = "rk_seed";
const STAGE_VALUES: &str = "rk_stagevalues";
const DEBUG_MAT: &str = "rk_debugmat";
const AH: &str = "lirk_ah";
const BH: &str = "lirk_bh";
const CMAT: &str = "lirk_c";
const COLL0: &str = "lirk_coll0";
const DET: &str = "det";
const ERR: &str = "rk_error";

// ── Public results ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct GenReport {
    pub integrate_name: String,
    pub warnings: Vec<Diagnostic>,
    pub cert: GenCert,
    pub phases: Vec<PhaseId>,
}

#[derive(Debug)]
pub struct Generated {
    pub module: IrModule,
    pub report: GenReport,
}

/// Run the full generation pipeline and return the emitted module.
pub fn generate(
    partition: &StatePartition,
    tableau: &ButcherTableau,
    grid: &Grid,
    options: &GeneratorOptions,
    dynamics: &dyn DynamicsOracle,
    solver: &dyn LinearSolverGen,
) -> Result<Generated, Vec<Diagnostic>> {
    generate_with_observer(partition, tableau, grid, options, dynamics, solver, |_| {})
}

/// Run generation against a caller-supplied sink. Emission is
/// all-or-nothing: a validation failure leaves the sink untouched.
pub fn generate_into(
    partition: &StatePartition,
    tableau: &ButcherTableau,
    grid: &Grid,
    options: &GeneratorOptions,
    dynamics: &dyn DynamicsOracle,
    solver: &dyn LinearSolverGen,
    sink: &mut dyn StatementSink,
) -> Result<GenReport, Vec<Diagnostic>> {
    let generated = generate(partition, tableau, grid, options, dynamics, solver)?;
    let module = generated.module;
    for d in module.decls {
        sink.declare_variable(d);
    }
    for directive in module.directives {
        sink.add_directive(directive);
    }
    for (name, source) in module.raw_functions {
        sink.add_raw_function(name, source);
    }
    for f in module.functions {
        sink.declare_function(f);
    }
    Ok(generated.report)
}

pub fn generate_with_observer(
    partition: &StatePartition,
    tableau: &ButcherTableau,
    grid: &Grid,
    options: &GeneratorOptions,
    dynamics: &dyn DynamicsOracle,
    solver: &dyn LinearSolverGen,
    mut on_phase: impl FnMut(PhaseId),
) -> Result<Generated, Vec<Diagnostic>> {
    let mut phases = Vec::new();

    on_phase(PhaseId::Validate);
    let plan = ExportPlan::new(partition, tableau, grid, options, dynamics)?;
    phases.push(PhaseId::Validate);

    let mut module = IrModule::default();
    let ctx = Ctx::new(&plan, dynamics, solver);

    on_phase(PhaseId::DeclareBuffers);
    ctx.declare_buffers(&mut module);
    phases.push(PhaseId::DeclareBuffers);

    on_phase(PhaseId::EmitAuxFunctions);
    if plan.parallel {
        module.add_directive(Directive::ThreadPrivate(ctx.private_scratch_names()));
    }
    dynamics.emit_functions(&mut module, plan.inexact());
    solver.emit_aux_routines(&mut module, plan.dim);
    phases.push(PhaseId::EmitAuxFunctions);

    // The loop body, post-loop fixup and diagnostic all land in the one
    // integration routine.
    on_phase(PhaseId::EmitLoopBody);
    let mut integrate = ctx.integrate_signature();
    integrate.body = ctx.integrate_body();
    phases.push(PhaseId::EmitLoopBody);
    on_phase(PhaseId::EmitPostLoopFixup);
    integrate.body.extend(ctx.post_loop_fixup());
    phases.push(PhaseId::EmitPostLoopFixup);
    on_phase(PhaseId::EmitDiagnostic);
    integrate.body.extend(ctx.health_classification());
    module.declare_function(integrate);
    phases.push(PhaseId::EmitDiagnostic);

    let cert = verify_generation(&module);
    if !cert.all_pass() {
        let failed: Vec<_> = cert
            .obligations()
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect();
        return Err(vec![Diagnostic::error(
            codes::E0601,
            format!("generation verification failed: {}", failed.join(", ")),
        )]);
    }

    Ok(Generated {
        module,
        report: GenReport {
            integrate_name: INTEGRATE.into(),
            warnings: plan.warnings.clone(),
            cert,
            phases,
        },
    })
}

// ── Verification ───────────────────────────────────────────────────────────

/// Verify generator postconditions (G1-G2 over the module; G3 holds by
/// construction because validation failures return before any emission).
pub fn verify_generation(module: &IrModule) -> GenCert {
    let g1 = module.find_function(INTEGRATE).is_some();

    let declared: HashSet<&str> = module.decls.iter().map(|d| d.name.as_str()).collect();
    let callable: HashSet<&str> = module
        .functions
        .iter()
        .map(|f| f.name.as_str())
        .chain(module.raw_functions.iter().map(|(n, _)| n.as_str()))
        .collect();

    let mut g2 = true;
    for f in &module.functions {
        let mut local: HashSet<&str> = declared.clone();
        local.extend(f.params.iter().map(|p| p.name.as_str()));
        local.extend(f.locals.iter().map(|d| d.name.as_str()));
        check_stmts(&f.body, &local, &callable, &mut g2);
    }

    GenCert {
        g1_integrate_present: g1,
        g2_symbols_declared: g2,
        g3_all_or_nothing: true,
    }
}

fn check_stmts(stmts: &[Stmt], vars: &HashSet<&str>, callable: &HashSet<&str>, ok: &mut bool) {
    for s in stmts {
        match s {
            Stmt::Assign { dst, src } | Stmt::AddAssign { dst, src } => {
                if !vars.contains(dst.var.as_str()) {
                    *ok = false;
                }
                check_expr(src, vars, ok);
            }
            Stmt::For { body, .. } => check_stmts(body, vars, callable, ok),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                if let Cond::Lt(a, b) = cond {
                    check_expr(a, vars, ok);
                    check_expr(b, vars, ok);
                }
                check_stmts(then_body, vars, callable, ok);
                check_stmts(else_body, vars, callable, ok);
            }
            Stmt::Call { ret, func, args } => {
                if !callable.contains(func.as_str()) {
                    *ok = false;
                }
                if let Some(r) = ret {
                    if !vars.contains(r.var.as_str()) {
                        *ok = false;
                    }
                }
                for a in args {
                    if !vars.contains(a.var.as_str()) {
                        *ok = false;
                    }
                }
            }
            Stmt::Return(e) => check_expr(e, vars, ok),
            Stmt::Comment(_) | Stmt::SetIndex { .. } => {}
        }
    }
}

fn check_expr(e: &crate::ir::Expr, vars: &HashSet<&str>, ok: &mut bool) {
    use crate::ir::Expr;
    match e {
        Expr::Lit(_) => {}
        Expr::Load(s) => {
            if !vars.contains(s.var.as_str()) {
                *ok = false;
            }
        }
        Expr::Neg(a) => check_expr(a, vars, ok),
        Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
            check_expr(a, vars, ok);
            check_expr(b, vars, ok);
        }
    }
}

// ── Emission context ───────────────────────────────────────────────────────

/// Plan constants as signed indices plus collaborator names; every emit
/// helper below is a pure function of this.
struct Ctx<'a> {
    plan: &'a ExportPlan,
    ns: i64,
    nx: i64,
    nx2: i64,
    nxa: i64,
    nxz: i64,
    nu: i64,
    nod: i64,
    nvars: i64,
    ni: i64,
    dim: i64,
    base_gx: i64,
    base_gu: i64,
    base_u: i64,
    base_od: i64,
    seed_sx: i64,
    seed_su: i64,
    seed_u: i64,
    rhs_name: String,
    diffs_name: String,
    sweep_name: Option<String>,
    solve_name: String,
    reuse_name: String,
    aux_len: usize,
    solver_scratch: Vec<String>,
}

/// Which seed direction family a sensitivity pass excites.
#[derive(Clone, Copy, PartialEq)]
enum Wrt {
    States,
    Controls,
}

impl<'a> Ctx<'a> {
    fn new(plan: &'a ExportPlan, dynamics: &dyn DynamicsOracle, solver: &dyn LinearSolverGen) -> Self {
        let nxz = (plan.nx + plan.nxa) as i64;
        Ctx {
            plan,
            ns: plan.ns as i64,
            nx: plan.nx as i64,
            nx2: plan.nx2 as i64,
            nxa: plan.nxa as i64,
            nxz,
            nu: plan.nu as i64,
            nod: plan.nod as i64,
            nvars: plan.nvars as i64,
            ni: plan.ni as i64,
            dim: plan.dim as i64,
            base_gx: plan.base_gx as i64,
            base_gu: plan.base_gu as i64,
            base_u: plan.base_u as i64,
            base_od: plan.base_od as i64,
            seed_sx: nxz,
            seed_su: nxz + plan.nx as i64,
            seed_u: nxz + (plan.nx + plan.nu) as i64,
            rhs_name: dynamics.rhs_name().into(),
            diffs_name: dynamics.diffs_name().into(),
            sweep_name: dynamics.sweep_name().map(Into::into),
            solve_name: solver.solve_name().into(),
            reuse_name: solver.solve_reuse_name().into(),
            aux_len: solver.aux_len(plan.dim),
            solver_scratch: solver.scratch_names(),
        }
    }

    fn residual_rows(&self) -> i64 {
        self.nx2 + self.nxa
    }

    // ── Phase: DeclareBuffers ──────────────────────────────────────────

    fn declare_buffers(&self, module: &mut IrModule) {
        let p = self.plan;
        let nxz = p.nx + p.nxa;
        let mut decl = |d: Decl| {
            if !d.is_empty() {
                module.declare_variable(d);
            }
        };

        // scratch
        decl(Decl::workspace(TTT, 1, 1));
        decl(Decl::workspace(XXX, 1, p.xxx_len));
        decl(Decl::workspace(RHS_TEMP, 1, p.nx2 + p.nxa));
        decl(Decl::workspace(MAT, p.dim, p.dim));
        decl(Decl::workspace(RHS_B, p.dim, 1));
        decl(Decl::workspace(AUX, self.aux_len, 1));
        if p.inexact() {
            decl(Decl::workspace(DIFFS_TEMP, p.nx2 + p.nxa, p.nvars));
            decl(Decl::workspace(SEED, 1, p.seed_len));
            decl(Decl::workspace(STAGE_VALUES, 1, p.ns * nxz));
        } else {
            decl(Decl::workspace(DIFFS_TEMP, p.ns, (p.nx2 + p.nxa) * p.nvars));
            decl(Decl::workspace(DIFFK, nxz, p.ns));
        }
        decl(Decl::workspace(DIFFS_NEW, p.nx2 + p.nxa, p.nx + p.nu));
        if p.ni > 1 {
            decl(Decl::workspace(DIFFS_PREV, nxz, p.nx + p.nu));
        }
        if p.carries_delta() {
            decl(Decl::workspace(DELTA, 1, p.nx + p.nu));
        }
        if p.debug {
            decl(Decl::workspace(DEBUG_MAT, p.dim, p.dim));
        }

        // persistent lifting memory
        decl(Decl::variables(KTRAJ, p.n_nodes * p.ni * nxz, p.ns));
        if p.inexact() {
            decl(Decl::variables(
                DIFFK_TRAJ,
                p.n_nodes * p.ni * nxz * (p.nx + p.nu),
                p.ns,
            ));
        }
        if p.carries_delta() {
            decl(Decl::variables(XPREV, p.n_nodes * p.ni, p.nx));
            decl(Decl::variables(UPREV, p.n_nodes, p.nu));
        }

        // generation-time constants
        decl(Decl::const_data(AH, p.ns, p.ns, p.a_h.clone()));
        decl(Decl::const_data(BH, p.ns, 1, p.b_h.clone()));
        if p.time_dependent {
            decl(Decl::const_data(CMAT, 1, p.ns, p.c_scaled.clone()));
        }
        if p.nxa > 0 {
            decl(Decl::const_data(COLL0, 1, p.ns, p.coll0.clone()));
        }
    }

    /// Buffers that must be execution-context-private when the generated
    /// routine runs shooting intervals in parallel: the aggregate rhs input
    /// vector, every per-stage temporary, the Newton system, and the
    /// previous-step sensitivity cache. The persistent trajectory buffers
    /// are excluded — each interval owns a disjoint index range of them.
    fn private_scratch_names(&self) -> Vec<String> {
        let p = self.plan;
        let mut names: Vec<String> = vec![
            TTT.into(),
            XXX.into(),
            RHS_TEMP.into(),
            MAT.into(),
            RHS_B.into(),
            AUX.into(),
            DIFFS_TEMP.into(),
            DIFFS_NEW.into(),
        ];
        if p.ni > 1 {
            names.push(DIFFS_PREV.into());
        }
        if p.inexact() {
            names.push(SEED.into());
            names.push(STAGE_VALUES.into());
        } else {
            names.push(DIFFK.into());
        }
        if p.carries_delta() {
            names.push(DELTA.into());
        }
        if p.debug {
            names.push(DEBUG_MAT.into());
        }
        names.extend(self.solver_scratch.iter().cloned());
        names
    }

    // ── The integration routine ────────────────────────────────────────

    fn integrate_signature(&self) -> IrFunction {
        let mut f = IrFunction::new(INTEGRATE);
        f.doc = Some(
            "Performs the integration and sensitivity propagation for one shooting interval."
                .into(),
        );
        f.params = vec![param(ETA, self.plan.eta_len)];
        f.index_args = vec![NODE.into()];
        f.index_locals = vec![
            "k_index".into(),
            "tmp_index1".into(),
            "tmp_index2".into(),
        ];
        f.locals = vec![Decl::workspace(DET, 1, 1), Decl::workspace(ERR, 1, 1)];
        f.returns = Some(Scalar::Int);
        f
    }

    fn integrate_body(&self) -> Vec<Stmt> {
        let mut body = Vec::new();
        body.push(assign(slot(TTT, c(0)), lit(self.plan.t_start)));

        // controls and online data into the rhs input vector
        if self.nu > 0 {
            body.push(for_loop(
                "j",
                c(0),
                c(self.nu),
                vec![assign(
                    slot(XXX, c(self.nxz) + v("j")),
                    l(ETA, c(self.base_u) + v("j")),
                )],
            ));
        }
        if self.nod > 0 {
            body.push(for_loop(
                "j",
                c(0),
                c(self.nod),
                vec![assign(
                    slot(XXX, c(self.nxz + self.nu) + v("j")),
                    l(ETA, c(self.base_od) + v("j")),
                )],
            ));
        }
        if self.plan.inexact() {
            if self.nu > 0 {
                body.push(for_loop(
                    "j",
                    c(0),
                    c(self.nu),
                    vec![assign(
                        slot(SEED, c(self.seed_u) + v("j")),
                        l(ETA, c(self.base_u) + v("j")),
                    )],
                ));
            }
            if self.nod > 0 {
                body.push(for_loop(
                    "j",
                    c(0),
                    c(self.nod),
                    vec![assign(
                        slot(SEED, c(self.seed_u + self.nu) + v("j")),
                        l(ETA, c(self.base_od) + v("j")),
                    )],
                ));
            }
        }

        // control part of the outer-iteration correction
        if self.plan.carries_delta() && self.nu > 0 {
            body.push(for_loop(
                "j",
                c(0),
                c(self.nu),
                vec![assign(
                    slot(DELTA, c(self.nx) + v("j")),
                    l(ETA, c(self.base_u) + v("j"))
                        - l(UPREV, v(NODE) * c(self.nu) + v("j")),
                )],
            ));
        }

        body.push(for_loop("run", c(0), c(self.ni), self.run_body()));
        body
    }

    /// Body of the sub-interval loop: warm-start fold, Newton system, sensitivity directions, explicit update, chain rule.
    fn run_body(&self) -> Vec<Stmt> {
        let mut body = Vec::new();

        // keep the incoming sensitivity for the chain rule before it is
        // overwritten
        if self.ni > 1 {
            body.push(Stmt::If {
                cond: Cond::IdxGt(v("run"), c(0)),
                then_body: self.save_diffs_prev(),
                else_body: vec![],
            });
        }

        // state part of the outer-iteration correction
        if self.plan.carries_delta() {
            body.push(for_loop(
                "j",
                c(0),
                c(self.nx),
                vec![assign(
                    slot(DELTA, v("j")),
                    l(ETA, v("j"))
                        - l(
                            XPREV,
                            (v(NODE) * c(self.ni) + v("run")) * c(self.nx) + v("j"),
                        ),
                )],
            ));
        }

        body.push(Stmt::SetIndex {
            name: "k_index".into(),
            value: (v(NODE) * c(self.ni) + v("run")) * c(self.nxz),
        });

        body.push(Stmt::Comment("stage-derivative Newton system".into()));
        body.extend(self.solve_implicit_system());

        if self.plan.inexact() {
            body.extend(self.evaluate_all_states());
        }

        // sensitivity directions: one reuse-solve per state and control
        body.push(Stmt::Comment("forward sensitivity directions".into()));
        if self.nx2 > 0 {
            let dir_body = if self.plan.inexact() {
                self.sens_inexact(Wrt::States)
            } else {
                self.sens_exact(Wrt::States)
            };
            body.push(for_loop("run1", c(0), c(self.nx2), dir_body));
        }
        if self.nu > 0 {
            let dir_body = if self.plan.inexact() {
                self.sens_inexact(Wrt::Controls)
            } else {
                self.sens_exact(Wrt::Controls)
            };
            body.push(for_loop("run1", c(0), c(self.nu), dir_body));
        }

        if self.plan.carries_delta() {
            body.push(for_loop(
                "j",
                c(0),
                c(self.nx),
                vec![assign(
                    slot(
                        XPREV,
                        (v(NODE) * c(self.ni) + v("run")) * c(self.nx) + v("j"),
                    ),
                    l(ETA, v("j")),
                )],
            ));
        }

        // explicit Runge-Kutta update of the differential states
        body.push(Stmt::Comment("explicit update".into()));
        body.push(for_loop(
            "j",
            c(0),
            c(self.nx),
            vec![for_loop(
                "k",
                c(0),
                c(self.ns),
                vec![add_assign(
                    slot(ETA, v("j")),
                    l(KTRAJ, (v("k_index") + v("j")) * c(self.ns) + v("k")) * l(BH, v("k")),
                )],
            )],
        ));

        // algebraic values come from the collocation polynomial at the
        // interval start and do not accumulate across sub-steps
        if self.nxa > 0 {
            let alg = vec![for_loop(
                "j",
                c(0),
                c(self.nxa),
                vec![
                    assign(slot(ETA, c(self.nx) + v("j")), lit(0.0)),
                    for_loop(
                        "k",
                        c(0),
                        c(self.ns),
                        vec![add_assign(
                            slot(ETA, c(self.nx) + v("j")),
                            l(
                                KTRAJ,
                                (v("k_index") + c(self.nx) + v("j")) * c(self.ns) + v("k"),
                            ) * l(COLL0, v("k")),
                        )],
                    ),
                ],
            )];
            body.extend(self.only_on_first_interval(alg));
        }

        // chain rule: direct write on the first sub-interval, propagation
        // through the previous sensitivity afterwards
        body.push(Stmt::Comment("chain rule".into()));
        if self.ni > 1 {
            body.push(Stmt::If {
                cond: Cond::IdxEq(v("run"), c(0)),
                then_body: self.chain_update(),
                else_body: self.chain_propagate(),
            });
        } else {
            body.extend(self.chain_update());
        }

        body.push(add_assign(slot(TTT, c(0)), lit(1.0 / self.ni as f64)));
        body
    }

    fn only_on_first_interval(&self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        if self.ni > 1 {
            vec![Stmt::If {
                cond: Cond::IdxEq(v("run"), c(0)),
                then_body: stmts,
                else_body: vec![],
            }]
        } else {
            stmts
        }
    }

    fn save_diffs_prev(&self) -> Vec<Stmt> {
        let mut inner = vec![for_loop(
            "k",
            c(0),
            c(self.nx),
            vec![assign(
                slot(DIFFS_PREV, v("j") * c(self.nx + self.nu) + v("k")),
                l(ETA, c(self.base_gx) + v("j") * c(self.nx) + v("k")),
            )],
        )];
        if self.nu > 0 {
            inner.push(for_loop(
                "k",
                c(0),
                c(self.nu),
                vec![assign(
                    slot(
                        DIFFS_PREV,
                        v("j") * c(self.nx + self.nu) + c(self.nx) + v("k"),
                    ),
                    l(ETA, c(self.base_gu) + v("j") * c(self.nu) + v("k")),
                )],
            ));
        }
        vec![for_loop("j", c(0), c(self.nxz), inner)]
    }

    // ── Newton system assembly and solve ───────────────────────────────

    fn solve_implicit_system(&self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        let lift = self.plan.lift;
        let inexact = self.plan.inexact();

        // warm-start: fold the correction into the lifted stage values
        if lift == LiftScheme::FactorReuse && inexact {
            stmts.extend(self.fold_delta_into_k());
        }

        match (lift, inexact) {
            (LiftScheme::FactorReuse, true) => {
                let mut rebuild = Vec::new();
                rebuild.extend(self.stage_state_eval(c(0)));
                rebuild.push(Stmt::Call {
                    ret: None,
                    func: self.diffs_name.clone(),
                    args: vec![arg(XXX), arg(DIFFS_TEMP)],
                });
                let mut per_stage = Vec::new();
                per_stage.extend(self.stage_state_eval(v("i")));
                per_stage.extend(self.assemble_rows(v("i"), c(0)));
                per_stage.extend(self.newton_residual(v("i")));
                rebuild.push(for_loop("i", c(0), c(self.ns), per_stage));
                rebuild.push(self.call_solve());

                stmts.extend(self.rebuild_or_reuse(rebuild));
            }
            (LiftScheme::FactorReuse, false) => {
                let mut per_stage = Vec::new();
                per_stage.extend(self.stage_state_eval(v("i")));
                per_stage.extend(self.jac_eval(v("i")));
                per_stage.extend(self.assemble_rows(v("i"), self.jac_base(v("i"))));
                per_stage.extend(self.newton_residual(v("i")));
                let mut rebuild = vec![for_loop("i", c(0), c(self.ns), per_stage)];
                rebuild.push(self.call_solve());

                stmts.extend(self.rebuild_or_reuse(rebuild));
            }
            _ => {
                // lift modes 1 and 3: full rebuild every sub-interval
                let mut per_stage = Vec::new();
                per_stage.extend(self.stage_state_eval(v("i")));
                per_stage.extend(self.jac_eval(v("i")));
                per_stage.extend(self.assemble_rows(v("i"), self.jac_base(v("i"))));
                per_stage.extend(self.newton_residual(v("i")));
                if lift == LiftScheme::Delta {
                    per_stage.extend(self.fold_delta_into_rhs(v("i")));
                }
                stmts.push(for_loop("i", c(0), c(self.ns), per_stage));
                stmts.push(self.call_solve());
            }
        }

        stmts.extend(self.accumulate_k());

        if self.plan.debug {
            stmts.push(for_loop(
                "j",
                c(0),
                c(self.dim * self.dim),
                vec![assign(slot(DEBUG_MAT, v("j")), l(MAT, v("j")))],
            ));
        }
        stmts
    }

    /// `if (run == 0) { rebuild } else { refresh rhs, back-substitute }`.
    /// On single-interval grids the rebuild is unconditional.
    fn rebuild_or_reuse(&self, rebuild: Vec<Stmt>) -> Vec<Stmt> {
        if self.ni == 1 {
            return rebuild;
        }
        let mut reuse_stage = Vec::new();
        reuse_stage.extend(self.stage_state_eval(v("i")));
        if self.plan.lift == LiftScheme::FactorReuse && !self.plan.inexact() {
            // the exact scheme still refreshes the Jacobian for the
            // sensitivity right-hand sides
            reuse_stage.extend(self.jac_eval(v("i")));
        }
        reuse_stage.extend(self.newton_residual(v("i")));
        let reuse = vec![
            for_loop("i", c(0), c(self.ns), reuse_stage),
            Stmt::Call {
                ret: None,
                func: self.reuse_name.clone(),
                args: vec![arg(MAT), arg(RHS_B), arg(AUX)],
            },
        ];
        vec![Stmt::If {
            cond: Cond::IdxEq(v("run"), c(0)),
            then_body: rebuild,
            else_body: reuse,
        }]
    }

    fn call_solve(&self) -> Stmt {
        Stmt::Call {
            ret: Some(slot(DET, c(0))),
            func: self.solve_name.clone(),
            args: vec![arg(MAT), arg(RHS_B), arg(AUX)],
        }
    }

    /// Offset of stage `i`'s Jacobian block in the per-stage buffer
    /// (exact mode; the inexact buffer holds a single shared block).
    fn jac_base(&self, stage: crate::ir::Idx) -> crate::ir::Idx {
        stage * c(self.residual_rows() * self.nvars)
    }

    /// rk_xxx = interval-start state advanced by the stage combination
    /// `x + Σ_j Ah(stage, j)·K_j`, algebraic entries read from K directly.
    fn stage_state_eval(&self, stage: crate::ir::Idx) -> Vec<Stmt> {
        let mut stmts = vec![for_loop(
            "j",
            c(0),
            c(self.nx),
            vec![
                assign(slot(XXX, v("j")), l(ETA, v("j"))),
                for_loop(
                    "k",
                    c(0),
                    c(self.ns),
                    vec![add_assign(
                        slot(XXX, v("j")),
                        l(AH, stage.clone() * c(self.ns) + v("k"))
                            * l(KTRAJ, (v("k_index") + v("j")) * c(self.ns) + v("k")),
                    )],
                ),
            ],
        )];
        if self.nxa > 0 {
            stmts.push(for_loop(
                "j",
                c(0),
                c(self.nxa),
                vec![assign(
                    slot(XXX, c(self.nx) + v("j")),
                    l(
                        KTRAJ,
                        (v("k_index") + c(self.nx) + v("j")) * c(self.ns) + stage.clone(),
                    ),
                )],
            ));
        }
        if self.plan.time_dependent {
            stmts.push(assign(
                slot(XXX, c(self.nxz + self.nu + self.nod)),
                l(TTT, c(0)) + l(CMAT, stage),
            ));
        }
        stmts
    }

    /// One Jacobian evaluation into stage `i`'s block of the buffer.
    fn jac_eval(&self, stage: crate::ir::Idx) -> Vec<Stmt> {
        vec![Stmt::Call {
            ret: None,
            func: self.diffs_name.clone(),
            args: vec![arg(XXX), arg_at(DIFFS_TEMP, self.jac_base(stage))],
        }]
    }

    /// Newton matrix rows of one stage: `A = h(a ⊗ J) − I`, identity
    /// subtracted on the stage's own diagonal block.
    fn assemble_rows(&self, stage: crate::ir::Idx, jac_base: crate::ir::Idx) -> Vec<Stmt> {
        let rows = self.residual_rows();
        let mut diff_row = vec![Stmt::SetIndex {
            name: "tmp_index1".into(),
            value: stage.clone() * c(rows) + v("j"),
        }];
        for s2 in 0..self.ns {
            diff_row.push(for_loop(
                "k",
                c(0),
                c(self.nx2),
                vec![assign(
                    slot(MAT, v("tmp_index1") * c(self.dim) + c(s2 * self.nx2) + v("k")),
                    l(AH, stage.clone() * c(self.ns) + c(s2))
                        * l(DIFFS_TEMP, jac_base.clone() + v("j") * c(self.nvars) + v("k")),
                )],
            ));
            diff_row.push(Stmt::If {
                cond: Cond::IdxEq(c(s2), stage.clone()),
                then_body: vec![add_assign(
                    slot(MAT, v("tmp_index1") * c(self.dim) + c(s2 * self.nx2) + v("j")),
                    lit(-1.0),
                )],
                else_body: vec![],
            });
            if self.nxa > 0 {
                let col0 = c(self.ns * self.nx2 + s2 * self.nxa);
                diff_row.push(Stmt::If {
                    cond: Cond::IdxEq(c(s2), stage.clone()),
                    then_body: vec![for_loop(
                        "k",
                        c(0),
                        c(self.nxa),
                        vec![assign(
                            slot(MAT, v("tmp_index1") * c(self.dim) + col0.clone() + v("k")),
                            l(
                                DIFFS_TEMP,
                                jac_base.clone() + v("j") * c(self.nvars) + c(self.nx2) + v("k"),
                            ),
                        )],
                    )],
                    else_body: vec![for_loop(
                        "k",
                        c(0),
                        c(self.nxa),
                        vec![assign(
                            slot(MAT, v("tmp_index1") * c(self.dim) + col0 + v("k")),
                            lit(0.0),
                        )],
                    )],
                });
            }
        }
        vec![for_loop("j", c(0), c(rows), diff_row)]
    }

    /// Newton right-hand side of one stage: the residual `k − f(x_stage)`.
    fn newton_residual(&self, stage: crate::ir::Idx) -> Vec<Stmt> {
        let rows = self.residual_rows();
        let mut stmts = vec![Stmt::Call {
            ret: None,
            func: self.rhs_name.clone(),
            args: vec![arg(XXX), arg(RHS_TEMP)],
        }];
        stmts.push(for_loop(
            "j",
            c(0),
            c(self.nx2),
            vec![assign(
                slot(RHS_B, stage.clone() * c(rows) + v("j")),
                l(KTRAJ, (v("k_index") + v("j")) * c(self.ns) + stage.clone())
                    - l(RHS_TEMP, v("j")),
            )],
        ));
        if self.nxa > 0 {
            stmts.push(for_loop(
                "j",
                c(0),
                c(self.nxa),
                vec![assign(
                    slot(RHS_B, stage.clone() * c(rows) + c(self.nx2) + v("j")),
                    l(
                        KTRAJ,
                        (v("k_index") + c(self.nx) + v("j")) * c(self.ns) + stage,
                    ) - l(RHS_TEMP, c(self.nx2) + v("j")),
                )],
            ));
        }
        stmts
    }

    /// Lift mode 1: subtract `J_x·Δx + J_u·Δu` from the freshly built
    /// right-hand side, implementing the cheap warm-start update.
    fn fold_delta_into_rhs(&self, stage: crate::ir::Idx) -> Vec<Stmt> {
        let rows = self.residual_rows();
        let base = self.jac_base(stage.clone());
        let mut row_body = vec![for_loop(
            "k",
            c(0),
            c(self.nx2),
            vec![add_assign(
                slot(RHS_B, stage.clone() * c(rows) + v("j")),
                -(l(DIFFS_TEMP, base.clone() + v("j") * c(self.nvars) + v("k"))
                    * l(DELTA, v("k"))),
            )],
        )];
        if self.nu > 0 {
            row_body.push(for_loop(
                "k",
                c(0),
                c(self.nu),
                vec![add_assign(
                    slot(RHS_B, stage * c(rows) + v("j")),
                    -(l(
                        DIFFS_TEMP,
                        base + v("j") * c(self.nvars) + c(self.nx2 + self.nxa) + v("k"),
                    ) * l(DELTA, c(self.nx) + v("k"))),
                )],
            ));
        }
        vec![for_loop("j", c(0), c(rows), row_body)]
    }

    /// Lift mode 4 + inexact: fold the correction through the persistent
    /// sensitivity trajectory, `K += diffK·Δ`, before the system is built.
    fn fold_delta_into_k(&self) -> Vec<Stmt> {
        vec![for_loop(
            "i",
            c(0),
            c(self.nxz),
            vec![
                Stmt::SetIndex {
                    name: "tmp_index1".into(),
                    value: (v("k_index") + v("i")) * c(self.nx + self.nu),
                },
                for_loop(
                    "j",
                    c(0),
                    c(self.ns),
                    vec![for_loop(
                        "k",
                        c(0),
                        c(self.nx + self.nu),
                        vec![add_assign(
                            slot(KTRAJ, (v("k_index") + v("i")) * c(self.ns) + v("j")),
                            l(DELTA, v("k"))
                                * l(DIFFK_TRAJ, (v("tmp_index1") + v("k")) * c(self.ns) + v("j")),
                        )],
                    )],
                ),
            ],
        )]
    }

    /// Fold the stage increment back into the lifted trajectory.
    fn accumulate_k(&self) -> Vec<Stmt> {
        let mut per_stage = vec![for_loop(
            "j",
            c(0),
            c(self.nx2),
            vec![add_assign(
                slot(KTRAJ, (v("k_index") + v("j")) * c(self.ns) + v("i")),
                l(RHS_B, v("i") * c(self.nx2) + v("j")),
            )],
        )];
        if self.nxa > 0 {
            per_stage.push(for_loop(
                "j",
                c(0),
                c(self.nxa),
                vec![add_assign(
                    slot(
                        KTRAJ,
                        (v("k_index") + c(self.nx) + v("j")) * c(self.ns) + v("i"),
                    ),
                    l(RHS_B, c(self.ns * self.nx2) + v("i") * c(self.nxa) + v("j")),
                )],
            ));
        }
        vec![for_loop("i", c(0), c(self.ns), per_stage)]
    }

    /// Inexact mode evaluates every stage state explicitly before the
    /// sensitivity sweeps (the scheme linearizes around the full
    /// trajectory, not just the increment).
    fn evaluate_all_states(&self) -> Vec<Stmt> {
        let mut per_stage = vec![for_loop(
            "j",
            c(0),
            c(self.nx),
            vec![
                assign(
                    slot(STAGE_VALUES, v("i") * c(self.nxz) + v("j")),
                    l(ETA, v("j")),
                ),
                for_loop(
                    "k",
                    c(0),
                    c(self.ns),
                    vec![add_assign(
                        slot(STAGE_VALUES, v("i") * c(self.nxz) + v("j")),
                        l(AH, v("i") * c(self.ns) + v("k"))
                            * l(KTRAJ, (v("k_index") + v("j")) * c(self.ns) + v("k")),
                    )],
                ),
            ],
        )];
        if self.nxa > 0 {
            per_stage.push(for_loop(
                "j",
                c(0),
                c(self.nxa),
                vec![assign(
                    slot(STAGE_VALUES, v("i") * c(self.nxz) + c(self.nx) + v("j")),
                    l(
                        KTRAJ,
                        (v("k_index") + c(self.nx) + v("j")) * c(self.ns) + v("i"),
                    ),
                )],
            ));
        }
        vec![for_loop("i", c(0), c(self.ns), per_stage)]
    }

    // ── Sensitivity directions ─────────────────────────────────────────

    fn dir_col(&self, wrt: Wrt) -> crate::ir::Idx {
        match wrt {
            Wrt::States => v("run1"),
            Wrt::Controls => c(self.nx) + v("run1"),
        }
    }

    /// Exact forward mode: per direction, the right-hand side rows are
    /// `−∂f/∂(direction)` and the interval's factorization is reused.
    fn sens_exact(&self, wrt: Wrt) -> Vec<Stmt> {
        let rows = self.residual_rows();
        let jac_col = match wrt {
            Wrt::States => v("run1"),
            Wrt::Controls => c(self.nx2 + self.nxa) + v("run1"),
        };
        let mut stmts = vec![for_loop(
            "i",
            c(0),
            c(self.ns),
            vec![for_loop(
                "j",
                c(0),
                c(rows),
                vec![
                    Stmt::SetIndex {
                        name: "tmp_index1".into(),
                        value: v("i") * c(rows) + v("j"),
                    },
                    assign(
                        slot(RHS_B, v("tmp_index1")),
                        lit(0.0)
                            - l(
                                DIFFS_TEMP,
                                self.jac_base(v("i")) + v("j") * c(self.nvars) + jac_col.clone(),
                            ),
                    ),
                ],
            )],
        )];
        stmts.push(Stmt::Call {
            ret: None,
            func: self.reuse_name.clone(),
            args: vec![arg(MAT), arg(RHS_B), arg(AUX)],
        });

        // stage sensitivities of this direction
        let mut per_stage = vec![for_loop(
            "j",
            c(0),
            c(self.nx2),
            vec![assign(
                slot(DIFFK, v("j") * c(self.ns) + v("i")),
                l(RHS_B, v("i") * c(self.nx2) + v("j")),
            )],
        )];
        if self.nxa > 0 {
            per_stage.push(for_loop(
                "j",
                c(0),
                c(self.nxa),
                vec![assign(
                    slot(DIFFK, (c(self.nx) + v("j")) * c(self.ns) + v("i")),
                    l(RHS_B, c(self.ns * self.nx2) + v("i") * c(self.nxa) + v("j")),
                )],
            ));
        }
        stmts.push(for_loop("i", c(0), c(self.ns), per_stage));

        stmts.extend(self.diffs_new_update(wrt, |j, k| l(DIFFK, j * c(self.ns) + k)));
        stmts
    }

    /// Inexact/lifted mode: the right-hand side comes from the variational
    /// sweep at a seed with one excited direction, plus the persistent
    /// `diffK` term; solved via reuse only, with an incremental `diffK`
    /// update.
    fn sens_inexact(&self, wrt: Wrt) -> Vec<Stmt> {
        let rows = self.residual_rows();
        let col = self.dir_col(wrt);
        let excite = match wrt {
            Wrt::States => c(self.seed_sx) + v("run1"),
            Wrt::Controls => c(self.seed_su) + v("run1"),
        };

        // per stage: seed assembly and sweep call
        let mut per_stage = vec![for_loop(
            "j",
            c(0),
            c(self.nxz),
            vec![assign(
                slot(SEED, v("j")),
                l(STAGE_VALUES, v("i") * c(self.nxz) + v("j")),
            )],
        )];
        per_stage.push(for_loop(
            "j",
            c(0),
            c(self.nx + self.nu),
            vec![assign(slot(SEED, c(self.seed_sx) + v("j")), lit(0.0))],
        ));
        per_stage.push(add_assign(slot(SEED, excite), lit(-1.0)));
        per_stage.push(for_loop(
            "j",
            c(0),
            c(rows),
            vec![
                Stmt::SetIndex {
                    name: "tmp_index1".into(),
                    value: v("k_index") + v("j"),
                },
                Stmt::SetIndex {
                    name: "tmp_index2".into(),
                    value: v("tmp_index1") * c(self.nx + self.nu) + col.clone(),
                },
                for_loop(
                    "k",
                    c(0),
                    c(self.ns),
                    vec![add_assign(
                        slot(SEED, c(self.seed_sx) + v("j")),
                        -(l(AH, v("i") * c(self.ns) + v("k"))
                            * l(DIFFK_TRAJ, v("tmp_index2") * c(self.ns) + v("k"))),
                    )],
                ),
            ],
        ));
        per_stage.push(Stmt::Call {
            ret: None,
            func: self
                .sweep_name
                .clone()
                .expect("validated: inexact mode has a sweep function"),
            args: vec![arg(SEED), arg_at(RHS_B, v("i") * c(rows))],
        });
        per_stage.push(for_loop(
            "j",
            c(0),
            c(rows),
            vec![
                Stmt::SetIndex {
                    name: "tmp_index1".into(),
                    value: v("k_index") + v("j"),
                },
                Stmt::SetIndex {
                    name: "tmp_index2".into(),
                    value: v("tmp_index1") * c(self.nx + self.nu) + col.clone(),
                },
                add_assign(
                    slot(RHS_B, v("i") * c(rows) + v("j")),
                    l(DIFFK_TRAJ, v("tmp_index2") * c(self.ns) + v("i")),
                ),
            ],
        ));

        let mut stmts = vec![for_loop("i", c(0), c(self.ns), per_stage)];
        stmts.push(Stmt::Call {
            ret: None,
            func: self.reuse_name.clone(),
            args: vec![arg(MAT), arg(RHS_B), arg(AUX)],
        });

        // incremental update of the persistent sensitivity trajectory
        let mut upd_stage = vec![for_loop(
            "j",
            c(0),
            c(self.nx2),
            vec![
                Stmt::SetIndex {
                    name: "tmp_index1".into(),
                    value: (v("k_index") + v("j")) * c(self.nx + self.nu),
                },
                Stmt::SetIndex {
                    name: "tmp_index2".into(),
                    value: v("tmp_index1") + col.clone(),
                },
                add_assign(
                    slot(DIFFK_TRAJ, v("tmp_index2") * c(self.ns) + v("i")),
                    l(RHS_B, v("i") * c(self.nx2) + v("j")),
                ),
            ],
        )];
        if self.nxa > 0 {
            upd_stage.push(for_loop(
                "j",
                c(0),
                c(self.nxa),
                vec![
                    Stmt::SetIndex {
                        name: "tmp_index1".into(),
                        value: (v("k_index") + c(self.nx) + v("j")) * c(self.nx + self.nu),
                    },
                    Stmt::SetIndex {
                        name: "tmp_index2".into(),
                        value: v("tmp_index1") + col.clone(),
                    },
                    add_assign(
                        slot(DIFFK_TRAJ, v("tmp_index2") * c(self.ns) + v("i")),
                        l(RHS_B, c(self.ns * self.nx2) + v("i") * c(self.nxa) + v("j")),
                    ),
                ],
            ));
        }
        stmts.push(for_loop("i", c(0), c(self.ns), upd_stage));

        let col_for_new = col;
        stmts.extend(self.diffs_new_update(wrt, move |j, k| {
            // read back through the just-updated trajectory
            l(
                DIFFK_TRAJ,
                ((v("k_index") + j) * c(self.nx + self.nu) + col_for_new.clone()) * c(self.ns) + k,
            )
        }));
        stmts
    }

    /// New-sensitivity output block for the active direction: the
    /// Kronecker-delta term (state directions only) plus `Σ_k diffK·Bh`.
    fn diffs_new_update(
        &self,
        wrt: Wrt,
        diffk_at: impl Fn(crate::ir::Idx, crate::ir::Idx) -> crate::ir::Expr,
    ) -> Vec<Stmt> {
        let dst = match wrt {
            Wrt::States => v("j") * c(self.nx + self.nu) + v("run1"),
            Wrt::Controls => v("j") * c(self.nx + self.nu) + c(self.nx) + v("run1"),
        };
        let init = match wrt {
            Wrt::States => Stmt::If {
                cond: Cond::IdxEq(v("j"), v("run1")),
                then_body: vec![assign(slot(DIFFS_NEW, dst.clone()), lit(1.0))],
                else_body: vec![assign(slot(DIFFS_NEW, dst.clone()), lit(0.0))],
            },
            Wrt::Controls => assign(slot(DIFFS_NEW, dst.clone()), lit(0.0)),
        };
        vec![for_loop(
            "j",
            c(0),
            c(self.nx2),
            vec![
                init,
                for_loop(
                    "k",
                    c(0),
                    c(self.ns),
                    vec![add_assign(
                        slot(DIFFS_NEW, dst.clone()),
                        diffk_at(v("j"), v("k")) * l(BH, v("k")),
                    )],
                ),
            ],
        )]
    }

    // ── Chain rule across sub-intervals ────────────────────────────────

    fn chain_update(&self) -> Vec<Stmt> {
        let mut row = vec![for_loop(
            "k",
            c(0),
            c(self.nx),
            vec![assign(
                slot(ETA, c(self.base_gx) + v("j") * c(self.nx) + v("k")),
                l(DIFFS_NEW, v("j") * c(self.nx + self.nu) + v("k")),
            )],
        )];
        if self.nu > 0 {
            row.push(for_loop(
                "k",
                c(0),
                c(self.nu),
                vec![assign(
                    slot(ETA, c(self.base_gu) + v("j") * c(self.nu) + v("k")),
                    l(DIFFS_NEW, v("j") * c(self.nx + self.nu) + c(self.nx) + v("k")),
                )],
            ));
        }
        vec![for_loop("j", c(0), c(self.residual_rows()), row)]
    }

    fn chain_propagate(&self) -> Vec<Stmt> {
        let mut row = vec![for_loop(
            "k",
            c(0),
            c(self.nx),
            vec![
                assign(
                    slot(ETA, c(self.base_gx) + v("j") * c(self.nx) + v("k")),
                    lit(0.0),
                ),
                for_loop(
                    "i",
                    c(0),
                    c(self.nx),
                    vec![add_assign(
                        slot(ETA, c(self.base_gx) + v("j") * c(self.nx) + v("k")),
                        l(DIFFS_NEW, v("j") * c(self.nx + self.nu) + v("i"))
                            * l(DIFFS_PREV, v("i") * c(self.nx + self.nu) + v("k")),
                    )],
                ),
            ],
        )];
        if self.nu > 0 {
            row.push(for_loop(
                "k",
                c(0),
                c(self.nu),
                vec![
                    assign(
                        slot(ETA, c(self.base_gu) + v("j") * c(self.nu) + v("k")),
                        l(DIFFS_NEW, v("j") * c(self.nx + self.nu) + c(self.nx) + v("k")),
                    ),
                    for_loop(
                        "i",
                        c(0),
                        c(self.nx),
                        vec![add_assign(
                            slot(ETA, c(self.base_gu) + v("j") * c(self.nu) + v("k")),
                            l(DIFFS_NEW, v("j") * c(self.nx + self.nu) + v("i"))
                                * l(
                                    DIFFS_PREV,
                                    v("i") * c(self.nx + self.nu) + c(self.nx) + v("k"),
                                ),
                        )],
                    ),
                ],
            ));
        }
        vec![for_loop("j", c(0), c(self.residual_rows()), row)]
    }

    // ── Phases: EmitPostLoopFixup, EmitDiagnostic ──────────────────────

    fn post_loop_fixup(&self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        if self.plan.carries_delta() && self.nu > 0 {
            stmts.push(for_loop(
                "j",
                c(0),
                c(self.nu),
                vec![assign(
                    slot(UPREV, v(NODE) * c(self.nu) + v("j")),
                    l(ETA, c(self.base_u) + v("j")),
                )],
            ));
        }
        stmts
    }

    fn health_classification(&self) -> Vec<Stmt> {
        vec![
            Stmt::If {
                cond: Cond::Lt(l(DET, c(0)), lit(1e-12)),
                then_body: vec![assign(slot(ERR, c(0)), lit(2.0))],
                else_body: vec![Stmt::If {
                    cond: Cond::Lt(l(DET, c(0)), lit(1e-6)),
                    then_body: vec![assign(slot(ERR, c(0)), lit(1.0))],
                    else_body: vec![assign(slot(ERR, c(0)), lit(0.0))],
                }],
            },
            Stmt::Return(l(ERR, c(0))),
        ]
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `problem_hash`: SHA-256 of the canonical problem JSON.
/// `source_hash`: SHA-256 of the emitted C source.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub problem_hash: [u8; 32],
    pub source_hash: [u8; 32],
    pub generator_version: &'static str,
}

impl Provenance {
    pub fn problem_hash_hex(&self) -> String {
        bytes_to_hex(&self.problem_hash)
    }

    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Serialize as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"problem_hash\": \"{}\",\n  \"source_hash\": \"{}\",\n  \"generator_version\": \"{}\"\n}}\n",
            self.problem_hash_hex(),
            self.source_hash_hex(),
            self.generator_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from the problem description and the emitted source.
pub fn compute_provenance(problem_json: &str, c_source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let hash_of = |data: &str| {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    };

    Provenance {
        problem_hash: hash_of(problem_json),
        source_hash: hash_of(c_source),
        generator_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntegratorMode, MeasurementGrid, SensitivityMode};
    use crate::exec::{Externals, Machine};
    use crate::linsolve::GaussianElimination;
    use crate::models;

    fn options(sens: SensitivityMode, lift: u8) -> GeneratorOptions {
        GeneratorOptions {
            sensitivity: sens,
            integrator_mode: IntegratorMode::Lifted,
            lift_mode: lift,
            parallel: false,
            measurement_grid: MeasurementGrid::Offline,
            debug: false,
            num_outputs: 0,
        }
    }

    fn decay_setup() -> (StatePartition, ButcherTableau, Grid) {
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
        )
    }

    #[test]
    fn generation_passes_certificate() {
        let (p, t, g) = decay_setup();
        let dynamics = models::builtin("decay").unwrap();
        let generated = generate(
            &p,
            &t,
            &g,
            &options(SensitivityMode::Forward, 4),
            &dynamics,
            &GaussianElimination,
        )
        .expect("valid configuration");
        assert!(generated.report.cert.all_pass());
        assert_eq!(generated.report.phases.len(), 6);
        assert!(generated.module.find_function(INTEGRATE).is_some());
        assert!(generated.module.find_decl(KTRAJ).is_some());
    }

    #[test]
    fn failed_validation_emits_nothing() {
        let (p, t, g) = decay_setup();
        let dynamics = models::builtin("decay").unwrap();
        let mut module = IrModule::default();
        let err = generate_into(
            &p,
            &t,
            &g,
            &options(SensitivityMode::Adjoint, 4),
            &dynamics,
            &GaussianElimination,
            &mut module,
        )
        .unwrap_err();
        assert!(err.iter().any(|d| d.code == Some(codes::E0101)));
        assert!(module.is_untouched());
        assert_eq!(module.stmt_count(), 0);
    }

    #[test]
    fn debug_flag_adds_matrix_copy() {
        let (p, t, g) = decay_setup();
        let dynamics = models::builtin("decay").unwrap();
        let mut opts = options(SensitivityMode::Forward, 4);
        opts.debug = true;
        let generated =
            generate(&p, &t, &g, &opts, &dynamics, &GaussianElimination).expect("valid");
        assert!(generated.module.find_decl(DEBUG_MAT).is_some());
    }

    #[test]
    fn parallel_flag_emits_thread_private_directive() {
        let (p, t, g) = decay_setup();
        let dynamics = models::builtin("decay").unwrap();
        let mut opts = options(SensitivityMode::Forward, 4);
        opts.parallel = true;
        let generated =
            generate(&p, &t, &g, &opts, &dynamics, &GaussianElimination).expect("valid");
        assert_eq!(generated.module.directives.len(), 1);
        let Directive::ThreadPrivate(names) = &generated.module.directives[0];
        assert!(names.contains(&MAT.to_string()));
        assert!(names.contains(&XXX.to_string()));
        assert!(
            !names.contains(&KTRAJ.to_string()),
            "trajectory memory is shared, never private"
        );
    }

    #[test]
    fn health_classification_thresholds() {
        // Interpret the emitted classification in isolation.
        let mut module = IrModule::default();
        let ctx_plan;
        {
            let (p, t, g) = decay_setup();
            let dynamics = models::builtin("decay").unwrap();
            ctx_plan = ExportPlan::new(&p, &t, &g, &options(SensitivityMode::Forward, 4), &dynamics)
                .expect("valid");
        }
        let dynamics = models::builtin("decay").unwrap();
        let ctx = Ctx::new(&ctx_plan, &dynamics, &GaussianElimination);
        let mut f = IrFunction::new("classify");
        f.params = vec![param(DET, 1)];
        f.locals = vec![Decl::workspace(ERR, 1, 1)];
        f.returns = Some(Scalar::Int);
        f.body = ctx.health_classification();
        module.declare_function(f);

        let mut machine = Machine::with_externals(&module, Externals::new());
        for (det, expected) in [(1e-13, 2.0), (1e-8, 1.0), (1e-3, 0.0)] {
            let mut det_buf = [det];
            let code = machine.call("classify", &mut [&mut det_buf], &[]).unwrap();
            assert_eq!(code, expected, "det = {det}");
        }
    }
}
