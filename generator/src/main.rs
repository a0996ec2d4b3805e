use clap::Parser;
use std::path::PathBuf;

use lirkgen::codegen::{codegen, CodegenOptions};
use lirkgen::config::ProblemConfig;
use lirkgen::exec::{Externals, Machine};
use lirkgen::generator::{compute_provenance, INTEGRATE};
use lirkgen::linsolve::{GaussianElimination, LinearSolverGen};
use lirkgen::models;
use lirkgen::phase::descriptor;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    C,
    Ir,
    Plan,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "lirkgen",
    version,
    about = "Lifted-IRK integrator generator — emits embedded C update routines with forward sensitivity propagation"
)]
struct Cli {
    /// Input problem description (JSON)
    problem: PathBuf,

    /// Output file path; stdout if omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::C)]
    emit: EmitStage,

    /// Run the generated routine this many outer iterations on the
    /// problem's `simulate` block and print the result
    #[arg(long)]
    simulate: Option<usize>,

    /// Print generation phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.problem) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("lirkgen: error: {}: {}", cli.problem.display(), e);
            std::process::exit(2);
        }
    };

    let config: ProblemConfig = match serde_json::from_str(&source) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("lirkgen: error: {}: {}", cli.problem.display(), e);
            std::process::exit(2);
        }
    };

    let dynamics = match models::builtin(&config.model) {
        Some(d) => d,
        None => {
            eprintln!(
                "lirkgen: error: unknown model `{}` (built-ins: {})",
                config.model,
                models::builtin_names().join(", ")
            );
            std::process::exit(2);
        }
    };
    let solver = GaussianElimination;

    let t = std::time::Instant::now();
    let generated = match lirkgen::generator::generate_with_observer(
        &config.partition,
        &config.tableau,
        &config.grid,
        &config.options,
        &dynamics,
        &solver,
        |phase| {
            if cli.verbose {
                eprintln!("lirkgen: {} ...", descriptor(phase).name);
            }
        },
    ) {
        Ok(g) => g,
        Err(diags) => {
            for d in &diags {
                eprintln!("lirkgen: {}", d);
            }
            std::process::exit(1);
        }
    };
    for w in &generated.report.warnings {
        eprintln!("lirkgen: {}", w);
    }
    if cli.verbose {
        eprintln!(
            "lirkgen: generation complete, {:.1}ms, {} statements",
            t.elapsed().as_secs_f64() * 1000.0,
            generated.module.stmt_count()
        );
    }

    if let Some(iterations) = cli.simulate {
        run_simulation(&config, &generated.module, &solver, iterations, &dynamics);
    }

    let rendered = codegen(&generated.module, &CodegenOptions::default());
    let output = match cli.emit {
        EmitStage::C => rendered.generated.c_source,
        EmitStage::Ir => format!("{:#?}\n", generated.module),
        EmitStage::Plan => {
            // Re-derive the plan summary; validation already passed.
            match lirkgen::plan::ExportPlan::new(
                &config.partition,
                &config.tableau,
                &config.grid,
                &config.options,
                &dynamics,
            ) {
                Ok(plan) => format!("{}\n", plan.describe()),
                Err(_) => unreachable!("plan validated during generation"),
            }
        }
        EmitStage::BuildInfo => {
            compute_provenance(&source, &rendered.generated.c_source).to_json()
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, output) {
                eprintln!("lirkgen: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("lirkgen: wrote {}", path.display());
            }
        }
        None => print!("{}", output),
    }
}

/// Drive the generated routine through the reference executor.
fn run_simulation(
    config: &ProblemConfig,
    module: &lirkgen::ir::IrModule,
    solver: &GaussianElimination,
    iterations: usize,
    dynamics: &lirkgen::model::IrDynamics,
) {
    let Some(sim) = &config.simulate else {
        eprintln!("lirkgen: error: --simulate needs a `simulate` block in the problem file");
        std::process::exit(2);
    };
    let plan = lirkgen::plan::ExportPlan::new(
        &config.partition,
        &config.tableau,
        &config.grid,
        &config.options,
        dynamics,
    )
    .expect("plan validated during generation");
    if sim.x0.len() != plan.nx || sim.u.len() != plan.nu || sim.od.len() != plan.nod {
        eprintln!(
            "lirkgen: error: simulate block needs x0[{}], u[{}], od[{}]",
            plan.nx, plan.nu, plan.nod
        );
        std::process::exit(2);
    }

    let mut externals = Externals::new();
    solver.register_runtime(&mut externals, plan.dim);
    let mut machine = Machine::with_externals(module, externals);

    let mut eta = vec![0.0; plan.eta_len];
    let mut code = 0.0;
    for _ in 0..iterations.max(1) {
        eta.iter_mut().for_each(|x| *x = 0.0);
        eta[..plan.nx].copy_from_slice(&sim.x0);
        eta[plan.base_u..plan.base_u + plan.nu].copy_from_slice(&sim.u);
        eta[plan.base_od..plan.base_od + plan.nod].copy_from_slice(&sim.od);
        code = match machine.call(INTEGRATE, &mut [&mut eta[..]], &[0]) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("lirkgen: simulation error: {}", e);
                std::process::exit(1);
            }
        };
    }

    println!("health code: {}", code as i64);
    println!("x_end: {:?}", &eta[..plan.nx + plan.nxa]);
    for i in 0..plan.nx + plan.nxa {
        let row: Vec<f64> =
            eta[plan.base_gx + i * plan.nx..plan.base_gx + (i + 1) * plan.nx].to_vec();
        println!("d x_end[{i}] / d x0: {row:?}");
    }
    if plan.nu > 0 {
        for i in 0..plan.nx + plan.nxa {
            let row: Vec<f64> =
                eta[plan.base_gu + i * plan.nu..plan.base_gu + (i + 1) * plan.nu].to_vec();
            println!("d x_end[{i}] / d u: {row:?}");
        }
    }
}
