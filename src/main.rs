use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use console::style;
use gantry::{Environment, Manifest, Runner};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Tasks to run, one after another.
    #[arg(value_name = "TASK", default_value = "default")]
    tasks: Vec<String>,

    /// Project root.
    #[arg(short = 'C', long = "directory", default_value = ".")]
    directory: Utf8PathBuf,

    /// Manifest file, relative to the project root.
    #[arg(long, default_value = "package.json")]
    manifest: Utf8PathBuf,

    /// List the available tasks and exit.
    #[arg(long)]
    list: bool,

    /// Print the execution plan of the tasks as a Mermaid graph and exit.
    #[arg(long)]
    graph: bool,
}

fn init_logging() -> anyhow::Result<()> {
    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_env("GANTRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}

fn list(runner: &Runner) {
    let graph = runner.graph();
    let broken = graph.validate();

    for task in graph.tasks() {
        let name = task.name();
        match broken.iter().find(|(n, _)| n == name) {
            Some((_, e)) => println!("{:<16} {}", style(name).red(), style(e).red()),
            None => println!("{:<16} {}", style(name).cyan(), task.about().unwrap_or("")),
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let root = args
        .directory
        .canonicalize_utf8()
        .with_context(|| format!("Couldn't open project directory '{}'", args.directory))?;

    let manifest = Manifest::load(root.join(&args.manifest))?;
    let env = Environment::new(&root, manifest);
    let blueprint = gantry::catalog::blueprint(&env);
    let runner = Runner::new(blueprint.finish()?, env);

    if args.list {
        list(&runner);
        return Ok(());
    }

    if args.graph {
        for task in &args.tasks {
            let plan = runner.graph().plan(task)?;
            println!("{}", plan.display(runner.graph()));
        }
        return Ok(());
    }

    tracing::info!(root = %short(&root), tasks = ?args.tasks, "starting");
    let start = Instant::now();
    let diagnostics = runner.run_all(args.tasks.iter().map(String::as_str))?;

    tracing::info!(
        "finished {} task(s) in {:.2?}",
        diagnostics.execution_times.len(),
        start.elapsed()
    );

    Ok(())
}

fn short(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging() {
        eprintln!("couldn't set up logging: {e}");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
