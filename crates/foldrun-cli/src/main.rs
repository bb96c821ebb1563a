//! foldrun - cross-validation instance generation with Stylene
//!
//! Partitions a data folder into leave-one-fold-out train/test sets, runs
//! the Stylene instance generator once per side, and collects the generated
//! instance files into `<out-folder>/fold-<NN>/{train,test}`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use foldrun_core::{init_tracing, FileLog, FoldPlan, FoldrunError};
use foldrun_tool::{
    plan_folds, Harvester, LinePrompt, OverwritePolicy, Pipeline, ProcessInvoker, RunReport,
    ToolCommand, ToolLayout,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Level};

const DATA_LAYOUT: &str = "\
data_folder should be a directory containing the data structured as follows:

data_folder
    fold-01
        classA
            doc1a.txt
            doc2a.txt
        classB
        ...
    fold-02
        classA
            doc1b.txt
        classB
        ...

The fold-<N> pattern for the first-level subfolders is mandatory; the other
folders can take any name. Every fold must contain the same class folders.
Documents must be in a Stylene-ready format, i.e. one token per line.";

#[derive(Parser, Debug)]
#[command(name = "foldrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate cross-validation instances with Stylene", long_about = None)]
#[command(after_help = DATA_LAYOUT)]
struct Cli {
    /// Folder containing the fold-<N> subfolders
    data_folder: PathBuf,

    /// Output folder in which the instances will be stored
    #[arg(short = 'o', long = "out-folder", default_value = "instances")]
    output_folder: PathBuf,

    /// Log file where tool output and errors will be written
    #[arg(short = 'l', long = "log-file", default_value = "foldrun.log")]
    log_file: PathBuf,

    /// Much more verbose log file
    #[arg(short, long)]
    debug: bool,

    /// Path to the Stylene installation
    #[arg(long, env = "FOLDRUN_TOOL_PATH", default_value = "/opt/Stylene")]
    tool_path: PathBuf,

    /// Path to Stylene's parameters XML
    #[arg(long, env = "FOLDRUN_PARAMS_FILE", default_value = "startparameters.xml")]
    params_file: PathBuf,

    /// Java executable used to launch the tool
    #[arg(long, env = "FOLDRUN_JAVA", default_value = "java")]
    java: String,

    /// Abort a tool run after this many seconds (0 = no limit)
    #[arg(long, default_value_t = 0)]
    timeout_secs: u64,

    /// What to do when output for a fold already exists (ask, always, never)
    #[arg(long, default_value = "ask")]
    overwrite: OverwritePolicy,

    /// Emit JSON-formatted log lines on the console
    #[arg(long)]
    json: bool,

    /// Show the fold plan without running the tool
    #[arg(long)]
    dry_run: bool,
}

/// Effective configuration after path resolution.
#[derive(Debug, Serialize)]
struct RunConfig {
    data_folder: PathBuf,
    output_folder: PathBuf,
    log_file: PathBuf,
    params_file: PathBuf,
    layout: ToolLayout,
    java: String,
    timeout_secs: u64,
    overwrite: OverwritePolicy,
}

impl RunConfig {
    fn resolve(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read working directory")?;
        let data_folder = std::fs::canonicalize(&cli.data_folder)
            .with_context(|| format!("Data folder {} not found", cli.data_folder.display()))?;

        Ok(Self {
            data_folder,
            output_folder: absolutize(&cwd, &cli.output_folder),
            log_file: absolutize(&cwd, &cli.log_file),
            params_file: absolutize(&cwd, &cli.params_file),
            layout: ToolLayout::from_root(absolutize(&cwd, &cli.tool_path)),
            java: cli.java.clone(),
            timeout_secs: cli.timeout_secs,
            overwrite: cli.overwrite,
        })
    }

    /// Fail fast on a missing jar or parameters file before touching data.
    fn check_inputs(&self) -> foldrun_core::Result<()> {
        self.layout.validate()?;
        if !self.params_file.is_file() {
            return Err(FoldrunError::MissingParamsFile(self.params_file.clone()));
        }
        Ok(())
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn print_plan(plan: &FoldPlan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    println!(
        "{} fold(s), {} class(es): {}",
        plan.folds.len(),
        plan.num_classes(),
        plan.labels.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    for p in &plan.partitions {
        match (&p.held_out, &p.test) {
            (Some(held_out), Some(test)) => println!(
                "  {}  train: {} folder(s)  test: {} ({} folder(s))",
                p.set_name,
                p.train.len(),
                held_out.display(),
                test.len()
            ),
            _ => println!(
                "  {}  train: {} folder(s)  test: none",
                p.set_name,
                p.train.len()
            ),
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, output: &Path) {
    for fold in &report.folds {
        match &fold.harvested.test {
            Some(test) => println!(
                "  {}  train -> {}  test -> {}",
                fold.set_name,
                fold.harvested.train.display(),
                test.display()
            ),
            None => println!(
                "  {}  train -> {}",
                fold.set_name,
                fold.harvested.train.display()
            ),
        }
    }
    println!(
        "Done: {} fold(s) written to {} in {:.1}s",
        report.folds.len(),
        output.display(),
        report.duration_ms as f64 / 1000.0
    );
}

async fn run(cli: Cli) -> Result<()> {
    let config = RunConfig::resolve(&cli)?;
    debug!(config = %serde_json::to_string(&config)?, "Resolved configuration");

    if !cli.dry_run {
        config.check_inputs()?;
    }

    let plan = plan_folds(&config.data_folder)
        .with_context(|| format!("Failed to partition {}", config.data_folder.display()))?;

    if cli.dry_run {
        return print_plan(&plan, cli.json);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, stopping the tool (press Ctrl-C again to exit now)");
        cancel_tx.send(true).ok();
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Interrupted twice, exiting");
            std::process::exit(FoldrunError::Cancelled.kind().exit_code().into());
        }
    });

    let invoker = ProcessInvoker::new(ToolCommand::java(
        &config.java,
        &config.layout,
        config.timeout_secs,
    ))
    .with_cancel(cancel_rx.clone());
    let harvester = Harvester::new(
        config.layout.clone(),
        &config.output_folder,
        config.overwrite,
        Box::new(LinePrompt::terminal()),
    );
    let mut pipeline = Pipeline::new(
        config.layout.clone(),
        &config.params_file,
        &invoker,
        harvester,
    )
    .with_cancel(cancel_rx);

    let report = pipeline.run(&plan).await?;
    info!(folds = report.folds.len(), duration_ms = report.duration_ms, "Run complete");
    print_report(&report, &config.output_folder);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let file_log = FileLog {
        path: cli.log_file.clone(),
        level: if cli.debug { Level::DEBUG } else { Level::WARN },
    };
    if let Err(e) = init_tracing(cli.json, Level::INFO, Some(&file_log)) {
        eprintln!("foldrun: cannot open log file {}: {e}", cli.log_file.display());
        return ExitCode::FAILURE;
    }
    info!("Log initialized");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<FoldrunError>()
                .map(|e| e.kind().exit_code())
                .unwrap_or(1);
            error!("{err:#}");
            ExitCode::from(code)
        }
    }
}
