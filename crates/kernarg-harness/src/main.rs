use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kernarg_device::{ArgSignature, HipRuntime};
use kernarg_harness::toolchain::{build_tracer, DEFAULT_BUILD_JOBS};
use kernarg_harness::{
    compare_results, run_job, write_header, ArgumentComparison, HandoffReport, Orchestrator,
    SessionConfig, Tolerance, Tunables, VerifyJob, DEFAULT_HEADER_PATH,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kernarg",
    about = "Capture GPU kernel pointer arguments from a traced process over IPC handles."
)]
struct Cli {
    /// Default to debug logging when RUST_LOG is unset
    #[arg(short, long, global = true, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one handoff and print the captured arguments as JSON
    Fetch(FetchArgs),
    /// Write the argument-layout header the tracer is compiled against
    Header {
        /// Kernel parameter type, in declaration order (repeatable)
        #[arg(long = "arg", value_name = "TYPE", required = true)]
        args: Vec<String>,

        #[arg(long, value_name = "PATH", default_value = DEFAULT_HEADER_PATH)]
        output: PathBuf,
    },
    /// Configure and build the tracer with cmake
    Build {
        #[arg(long, value_name = "DIR")]
        tracer_dir: PathBuf,

        #[arg(long, value_name = "N", default_value_t = DEFAULT_BUILD_JOBS)]
        jobs: usize,
    },
    /// Run every variant of a job file and compare their captured arguments
    Verify {
        #[arg(long, value_name = "PATH")]
        job: PathBuf,

        #[arg(long, value_name = "PATH")]
        hip_library: Option<PathBuf>,
    },
    /// Compare two saved `fetch` reports
    Compare {
        lhs: PathBuf,
        rhs: PathBuf,

        #[arg(long, default_value_t = Tolerance::default().rtol)]
        rtol: f64,

        #[arg(long, default_value_t = Tolerance::default().atol)]
        atol: f64,
    },
}

#[derive(clap::Args, Debug)]
struct FetchArgs {
    /// Traced binary
    #[arg(long, value_name = "PATH")]
    binary: PathBuf,

    /// Kernel name to capture
    #[arg(long)]
    kernel: String,

    /// Kernel parameter type, in declaration order (repeatable)
    #[arg(long = "arg", value_name = "TYPE", required = true)]
    args: Vec<String>,

    /// Instrumentation library injected through HSA_TOOLS_LIB
    #[arg(long, value_name = "PATH")]
    tracer_lib: PathBuf,

    /// Tracer verbosity (NEXUS_LOG_LEVEL)
    #[arg(long, value_name = "N")]
    log_level: Option<u8>,

    #[arg(long, value_name = "DIR")]
    channel_dir: Option<PathBuf>,

    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Give up when the handles do not all arrive in time (default: wait forever)
    #[arg(long, value_name = "SECS")]
    handle_timeout_secs: Option<u64>,

    /// Give up when a completion-pipe open does not complete in time (default: wait forever)
    #[arg(long, value_name = "SECS")]
    pipe_timeout_secs: Option<u64>,

    /// Leave the pipe and exchange file in place
    #[arg(long, action = clap::ArgAction::SetTrue)]
    keep_channel: bool,

    /// Explicit HIP runtime library (defaults to searching for libamdhip64)
    #[arg(long, value_name = "PATH")]
    hip_library: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Arguments passed to the traced binary
    #[arg(last = true, value_name = "ARGS")]
    producer_args: Vec<OsString>,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("kernarg: {err:#}");
            std::process::exit(2);
        }
    }
}

/// `Ok(false)` means the command ran but found results that are not close.
fn run(command: Command) -> Result<bool> {
    match command {
        Command::Fetch(args) => fetch(args).map(|()| true),
        Command::Header { args, output } => {
            let path = write_header(&ArgSignature::new(args), &output)?;
            println!("{}", path.display());
            Ok(true)
        }
        Command::Build { tracer_dir, jobs } => {
            let lib = build_tracer(&tracer_dir, jobs)?;
            println!("{}", lib.display());
            Ok(true)
        }
        Command::Verify { job, hip_library } => verify(&job, hip_library.as_deref()),
        Command::Compare {
            lhs,
            rhs,
            rtol,
            atol,
        } => {
            let lhs_report = read_report(&lhs)?;
            let rhs_report = read_report(&rhs)?;
            let names = (lhs.display().to_string(), rhs.display().to_string());
            let comparisons = compare_results(
                &lhs_report.results,
                &rhs_report.results,
                Tolerance { rtol, atol },
            );
            Ok(print_comparison(&names, &comparisons))
        }
    }
}

fn load_hip(path: Option<&Path>) -> Result<HipRuntime> {
    let runtime = match path {
        Some(path) => HipRuntime::load_from(path),
        None => HipRuntime::load(),
    };
    runtime.context("load HIP runtime")
}

fn fetch(args: FetchArgs) -> Result<()> {
    let tunables = Tunables::from_env()?;
    let mut config = SessionConfig::new(
        &args.binary,
        args.kernel,
        ArgSignature::new(args.args),
        args.tracer_lib,
    )
    .with_tunables(&tunables);
    config.binary_args = args.producer_args;
    config.keep_channel = args.keep_channel;
    if let Some(level) = args.log_level {
        config.tracer_log_level = level;
    }
    if let Some(dir) = args.channel_dir {
        config.channel_dir = dir;
    }
    if let Some(ms) = args.poll_interval_ms {
        anyhow::ensure!(ms > 0, "--poll-interval-ms must be positive");
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = args.handle_timeout_secs {
        config.handle_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(secs) = args.pipe_timeout_secs {
        config.pipe_timeout = Some(Duration::from_secs(secs));
    }

    let hip = load_hip(args.hip_library.as_deref())?;
    let report = Orchestrator::new(&hip)
        .run(&config)
        .with_context(|| format!("handoff with {}", args.binary.display()))?;

    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => std::fs::write(&path, json + "\n")
            .with_context(|| format!("write report {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}

fn verify(job_path: &Path, hip_library: Option<&Path>) -> Result<bool> {
    let job = VerifyJob::load(job_path)?;
    let tunables = Tunables::from_env()?;
    let hip = load_hip(hip_library)?;

    let outcome = run_job(&job, &hip, &tunables)?;
    for comparison in &outcome.comparisons {
        print_comparison(
            &(comparison.baseline.clone(), comparison.variant.clone()),
            &comparison.arguments,
        );
    }
    Ok(outcome.all_close())
}

fn print_comparison(names: &(String, String), comparisons: &[ArgumentComparison]) -> bool {
    for c in comparisons {
        let decl = c.decl.as_deref().unwrap_or("?");
        let verdict = if c.close { "are close" } else { "are NOT close" };
        println!(
            "Arrays at index {} ({decl}) for '{}' and '{}' {verdict}.",
            c.index, names.0, names.1
        );
    }
    comparisons.iter().all(|c| c.close)
}

fn read_report(path: &Path) -> Result<HandoffReport> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse report {}", path.display()))
}
