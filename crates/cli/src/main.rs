// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use labwired_cosim::segment::SegmentMemory;
use labwired_cosim::{
    CosimError, Driver, Entity, InterfaceError, InterfaceReply, MappedSegment, ReportQuery,
    SimClient, SimState,
};
use labwired_cosim_config::{
    CosimConfig, ExpectedOutcome, ReportTarget, ScriptOp, ScriptStep, SimScript,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "LabWired co-simulation bridge",
    long_about = None
)]
struct Cli {
    /// Path to the bridge configuration (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the shared segment backing file
    #[arg(long, global = true)]
    shm: Option<PathBuf>,

    /// Enable protocol-level tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the segment, serve the configured channels and report the result.
    Driver(DriverArgs),

    /// Attach as the simulator and replay an operation script.
    Sim(SimArgs),

    /// Print the current segment state as JSON.
    Inspect,

    /// Remove a stale segment backing file.
    Clean,
}

#[derive(Parser, Debug)]
struct DriverArgs {
    /// Also write the JSON result to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct SimArgs {
    /// Path to the simulator script (YAML)
    #[arg(short, long)]
    script: PathBuf,
}

#[derive(Debug, Serialize)]
struct SimSummary {
    schema_version: &'static str,
    steps: usize,
    mismatches: Vec<String>,
    announced: String,
    retval: u8,
}

fn load_config(cli: &Cli) -> anyhow::Result<CosimConfig> {
    let mut config = match &cli.config {
        Some(path) => CosimConfig::from_file(path)?,
        None => CosimConfig::default(),
    };
    config.apply_env()?;
    if let Some(shm) = &cli.shm {
        config.shm_path = shm.clone();
    }
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = load_config(&cli);
    let level = match (&config, cli.trace) {
        (_, true) => tracing::Level::TRACE,
        (Ok(c), false) => c.log_level.into(),
        (Err(_), false) => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match cli.command {
        Commands::Driver(args) => run_driver(&config, args),
        Commands::Sim(args) => run_sim(&config, args),
        Commands::Inspect => run_inspect(&config),
        Commands::Clean => run_clean(&config),
    }
}

fn runtime_failure(context: &str, e: &CosimError) -> ExitCode {
    if e.is_fatal() {
        error!("{}: {} (fatal)", context, e);
    } else {
        error!("{}: {}", context, e);
    }
    ExitCode::from(EXIT_RUNTIME_ERROR)
}

/// Whether the peer may still be waiting on the segment. A rejected
/// operation has already been answered with ABORT.
fn peer_reachable(e: &CosimError) -> bool {
    !e.is_fatal()
        && !matches!(
            e,
            CosimError::PeerTerminated { .. } | CosimError::UnexpectedOperation(_)
        )
}

fn close_driver(driver: &mut Driver) {
    if let Err(e) = driver.close() {
        warn!("Closing the driver failed: {}", e);
    }
}

fn run_driver(config: &CosimConfig, args: DriverArgs) -> ExitCode {
    info!("Starting co-simulation driver on {:?}", config.shm_path);

    let mut driver = match Driver::open(config) {
        Ok(d) => d,
        Err(e) => return runtime_failure("Failed to open shared segment", &e),
    };
    if let Err(e) = driver.register_manifest(config) {
        error!("{:#}", e);
        if let Err(e) = driver.decline_start() {
            warn!("Could not notify the simulator: {}", e);
        }
        close_driver(&mut driver);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let outcome = match driver.sim_start() {
        Ok(o) => o,
        Err(e) => {
            let code = runtime_failure("Co-simulation failed", &e);
            if peer_reachable(&e) {
                if let Err(e) = driver.announce(SimState::ABORT, 1) {
                    warn!("Could not announce ABORT to the simulator: {}", e);
                }
            }
            close_driver(&mut driver);
            return code;
        }
    };

    let mut report = driver.report();
    report["schema_version"] = serde_json::json!(RESULT_SCHEMA_VERSION);
    report["success"] = serde_json::json!(outcome.is_success());
    let rendered = report.to_string();
    println!("{}", rendered);
    if let Some(path) = &args.output {
        if let Err(e) = std::fs::write(path, &rendered) {
            error!("Failed to write result {:?}: {}", path, e);
        }
    }

    close_driver(&mut driver);

    if outcome.retval != 0 {
        ExitCode::from(outcome.retval)
    } else if outcome.is_success() {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_ASSERT_FAIL)
    }
}

fn default_bitsize(step: &ScriptStep) -> u16 {
    if step.data.is_empty() {
        64
    } else {
        (step.data.len() * 8).min(usize::from(u16::MAX)) as u16
    }
}

fn execute_step(sim: &mut SimClient, step: &ScriptStep) -> Result<InterfaceReply, CosimError> {
    let bits = step.bitsize.unwrap_or_else(|| default_bitsize(step));
    match step.op {
        ScriptOp::Read => sim.read(step.index, step.address, bits),
        ScriptOp::Write => sim.write(step.index, step.address, bits, &step.data),
        ScriptOp::Pop => sim.pop(step.index, bits),
        ScriptOp::Push => sim.push(step.index, bits, &step.data),
        ScriptOp::Info => {
            let query = match step.query {
                Some(ReportTarget::Write) => ReportQuery::WRITE,
                _ => ReportQuery::READ,
            };
            sim.info(step.index, query)
        }
        ScriptOp::Exit => sim.exit_interface(step.index),
    }
}

fn check_step(step: &ScriptStep, reply: &InterfaceReply) -> Result<(), String> {
    let expected = match step.expect {
        ExpectedOutcome::Ok => None,
        ExpectedOutcome::Empty => Some(InterfaceError::Empty),
        ExpectedOutcome::Full => Some(InterfaceError::Full),
        ExpectedOutcome::Error => Some(InterfaceError::Error),
    };
    match (expected, reply.result) {
        (None, Ok(remaining)) => {
            if let Some(want) = step.expect_remaining {
                if want != remaining {
                    return Err(format!("expected {} remaining, got {}", want, remaining));
                }
            }
            if let Some(want) = &step.expect_data {
                if want != &reply.data {
                    return Err(format!("expected data {:?}, got {:?}", want, reply.data));
                }
            }
            Ok(())
        }
        (Some(want), Err(got)) if want == got => Ok(()),
        (_, got) => Err(format!("expected {:?}, got {:?}", step.expect, got)),
    }
}

/// Report a runtime error, announce ABORT to a driver that can still hear
/// it, then detach.
fn abandon_sim(sim: &mut SimClient, context: &str, e: &CosimError) -> ExitCode {
    let code = runtime_failure(context, e);
    if sim.peer_outcome().is_none() && !e.is_fatal() {
        if let Err(e) = sim.finish(SimState::ABORT, 1) {
            warn!("Could not announce ABORT to the driver: {}", e);
        }
    }
    if let Err(e) = sim.close() {
        warn!("Closing the simulator endpoint failed: {}", e);
    }
    code
}

fn run_sim(config: &CosimConfig, args: SimArgs) -> ExitCode {
    let script = match SimScript::from_file(&args.script) {
        Ok(s) => s,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let mut sim = match SimClient::open(config) {
        Ok(s) => s,
        Err(e) => return runtime_failure("Failed to attach to shared segment", &e),
    };
    if let Err(e) = sim.ready() {
        return abandon_sim(&mut sim, "Start handshake failed", &e);
    }
    info!("Replaying {} operations", script.steps.len());

    let mut mismatches = Vec::new();
    for (i, step) in script.steps.iter().enumerate() {
        let reply = match execute_step(&mut sim, step) {
            Ok(r) => r,
            Err(e) => return abandon_sim(&mut sim, &format!("Step {} failed", i), &e),
        };
        if let Err(msg) = check_step(step, &reply) {
            error!("Step {} ({:?} on channel {}): {}", i, step.op, step.index, msg);
            mismatches.push(format!("step {}: {}", i, msg));
        }
    }

    let (state, retval) = if mismatches.is_empty() {
        (SimState::END, script.retval)
    } else {
        (SimState::END | SimState::ERROR, 1)
    };
    if let Err(e) = sim.finish(state, retval) {
        return runtime_failure("Failed to announce the end of simulation", &e);
    }

    let summary = SimSummary {
        schema_version: RESULT_SCHEMA_VERSION,
        steps: script.steps.len(),
        mismatches,
        announced: state.names(),
        retval,
    };
    match serde_json::to_string(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Failed to render summary: {}", e),
    }
    if let Err(e) = sim.close() {
        warn!("Closing the simulator endpoint failed: {}", e);
    }

    if summary.mismatches.is_empty() {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_ASSERT_FAIL)
    }
}

fn run_inspect(config: &CosimConfig) -> ExitCode {
    let mut seg = match MappedSegment::attach(&config.shm_path) {
        Ok(s) => s,
        Err(e) => return runtime_failure("Failed to map shared segment", &e),
    };
    let Some(raw) = seg.raw() else {
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    };
    let snapshot = raw.snapshot();
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to render snapshot: {}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }
    // Attaching as SIM leaves the file in place.
    if let Err(e) = seg.close(Entity::Sim) {
        warn!("{}", e);
    }
    ExitCode::from(EXIT_PASS)
}

fn run_clean(config: &CosimConfig) -> ExitCode {
    match std::fs::remove_file(&config.shm_path) {
        Ok(()) => {
            info!("Removed {:?}", config.shm_path);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Nothing to clean at {:?}", config.shm_path);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("Failed to remove {:?}: {}", config.shm_path, e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}
