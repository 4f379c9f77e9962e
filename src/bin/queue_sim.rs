use badvpn_flow::scenario::{QueueSpec, Scenario, run_scenario};
use badvpn_flow::trace::TraceLogger;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "queue-sim",
    about = "Run a scenario.json through a fair or priority packet queue"
)]
struct Args {
    /// Path to scenario.json
    #[arg(long)]
    scenario: PathBuf,

    /// Output trace JSON file
    #[arg(long)]
    trace_json: Option<PathBuf>,

    /// Override max_rounds from the scenario file
    #[arg(long)]
    max_rounds: Option<u64>,

    /// Override queue kind: fair or priority
    #[arg(long)]
    queue: Option<String>,
}

fn parse_queue(arg: Option<String>, from_file: QueueSpec) -> Result<QueueSpec, String> {
    let Some(s) = arg else {
        return Ok(from_file);
    };
    match s.as_str() {
        "fair" => Ok(match from_file {
            QueueSpec::Fair { .. } => from_file,
            QueueSpec::Priority => QueueSpec::Fair { packet_weight: 1 },
        }),
        "priority" => Ok(QueueSpec::Priority),
        other => Err(format!("unknown queue kind {other:?} (expected fair or priority)")),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut scenario = match Scenario::load(&args.scenario) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}: {e}", args.scenario.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(max_rounds) = args.max_rounds {
        scenario.max_rounds = max_rounds;
    }
    scenario.queue = match parse_queue(args.queue, scenario.queue) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut trace = args.trace_json.as_ref().map(|_| TraceLogger::default());
    let summary = match run_scenario(&scenario, trace.as_mut()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("queue={} rounds={}", scenario.queue.name(), summary.rounds);
    for flow in &summary.flows {
        println!(
            "flow {} packets={} bytes={}",
            flow.name, flow.packets, flow.bytes
        );
    }

    if let (Some(path), Some(trace)) = (args.trace_json, trace) {
        let json = match trace.to_json() {
            Ok(j) => j,
            Err(e) => {
                eprintln!("error: serialize trace: {e}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = fs::write(&path, json) {
            eprintln!("error: write {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
        eprintln!("wrote trace events to {}", path.display());
    }

    ExitCode::SUCCESS
}
