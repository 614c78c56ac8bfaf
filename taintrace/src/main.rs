use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::fs::File;
use std::io::{stdout, BufReader, Write};
use std::path::PathBuf;
use std::process::exit;
use uuid::Uuid;

use taintrace::recorded::{read_log, RecordedProcess};
use taintrace::replay::Coordinator;
use taintrace::server::SocketServer;
use taintrace::targets::Targets;
use taintrace::{Config, Session};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// Recorded trace to triage, one JSON event per line
    #[clap()]
    trace: PathBuf,
    /// Target specification (JSON)
    #[clap(short, long)]
    target: PathBuf,
    /// Run id to replay mutations from
    #[clap(short, long)]
    replay: Option<String>,
    /// Do not track taint per instruction
    #[clap(long)]
    no_taint: bool,
    /// Replay without substituting mutated bytes
    #[clap(long)]
    no_mutate: bool,
    /// Also hook registry reads
    #[clap(long)]
    registry: bool,
    /// Replay server socket
    #[clap(short, long, default_value = "/tmp/taintrace.sock")]
    server: PathBuf,
    /// Where to write crash and summary documents (default stdout)
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Name of the target module when it is not the .exe
    #[clap(long)]
    app: Option<String>,
    /// Pid to report to the replay server
    #[clap(long, default_value_t = 0)]
    pid: u32,
    #[clap(short, long, parse(from_occurrences))]
    verbose: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new()
        .with_level(level)
        .init()
        .context("Failed to initialize logger")?;

    let targets = Targets::load(&args.target)?;
    let config = Config {
        targets,
        taint: !args.no_taint,
        registry: args.registry,
        app_name: args.app.clone(),
    };

    let coordinator = match &args.replay {
        Some(run_id) => {
            let run_id = Uuid::parse_str(run_id)
                .with_context(|| format!("Invalid run id {:?}", run_id))?;
            let server = SocketServer::connect(&args.server)?;
            Coordinator::replaying(run_id, Box::new(server), !args.no_mutate)
        }
        None => Coordinator::new(),
    };

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(stdout()),
    };

    let log = File::open(&args.trace)
        .with_context(|| format!("Failed to open trace {}", args.trace.display()))?;
    let entries = read_log(BufReader::new(log))
        .with_context(|| format!("Failed to parse trace {}", args.trace.display()))?;
    info!("Loaded {} trace entries", entries.len());

    let mut session = Session::new(config, coordinator, output);
    let mut process = RecordedProcess::new(args.pid);
    process.run(&mut session, entries)?;

    if let Some(code) = process.exit_code() {
        exit(code);
    }
    Ok(())
}
