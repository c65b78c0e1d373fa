use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use gcode_travel_optimizer_lib as gto;
use tracing::{error, info};

const STACK_SIZE: usize = 16 * 1024 * 1024;

/// Reorders printed segments within each feature of each layer to shorten travel moves.
#[derive(Parser, Debug)]
#[command(name = "gcode_travel_optimizer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input gcode
    input: PathBuf,

    /// Output gcode; may be the same file as the input, which is only replaced once the output is
    /// complete
    output: PathBuf,

    /// JSON file overriding optimizer defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum 2-opt passes per feature block (0 = nearest neighbour only)
    #[arg(long)]
    max_2opt_passes: Option<usize>,

    /// Wall-clock budget for 2-opt per feature block, in milliseconds
    #[arg(long)]
    time_budget_ms: Option<u64>,

    /// Feed rate for inserted travel moves, mm/min
    #[arg(long)]
    travel_feed: Option<gto::Mm>,

    /// Keep moves that go nowhere
    #[arg(long)]
    no_filter: bool,
}

fn run(args: Args) -> gto::Result<()> {
    let mut config = match &args.config {
        Some(path) => gto::OptimizerConfig::from_json_file(path)?,
        None => gto::OptimizerConfig::default(),
    };
    if let Some(passes) = args.max_2opt_passes {
        config = config.with_max_2opt_passes(passes);
    }
    if let Some(millis) = args.time_budget_ms {
        config = config.with_time_budget_ms(millis);
    }
    if let Some(feed_rate) = args.travel_feed {
        config = config.with_travel_feed_rate(feed_rate);
    }
    if args.no_filter {
        config = config.with_filter_redundant_moves(false);
    }

    let report = gto::process_files(&args.input, &args.output, &config)?;
    for diagnostic in &report.diagnostics {
        info!("{}", diagnostic);
    }
    info!("lines: {} -> {}", report.lines_in, report.lines_out);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    // The KdTree recursion can blow the default main thread stack on big blocks, so the actual
    // work runs on a thread with a larger one. Switch threads before reading any gcode, so only
    // the parsed arguments need to be Send.
    let primary = thread::Builder::new().stack_size(STACK_SIZE).spawn(move || run(args));
    let outcome = match primary {
        Ok(handle) => handle.join(),
        Err(err) => {
            error!("failed to spawn worker thread: {}", err);
            return ExitCode::FAILURE;
        }
    };
    match outcome {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("worker thread panicked");
            ExitCode::FAILURE
        }
    }
}
