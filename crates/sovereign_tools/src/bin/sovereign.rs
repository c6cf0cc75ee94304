#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;

use sovereign_engines::model_router::{ModelRouter, OllamaConfig, RoutingConfigSource};
use sovereign_kernel_contracts::routing::RoutingTable;
use sovereign_os::triad::PipelineConfig;
use sovereign_storage::fs_ledger::FsReceiptLedger;
use sovereign_tools::ask_cli::{execute_command, parse_command};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SOVEREIGN_LOG";

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = parse_command(&args)?;

    let ollama = OllamaConfig::from_env();
    let router = if cmd.needs_router() {
        let source = RoutingConfigSource::from_env();
        ModelRouter::from_process_cache(&source, ollama).map_err(|e| e.to_string())?
    } else {
        ModelRouter::new(Arc::new(RoutingTable::default()), ollama)
    };

    let output = execute_command(
        &cmd,
        Arc::new(router),
        FsReceiptLedger::default_local(),
        PipelineConfig::mvp_v1(),
    )?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
