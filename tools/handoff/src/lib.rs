pub mod call;
pub mod cancel;
pub mod channel;
pub mod client;
pub mod config;
pub mod driver;
pub mod errors;
pub mod exchange;
pub mod logging;
pub mod transport;
pub mod workflow;

use cancel::{block_on, CancelToken};
use clap::{error::ErrorKind, Parser};
use config::load_config;
use errors::HandoffError;
use logging::{clear_run_logger, init_run_logger, structured_fallback_line, JsonlLogger};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use transport::recording::RecordingTransport;
use transport::stub::StubTransport;
use workflow::{load_items, sync_items, SyncOptions};

pub use call::{Call, Response};
pub use channel::RendezvousChannel;
pub use driver::{read_body, read_json, CallMatcher, Driver};
pub use exchange::{Delivery, Exchange, PendingResponse};
pub use transport::Transport;

#[derive(Debug, Clone, Parser)]
#[command(name = "handoff")]
#[command(about = "Run the item-sync workflow against canned stub responses")]
pub struct Cli {
    /// TOML route table of canned responses.
    #[arg(long)]
    pub stubs: PathBuf,
    /// Directory whose files are the local items to sync.
    #[arg(long)]
    pub items: Option<PathBuf>,
    /// Harness config; `[workflow]` and `[logging]` apply here, `[driver]`
    /// is validated but only used by driver scripts.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Write the recorded call log as JSONL to this path.
    #[arg(long)]
    pub record: Option<PathBuf>,
}

pub fn run() -> Result<i32, HandoffError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_args(&args, &mut out)
}

pub fn run_with_args(
    args: &[std::ffi::OsString],
    out: &mut dyn Write,
) -> Result<i32, HandoffError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                write!(out, "{error}").map_err(|e| HandoffError::Io(e.to_string()))?;
                return Ok(0);
            }
            _ => return Err(HandoffError::Cli(error.to_string())),
        },
    };

    let cfg = load_config(cli.config.as_deref())?;
    if let Some(path) = &cfg.logging.path {
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = cfg.logging.max_payload_bytes;
        init_run_logger(logger);
    }

    let result = run_sync(&cli, &SyncOptions::from(&cfg.workflow), out);
    if cfg.logging.path.is_some() {
        clear_run_logger();
    }
    result
}

fn run_sync(cli: &Cli, options: &SyncOptions, out: &mut dyn Write) -> Result<i32, HandoffError> {
    let stub = StubTransport::load(&cli.stubs)?;
    let items = match &cli.items {
        Some(dir) => load_items(dir)?,
        None => BTreeMap::new(),
    };
    let transport = RecordingTransport::new(stub);
    let cancel = CancelToken::new();
    let outcome = block_on(sync_items(&transport, &items, options, &cancel))?;

    for record in transport.records() {
        let status = record
            .status
            .map_or_else(|| "error".to_string(), |status| status.to_string());
        let message = format!("{} {} -> {status}", record.method, record.target);
        writeln!(out, "{}", structured_fallback_line("sync", "call", &message))
            .map_err(|e| HandoffError::Io(e.to_string()))?;
    }
    if let Some(path) = &cli.record {
        std::fs::write(path, transport.to_jsonl()?)
            .map_err(|e| HandoffError::Io(format!("{}: {e}", path.display())))?;
    }

    let report = outcome?;
    writeln!(
        out,
        "{}",
        structured_fallback_line(
            "sync",
            "complete",
            &format!(
                "uploaded={} skipped={}",
                report.uploaded.len(),
                report.skipped.len()
            ),
        )
    )
    .map_err(|e| HandoffError::Io(e.to_string()))?;
    Ok(0)
}
