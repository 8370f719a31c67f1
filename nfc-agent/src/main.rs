// src/main.rs

//! Agent entry-point: hosts one NFC scan session on the console.
//!
//! 1. Parse CLI + configuration & set up structured logging
//! 2. Build the backend client and pick the tag reader
//! 3. Activate the scan session
//! 4. Print status changes and owner notifications
//! 5. Tear down on `close`, end of input, or Ctrl-C

// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::Context;
use chrono::Local;
use clap::Parser;
use fern::Dispatch;
use log::{Level, LevelFilter};
use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
    thread,
};
use tokio::{runtime::Runtime, sync::watch};

// ───── local imports ────────────────────────────────────────────────────────
use nfc_agent::comms::{LineReader, TagReader};
use nfc_agent::config::{self, Config, model::{ApiConfig, LoggingConfig, ReaderSource}};
use nfc_agent::nfc_log;
use nfc_agent::scanner::{HttpUnlockClient, Phase, ScanSession, ScanStatus};
use nfc_agent::telemetry;
use shared::events::Notification;

// ───── helpers ──────────────────────────────────────────────────────────────

/// Print an error with context and terminate the process.
macro_rules! fatal {
    ($ctx:expr, $($arg:tt)+) => {{
        eprintln!(
            "[{}][ERROR][{}] {}",
            chrono::Local::now().to_rfc3339(),
            $ctx,
            format!($($arg)+)
        );
        std::process::exit(1);
    }};
}

/// Bridge NFC tag reads to the collectibles unlock API.
#[derive(Debug, Parser)]
#[command(name = "nfc-agent", version, about)]
struct Cli {
    /// Configuration file [default: default.toml next to the executable]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides `[api].base_url`
    #[arg(long, env = "NFC_AGENT_API_BASE")]
    api_base: Option<String>,

    /// Read tag serial numbers from this file instead of the configured source
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log level, overrides `[logging].level`
    #[arg(long)]
    log_level: Option<String>,
}

/// Directory that contains the running executable.
fn exe_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine executable path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable must live in some directory")
}

/// Load the configuration and fold the command-line overrides into it.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => config::load(path)?,
        None => config::load_or_default(&exe_dir()?.join("default.toml"))?,
    };
    if let Some(base) = &cli.api_base {
        cfg.api = ApiConfig::new(base, &cfg.api.unlock_path)?;
    }
    if let Some(input) = &cli.input {
        cfg.reader.source = ReaderSource::File;
        cfg.reader.path = Some(input.clone());
    }
    if let Some(level) = &cli.log_level {
        cfg.logging.level = level.clone();
    }
    Ok(cfg)
}

/// Configure global logging as requested in `[logging]`.
fn setup_logging(logging: &LoggingConfig) -> Result<(), fern::InitError> {
    let level = match logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        "OFF" => LevelFilter::Off,
        _ => LevelFilter::Info,
    };

    let log_path = logging
        .enable
        .then(|| PathBuf::from(logging.file.as_deref().unwrap_or("nfc-agent.log")));

    // stdout belongs to the status / notification stream
    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// The platform's tag-reading capability, if this host has one.
fn detect_reader(cfg: &Config) -> Option<Arc<dyn TagReader>> {
    match cfg.reader.source {
        ReaderSource::Stdin => Some(Arc::new(LineReader::stdin())),
        ReaderSource::File => cfg
            .reader
            .path
            .as_ref()
            .map(|p| Arc::new(LineReader::file(p)) as Arc<dyn TagReader>),
        ReaderSource::None => None,
    }
}

/// One line of owner output per notification.
fn print_notification(n: &Notification) {
    match serde_json::to_string(n) {
        Ok(line) => println!("{line}"),
        Err(e) => nfc_log!(Level::Error, "owner", "cannot encode {}: {}", n.name(), e),
    }
}

/// Status line not yet shown to the owner, if any.
fn pending_status(status: &mut watch::Receiver<ScanStatus>) -> Option<String> {
    match status.has_changed() {
        Ok(true) => Some(format!("status: {}", *status.borrow_and_update())),
        _ => None,
    }
}

// ───── session host ─────────────────────────────────────────────────────────

async fn run(cfg: Config) -> anyhow::Result<i32> {
    if let Err(e) = telemetry::install_exporter(&cfg.metrics) {
        nfc_log!(Level::Warn, "metrics", "Prometheus exporter disabled: {}", e);
    }

    let client = Arc::new(HttpUnlockClient::new(&cfg.api));
    nfc_log!(Level::Info, "main", "Unlocking against {}", client.endpoint());

    let (mut session, mut notifications) =
        ScanSession::activate_with(detect_reader(&cfg), client, &cfg.session).await;

    let mut status = session.watch_status();
    println!("status: {}", *status.borrow_and_update());

    if matches!(session.phase(), Phase::Unsupported | Phase::FailedToStart) {
        return Ok(1);
    }

    loop {
        // status first: a submission sets it before emitting notifications
        tokio::select! {
            biased;
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("status: {}", *status.borrow_and_update());
            }
            Some(n) = notifications.recv() => {
                print_notification(&n);
                if n == Notification::Close {
                    if let Some(line) = pending_status(&mut status) {
                        println!("{line}");
                    }
                    nfc_log!(Level::Info, "owner", "close requested, tearing scanner down");
                    break;
                }
            }
            _ = session.finished() => {
                // drain whatever the last submissions produced
                while let Ok(n) = notifications.try_recv() {
                    print_notification(&n);
                }
                if let Some(line) = pending_status(&mut status) {
                    println!("{line}");
                }
                nfc_log!(Level::Info, "owner", "tag source exhausted");
                break;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(e) = ctrl_c {
                    nfc_log!(Level::Error, "owner", "cannot listen for Ctrl-C: {}", e);
                }
                nfc_log!(Level::Warn, "owner", "interrupted");
                break;
            }
        }
    }

    session.deactivate().await;
    Ok(0)
}

fn main() {
    // 1 ─ Context
    let cli = Cli::parse();
    let cfg = load_config(&cli).unwrap_or_else(|e| fatal!("config", "{:#}", e));

    // 2 ─ Logging
    setup_logging(&cfg.logging).unwrap_or_else(|e| fatal!("logging", "{}", e));
    nfc_log!(Level::Info, "main", "nfc-agent {} starting", env!("CARGO_PKG_VERSION"));

    // 3 ─ Runtime & session
    let rt = Runtime::new().unwrap_or_else(|e| fatal!("runtime", "{}", e));
    let code = rt
        .block_on(run(cfg))
        .unwrap_or_else(|e| fatal!("session", "{:#}", e));

    nfc_log!(Level::Info, "main", "exiting with code {}", code);
    process::exit(code);
}
