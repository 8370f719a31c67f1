//! Reader abstraction + concrete tag sources (text lines, driver channel).
//! -----------------------------------------------------------------------------
//! A **reader** is the platform's tag-reading capability. Using one is a two
//! step affair, mirroring how a browser's NFC reader is driven:
//!   • `start()`  → begin scanning; may fail (no antenna, missing file, ...).
//!   • `ingest()` → long-running loop pushing `ReaderEvent`s into the session's
//!     queue until the source ends or the queue is dropped.
//!
//! Whether a capability exists at all is expressed by the caller handing the
//! session an `Option<Arc<dyn TagReader>>`.

use std::{
    io::Cursor,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use crossbeam::channel::{Receiver as CbReceiver, RecvTimeoutError};
use futures::StreamExt;
use log::Level;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::{Mutex, mpsc},
    task::{self, JoinHandle},
};
use tokio_stream::wrappers::LinesStream;

use shared::constants::{MAX_SERIAL_LEN, READ_ERROR_MARKER};
use shared::events::{ReaderEvent, TagEvent};

/// Failure to begin scanning. The Display text is shown to the user verbatim.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("{0}")]
    Start(String),

    #[error("reader is already scanning")]
    AlreadyScanning,
}

// ============================================================================
// 1 ▸ Reader trait – uniform way to start and spawn them
// ============================================================================

#[async_trait]
pub trait TagReader: Send + Sync + 'static {
    /// Display name for metrics / logs.
    fn name(&self) -> &'static str;

    /// Capacity of the queue between this reader and the session.
    fn capacity(&self) -> usize { 64 }

    /// Begin scanning. Events must only flow after this returned `Ok`.
    async fn start(&self) -> Result<(), ReaderError>;

    /// Pull events from the underlying source and push them into `tx`.
    /// Returns when the source is exhausted or `tx` is closed.
    async fn ingest(self: Arc<Self>, tx: mpsc::Sender<ReaderEvent>);

    /// Convenience helper: launches *ingest* on the runtime.
    fn spawn(self: Arc<Self>, tx: mpsc::Sender<ReaderEvent>) -> JoinHandle<()> {
        let name = self.name();
        task::spawn(async move {
            nfc_log!(Level::Info, "reader", "reader '{}' started", name);
            self.ingest(tx).await;
            nfc_log!(Level::Info, "reader", "reader '{}' exited", name);
        })
    }
}

/// Owns the background tasks bound to one scanning session and stops them
/// when dropped, whichever way the session ends.
#[derive(Debug, Default)]
pub struct ReaderGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl ReaderGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.tasks.push(handle);
    }

    /// Abort every task still running.
    pub fn release(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// 2 ▸ Line-oriented reader (stdin, file, in-memory)
// ============================================================================

type BoxedLines = Box<dyn AsyncBufRead + Send + Unpin>;

/// Where a `LineReader` takes its lines from.
#[derive(Debug, Clone)]
pub enum LineSource {
    Stdin,
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// Reads one scan per line: a serial number, or `!error` for a failed read.
///
/// Blank lines and lines starting with `#` are skipped. Anything that does not
/// look like a serial number (contains whitespace, too long) counts as a
/// failed read, like a garbled tag would.
pub struct LineReader {
    source: LineSource,
    input:  Mutex<Option<BoxedLines>>,
    consumed: AtomicBool,
}

impl LineReader {
    pub fn new(source: LineSource) -> Self {
        Self {
            source,
            input: Mutex::new(None),
            consumed: AtomicBool::new(false),
        }
    }

    pub fn stdin() -> Self {
        Self::new(LineSource::Stdin)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(LineSource::File(path.into()))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(LineSource::Bytes(bytes.into()))
    }

    async fn open(&self) -> Result<BoxedLines, ReaderError> {
        let lines: BoxedLines = match &self.source {
            LineSource::Stdin => Box::new(BufReader::new(tokio::io::stdin())),
            LineSource::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    ReaderError::Start(format!("cannot open {}: {}", path.display(), e))
                })?;
                Box::new(BufReader::new(file))
            }
            LineSource::Bytes(bytes) => Box::new(Cursor::new(bytes.clone())),
        };
        Ok(lines)
    }
}

/// Classify one input line. `None` means the line carries no event.
pub fn parse_line(line: &str) -> Option<ReaderEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if line.eq_ignore_ascii_case(READ_ERROR_MARKER)
        || line.len() > MAX_SERIAL_LEN
        || line.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Some(ReaderEvent::ReadingError);
    }
    Some(ReaderEvent::Reading(TagEvent::new(line)))
}

#[async_trait]
impl TagReader for LineReader {
    fn name(&self) -> &'static str {
        match self.source {
            LineSource::Stdin => "stdin",
            LineSource::File(_) => "file",
            LineSource::Bytes(_) => "memory",
        }
    }

    async fn start(&self) -> Result<(), ReaderError> {
        let mut input = self.input.lock().await;
        if input.is_some() || self.consumed.load(Ordering::Acquire) {
            return Err(ReaderError::AlreadyScanning);
        }
        *input = Some(self.open().await?);
        Ok(())
    }

    async fn ingest(self: Arc<Self>, tx: mpsc::Sender<ReaderEvent>) {
        let Some(input) = self.input.lock().await.take() else {
            nfc_log!(Level::Warn, "reader", "ingest called before start on '{}'", self.name());
            return;
        };
        self.consumed.store(true, Ordering::Release);

        let mut lines = LinesStream::new(input.lines());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    nfc_log!(Level::Warn, "reader", "'{}' read failed: {}", self.name(), e);
                    break;
                }
            };
            let Some(ev) = parse_line(&line) else { continue };
            if let ReaderEvent::ReadingError = ev {
                nfc_log!(Level::Debug, "reader", "unreadable line {:?}", line);
            }
            if tx.send(ev).await.is_err() {
                // session went away
                break;
            }
        }
    }
}

// ============================================================================
// 3 ▸ Driver channel reader
// ============================================================================

/// How long the driver pump waits for an event before checking whether the
/// session still listens.
const DRIVER_POLL: Duration = Duration::from_millis(50);

/// A reader fed by a hardware driver thread through a crossbeam channel.
///
/// The pump runs on a blocking thread that cannot be aborted. Once the
/// session stops listening it exits within [`DRIVER_POLL`] and leaves later
/// driver events in the channel. An event taken in that window is dropped.
pub struct ChannelReader {
    rx: CbReceiver<ReaderEvent>,
}

impl ChannelReader {
    /// Build from the receiver end the driver thread writes into.
    pub fn new(rx: CbReceiver<ReaderEvent>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl TagReader for ChannelReader {
    fn name(&self) -> &'static str {
        "driver_channel"
    }

    async fn start(&self) -> Result<(), ReaderError> {
        Ok(())
    }

    async fn ingest(self: Arc<Self>, tx: mpsc::Sender<ReaderEvent>) {
        // Offload the blocking recv loop to a dedicated OS thread
        let rx = self.rx.clone();
        let joined = task::spawn_blocking(move || {
            while !tx.is_closed() {
                match rx.recv_timeout(DRIVER_POLL) {
                    // blocking_send() will block _this_ thread only, never a Tokio worker
                    Ok(ev) => {
                        if tx.blocking_send(ev).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .await;
        if let Err(e) = joined {
            nfc_log!(Level::Error, "reader", "driver channel pump failed: {}", e);
        }
    }
}
