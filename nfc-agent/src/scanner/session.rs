//! Scan session state machine
//! ==========================
//! ```text
//! Activating ──no capability──────────▶ Unsupported      (terminal)
//!     │      ──start() failed─────────▶ FailedToStart    (terminal)
//!     ▼
//! Listening ◀──read error / rejected / network error──┐
//!     │                                               │
//!     └──tag read──▶ Submitting ───────────────────────┘
//!                        └──unlocked──▶ Unlocked       (terminal; owner tears down)
//! ```
//! Reader events are handled in delivery order; only the wait for the
//! unlock response runs on its own task. Overlapping reads are not
//! serialized: whichever unlock response settles last owns the status line.
//! `Unlocked` is sticky, a later failure only changes the status text.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use log::Level;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
};

use shared::events::{Notification, ReaderEvent, TagEvent};

use super::{error::ScanError, status::ScanStatus, unlock::UnlockClient};
use crate::comms::readers::{ReaderGuard, TagReader};
use crate::config::model::SessionConfig;
use crate::telemetry::{self, UnlockOutcome};

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Activating,
    Unsupported,
    FailedToStart,
    Listening,
    Submitting,
    Unlocked,
}

/// Owner side of the notification stream.
pub type Notifications = mpsc::UnboundedReceiver<Notification>;

/// Session state shared by the dispatch loop and every in-flight submission.
pub struct Scanner {
    client:    Arc<dyn UnlockClient>,
    status:    watch::Sender<ScanStatus>,
    phase:     watch::Sender<Phase>,
    listening: watch::Sender<bool>,
    in_flight: AtomicUsize,
    notify:    mpsc::UnboundedSender<Notification>,
}

impl Scanner {
    pub fn new(client: Arc<dyn UnlockClient>, notify: mpsc::UnboundedSender<Notification>) -> Self {
        Self {
            client,
            status: watch::Sender::new(ScanStatus::Initializing),
            phase: watch::Sender::new(Phase::Activating),
            listening: watch::Sender::new(false),
            in_flight: AtomicUsize::new(0),
            notify,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_listening(&self) -> bool {
        *self.listening.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Unlock requests currently on the wire.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: ScanStatus) {
        nfc_log!(Level::Info, "session", "status: {}", status);
        self.status.send_replace(status);
    }

    fn set_phase(&self, next: Phase) {
        let prev = self.phase.send_replace(next);
        if prev != next {
            nfc_log!(Level::Debug, "session", "phase {:?} -> {:?}", prev, next);
        }
    }

    fn set_listening(&self, on: bool) {
        self.listening.send_replace(on);
    }

    /// Leave `Submitting`/`Listening` for `next` unless already unlocked.
    /// Runs under the phase lock so callers can fold `in_flight` updates into
    /// the same step.
    fn advance(p: &mut Phase, next: Phase) -> bool {
        if matches!(*p, Phase::Listening | Phase::Submitting) && *p != next {
            nfc_log!(Level::Debug, "session", "phase {:?} -> {:?}", *p, next);
            *p = next;
            true
        } else {
            false
        }
    }

    fn emit(&self, n: Notification) {
        nfc_log!(Level::Debug, "session", "emit {}", n.name());
        if self.notify.send(n).is_err() {
            nfc_log!(Level::Debug, "session", "owner stopped listening for notifications");
        }
    }

    fn fail(&self, err: &ScanError) {
        nfc_log!(Level::Warn, "session", "{}", err);
        self.set_status(ScanStatus::from(err));
    }

    /// First half of `reading`, run by the dispatch loop in delivery order:
    /// count the request and show the detected tag.
    pub fn begin_submission(&self, tag: &TagEvent) {
        telemetry::record_scan();
        self.phase.send_if_modified(|p| {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            Self::advance(p, Phase::Submitting)
        });
        self.set_status(ScanStatus::TagDetected(tag.serial_number.clone()));
    }

    /// Second half of `reading`: wait for the backend and report the outcome.
    /// Must follow a [`Scanner::begin_submission`] for the same tag.
    pub async fn finish_submission(&self, tag: TagEvent) {
        let serial = tag.serial_number;
        let outcome = self.client.unlock(&serial).await;

        match outcome {
            Ok(result) => {
                telemetry::record_unlock(UnlockOutcome::Success);
                self.set_status(ScanStatus::Unlocked(result.name.clone()));
                self.phase.send_if_modified(|p| {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    let changed = *p != Phase::Unlocked;
                    if changed {
                        nfc_log!(Level::Debug, "session", "phase {:?} -> {:?}", *p, Phase::Unlocked);
                    }
                    *p = Phase::Unlocked;
                    changed
                });
                self.emit(Notification::ScanSuccess(serial));
                self.emit(Notification::CharacterUnlocked(result));
                self.emit(Notification::Close);
            }
            Err(e) => {
                let err = ScanError::from(e);
                telemetry::record_unlock(match err {
                    ScanError::UnlockRejected { .. } => UnlockOutcome::Rejected,
                    _ => UnlockOutcome::Network,
                });
                self.fail(&err);
                // another tap may have started while this one was on the wire
                self.phase.send_if_modified(|p| {
                    let still_running = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                    still_running == 0 && Self::advance(p, Phase::Listening)
                });
            }
        }
    }

    /// `readingerror`: tell the user to try again. Never touches the network.
    pub fn on_reading_error(&self) {
        telemetry::record_read_error();
        self.fail(&ScanError::ReadFailed);
    }
}

/// A scanner bound to one reader for its whole lifetime.
///
/// Dropping the session stops the reader and aborts pending submissions;
/// [`ScanSession::deactivate`] does the same but lets in-flight requests
/// settle for the configured grace period first.
pub struct ScanSession {
    scanner:  Arc<Scanner>,
    capability_supported: bool,
    guard:    ReaderGuard,
    dispatch: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ScanSession {
    /// Activate with default session settings.
    pub async fn activate(
        capability: Option<Arc<dyn TagReader>>,
        client: Arc<dyn UnlockClient>,
    ) -> (Self, Notifications) {
        Self::activate_with(capability, client, &SessionConfig::default()).await
    }

    /// Acquire the reader, start scanning and begin dispatching its events.
    pub async fn activate_with(
        capability: Option<Arc<dyn TagReader>>,
        client: Arc<dyn UnlockClient>,
        cfg: &SessionConfig,
    ) -> (Self, Notifications) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let scanner = Arc::new(Scanner::new(client, notify_tx));
        let mut session = ScanSession {
            scanner: scanner.clone(),
            capability_supported: capability.is_some(),
            guard: ReaderGuard::new(),
            dispatch: None,
            shutdown: None,
        };

        let Some(reader) = capability else {
            scanner.fail(&ScanError::CapabilityUnsupported);
            scanner.set_phase(Phase::Unsupported);
            return (session, notify_rx);
        };

        if let Err(e) = reader.start().await {
            scanner.fail(&ScanError::StartScanFailed(e.to_string()));
            scanner.set_phase(Phase::FailedToStart);
            return (session, notify_rx);
        }

        nfc_log!(Level::Info, "session", "scanning with reader '{}'", reader.name());
        scanner.set_status(ScanStatus::Listening);
        scanner.set_phase(Phase::Listening);
        scanner.set_listening(true);

        let (tx, rx) = mpsc::channel(reader.capacity());
        session.guard.push(reader.spawn(tx));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        session.shutdown = Some(shutdown_tx);
        session.dispatch = Some(tokio::spawn(dispatch(
            scanner,
            rx,
            shutdown_rx,
            cfg.shutdown_grace,
        )));

        (session, notify_rx)
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    pub fn status(&self) -> ScanStatus {
        self.scanner.status()
    }

    pub fn status_message(&self) -> String {
        self.scanner.status().to_string()
    }

    pub fn phase(&self) -> Phase {
        self.scanner.phase()
    }

    pub fn capability_supported(&self) -> bool {
        self.capability_supported
    }

    pub fn is_listening(&self) -> bool {
        self.scanner.is_listening()
    }

    pub fn watch_status(&self) -> watch::Receiver<ScanStatus> {
        self.scanner.subscribe_status()
    }

    /// Resolves once the reader has ended and every submission has settled.
    /// Returns immediately for sessions that never started listening.
    pub async fn finished(&mut self) {
        if let Some(handle) = self.dispatch.as_mut() {
            if let Err(e) = handle.await {
                nfc_log!(Level::Error, "session", "dispatch task failed: {}", e);
            }
            self.dispatch = None;
        }
    }

    /// Stop scanning and release the reader. Unlock requests already on the
    /// wire get the configured grace period to settle.
    pub async fn deactivate(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.guard.release();
        self.finished().await;
        self.scanner.set_listening(false);
        nfc_log!(Level::Info, "session", "deactivated in phase {:?}", self.scanner.phase());
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch.take() {
            handle.abort();
        }
        self.scanner.set_listening(false);
    }
}

/// Route reader events until the reader ends or the owner deactivates.
async fn dispatch(
    scanner: Arc<Scanner>,
    mut rx: mpsc::Receiver<ReaderEvent>,
    mut shutdown: oneshot::Receiver<()>,
    grace: Duration,
) {
    let mut submissions = JoinSet::new();
    let stopped_by_owner = loop {
        tokio::select! {
            _ = &mut shutdown => break true,
            ev = rx.recv() => match ev {
                Some(ReaderEvent::Reading(tag)) => {
                    scanner.begin_submission(&tag);
                    let scanner = scanner.clone();
                    submissions.spawn(async move { scanner.finish_submission(tag).await });
                }
                Some(ReaderEvent::ReadingError) => scanner.on_reading_error(),
                None => {
                    nfc_log!(Level::Info, "session", "reader ended");
                    break false;
                }
            },
            Some(done) = submissions.join_next(), if !submissions.is_empty() => {
                if let Err(e) = done {
                    nfc_log!(Level::Error, "session", "submission task failed: {}", e);
                }
            }
        }
    };

    // reader is released from here on
    drop(rx);
    scanner.set_listening(false);

    let settle = async { while submissions.join_next().await.is_some() {} };
    if stopped_by_owner {
        if tokio::time::timeout(grace, settle).await.is_err() {
            nfc_log!(
                Level::Warn,
                "session",
                "{} unlock request(s) still pending after {:?}, aborting",
                submissions.len(),
                grace
            );
            submissions.abort_all();
        }
    } else {
        settle.await;
    }
}
