// tests/session_tests.rs

//! Scan session behaviour against in-process stand-ins for the tag reader and
//! the unlock backend.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use crossbeam::channel::{Sender as CbSender, unbounded};
use serde_json::{Map, json};
use tokio::{sync::mpsc, time::timeout};

use nfc_agent::comms::{ChannelReader, ReaderError, TagReader};
use nfc_agent::config::model::SessionConfig;
use nfc_agent::scanner::{Notifications, Phase, ScanSession, ScanStatus, UnlockClient, UnlockError};
use shared::events::{Notification, ReaderEvent, TagEvent, UnlockResult};

const WAIT: Duration = Duration::from_secs(2);

// ───── stand-ins ────────────────────────────────────────────────────────────

/// Scripted backend: answers per serial number, optionally after a delay, and
/// records every call.
#[derive(Default)]
struct StubBackend {
    answers: Mutex<HashMap<String, (Duration, Result<UnlockResult, UnlockError>)>>,
    calls:   Mutex<Vec<String>>,
}

impl StubBackend {
    fn answer(self, serial: &str, res: Result<UnlockResult, UnlockError>) -> Self {
        self.answer_after(serial, Duration::ZERO, res)
    }

    fn answer_after(self, serial: &str, delay: Duration, res: Result<UnlockResult, UnlockError>) -> Self {
        self.answers.lock().unwrap().insert(serial.into(), (delay, res));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UnlockClient for StubBackend {
    async fn unlock(&self, serial: &str) -> Result<UnlockResult, UnlockError> {
        self.calls.lock().unwrap().push(serial.to_owned());
        let answer = self.answers.lock().unwrap().get(serial).cloned();
        let (delay, res) = answer.unwrap_or((
            Duration::ZERO,
            Err(UnlockError::Rejected { status: 404, detail: "NFC Tag not found".into() }),
        ));
        tokio::time::sleep(delay).await;
        res
    }
}

/// A reader whose `start()` always fails.
struct BrokenReader(&'static str);

#[async_trait]
impl TagReader for BrokenReader {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn start(&self) -> Result<(), ReaderError> {
        Err(ReaderError::Start(self.0.into()))
    }

    async fn ingest(self: Arc<Self>, _tx: mpsc::Sender<ReaderEvent>) {
        panic!("ingest must not run when start failed");
    }
}

fn character(name: &str, tag: &str) -> UnlockResult {
    let mut extra = Map::new();
    extra.insert("character_id".into(), json!(1));
    UnlockResult { name: name.into(), nfc_tag_id: tag.into(), is_unlocked: true, extra }
}

async fn activate(backend: Arc<StubBackend>) -> (ScanSession, Notifications, CbSender<ReaderEvent>) {
    let (drv_tx, drv_rx) = unbounded();
    let reader: Arc<dyn TagReader> = Arc::new(ChannelReader::new(drv_rx));
    let (session, notes) = ScanSession::activate(Some(reader), backend).await;
    (session, notes, drv_tx)
}

fn tap(drv: &CbSender<ReaderEvent>, serial: &str) {
    drv.send(ReaderEvent::Reading(TagEvent::new(serial))).unwrap();
}

/// Wait until the status line reads `expected`.
async fn wait_status(session: &ScanSession, expected: &str) {
    let mut rx = session.watch_status();
    let reached = matches!(
        timeout(WAIT, rx.wait_for(|s| s.to_string() == expected)).await,
        Ok(Ok(_))
    );
    assert!(reached, "status never became {expected:?}, last was {:?}", session.status_message());
}

/// Wait until no submission is in flight and the phase left `Submitting`.
async fn wait_settled(session: &ScanSession) {
    let mut phase = session.scanner().subscribe_phase();
    timeout(WAIT, phase.wait_for(|p| *p != Phase::Submitting))
        .await
        .expect("submission never settled")
        .unwrap();
    while session.scanner().in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn next_note(notes: &mut Notifications) -> Notification {
    timeout(WAIT, notes.recv()).await.expect("no notification").expect("channel closed")
}

// ───── activation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_capability_is_reported_and_inert() {
    let backend = Arc::new(StubBackend::default());
    let (session, mut notes) = ScanSession::activate(None, backend.clone()).await;

    assert_eq!(session.status_message(), "Web NFC is not supported on this device.");
    assert_eq!(session.phase(), Phase::Unsupported);
    assert!(!session.capability_supported());
    assert!(!session.is_listening());
    assert!(backend.calls().is_empty());
    assert!(notes.try_recv().is_err());
}

#[tokio::test]
async fn start_failure_shows_reader_message() {
    let backend = Arc::new(StubBackend::default());
    let reader: Arc<dyn TagReader> = Arc::new(BrokenReader("NFC Scan Start Failed"));
    let (session, _notes) = ScanSession::activate(Some(reader), backend.clone()).await;

    assert_eq!(session.status_message(), "Error: NFC Scan Start Failed");
    assert_eq!(session.phase(), Phase::FailedToStart);
    assert!(session.capability_supported());
    assert!(!session.is_listening());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn started_session_is_listening() {
    let (session, _notes, _drv) = activate(Arc::new(StubBackend::default())).await;

    assert_eq!(session.status(), ScanStatus::Listening);
    assert_eq!(session.phase(), Phase::Listening);
    assert!(session.is_listening());
}

// ───── tag read outcomes ────────────────────────────────────────────────────

#[tokio::test]
async fn successful_unlock_notifies_owner_in_order() {
    let result = character("Test Character", "test-serial");
    let backend = Arc::new(StubBackend::default().answer("test-serial", Ok(result.clone())));
    let (session, mut notes, drv) = activate(backend.clone()).await;

    tap(&drv, "test-serial");

    assert_eq!(next_note(&mut notes).await, Notification::ScanSuccess("test-serial".into()));
    assert_eq!(next_note(&mut notes).await, Notification::CharacterUnlocked(result));
    assert_eq!(next_note(&mut notes).await, Notification::Close);

    assert_eq!(session.status_message(), "Successfully unlocked: Test Character!");
    assert_eq!(session.phase(), Phase::Unlocked);
    assert_eq!(backend.calls(), vec!["test-serial".to_string()]);
    assert!(notes.try_recv().is_err());
}

#[tokio::test]
async fn rejected_unlock_keeps_session_open() {
    let backend = Arc::new(StubBackend::default().answer(
        "test-api-error",
        Err(UnlockError::Rejected { status: 500, detail: "Server Error".into() }),
    ));
    let (session, mut notes, drv) = activate(backend.clone()).await;

    tap(&drv, "test-api-error");
    wait_status(&session, "Failed to unlock character. Server said: Server Error").await;
    wait_settled(&session).await;

    assert_eq!(session.phase(), Phase::Listening);
    assert!(session.is_listening());
    assert_eq!(backend.calls(), vec!["test-api-error".to_string()]);
    assert!(notes.try_recv().is_err(), "no notification on a rejected unlock");
}

#[tokio::test]
async fn network_failure_keeps_session_open() {
    let backend = Arc::new(StubBackend::default().answer(
        "test-network-error",
        Err(UnlockError::Network("connection refused".into())),
    ));
    let (session, mut notes, drv) = activate(backend).await;

    tap(&drv, "test-network-error");
    wait_status(&session, "Network error or problem making the request.").await;
    wait_settled(&session).await;

    assert_eq!(session.phase(), Phase::Listening);
    assert!(notes.try_recv().is_err());
}

#[tokio::test]
async fn retry_after_rejection_can_unlock() {
    let backend = Arc::new(
        StubBackend::default()
            .answer("good-tag", Ok(character("Kaas", "good-tag"))),
    );
    let (session, mut notes, drv) = activate(backend.clone()).await;

    tap(&drv, "unknown-tag");
    wait_status(&session, "Failed to unlock character. Server said: NFC Tag not found").await;
    wait_settled(&session).await;

    tap(&drv, "good-tag");
    assert_eq!(next_note(&mut notes).await, Notification::ScanSuccess("good-tag".into()));
    assert_eq!(session.status_message(), "Successfully unlocked: Kaas!");
    assert_eq!(backend.calls(), vec!["unknown-tag".to_string(), "good-tag".to_string()]);
}

// ───── read errors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn read_errors_never_reach_network_or_owner() {
    let backend = Arc::new(StubBackend::default());
    let (session, mut notes, drv) = activate(backend.clone()).await;

    for _ in 0..3 {
        drv.send(ReaderEvent::ReadingError).unwrap();
    }
    wait_status(&session, "Could not read the tag. Please try again.").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.status(), ScanStatus::ReadError);
    assert_eq!(session.phase(), Phase::Listening);
    assert!(session.is_listening());
    assert!(backend.calls().is_empty());
    assert!(notes.try_recv().is_err());
}

#[tokio::test]
async fn read_error_overrides_previous_status() {
    let backend = Arc::new(StubBackend::default());
    let (session, _notes, drv) = activate(backend).await;

    tap(&drv, "unknown-tag");
    wait_status(&session, "Failed to unlock character. Server said: NFC Tag not found").await;

    drv.send(ReaderEvent::ReadingError).unwrap();
    wait_status(&session, "Could not read the tag. Please try again.").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_error_after_tap_is_not_overwritten() {
    let backend = Arc::new(StubBackend::default().answer_after(
        "slow-tag",
        Duration::from_secs(5),
        Ok(character("Traag", "slow-tag")),
    ));
    let (session, mut notes, drv) = activate(backend).await;

    tap(&drv, "slow-tag");
    drv.send(ReaderEvent::ReadingError).unwrap();
    wait_status(&session, "Could not read the tag. Please try again.").await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.status(), ScanStatus::ReadError);
    assert_eq!(session.phase(), Phase::Submitting);
    assert_eq!(session.scanner().in_flight(), 1);
    assert!(notes.try_recv().is_err());
}

// ───── concurrency ──────────────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_scans_last_response_wins() {
    // The first tap is slow to answer and fails, the second one succeeds
    // quickly: the failure lands last and owns the status line.
    let backend = Arc::new(
        StubBackend::default()
            .answer_after(
                "slow-tag",
                Duration::from_millis(200),
                Err(UnlockError::Rejected { status: 409, detail: "busy".into() }),
            )
            .answer("fast-tag", Ok(character("Snel", "fast-tag"))),
    );
    let (session, mut notes, drv) = activate(backend.clone()).await;

    tap(&drv, "slow-tag");
    tap(&drv, "fast-tag");

    assert_eq!(next_note(&mut notes).await, Notification::ScanSuccess("fast-tag".into()));
    wait_status(&session, "Failed to unlock character. Server said: busy").await;

    assert_eq!(session.phase(), Phase::Unlocked);
    let mut calls = backend.calls();
    calls.sort();
    assert_eq!(calls, vec!["fast-tag".to_string(), "slow-tag".to_string()]);

    let rest: Vec<_> = std::iter::from_fn(|| notes.try_recv().ok()).collect();
    assert_eq!(rest.iter().filter(|n| **n == Notification::Close).count(), 1);
}

// ───── teardown ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn deactivate_releases_reader() {
    let backend = Arc::new(StubBackend::default());
    let (drv_tx, drv_rx) = unbounded();
    let reader: Arc<dyn TagReader> = Arc::new(ChannelReader::new(drv_rx));
    let cfg = SessionConfig { shutdown_grace: Duration::from_millis(100) };
    let (session, _notes) = ScanSession::activate_with(Some(reader), backend.clone(), &cfg).await;
    let scanner = session.scanner().clone();

    session.deactivate().await;
    assert!(!scanner.is_listening());

    // Events after teardown go nowhere.
    let _ = drv_tx.send(ReaderEvent::Reading(TagEvent::new("late-tag")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn deactivate_gives_pending_unlock_a_grace_period() {
    let backend = Arc::new(StubBackend::default().answer_after(
        "slow-tag",
        Duration::from_millis(50),
        Ok(character("Geduld", "slow-tag")),
    ));
    let (drv_tx, drv_rx) = unbounded();
    let reader: Arc<dyn TagReader> = Arc::new(ChannelReader::new(drv_rx));
    let cfg = SessionConfig { shutdown_grace: Duration::from_secs(1) };
    let (session, mut notes) = ScanSession::activate_with(Some(reader), backend, &cfg).await;

    drv_tx.send(ReaderEvent::Reading(TagEvent::new("slow-tag"))).unwrap();
    let mut status = session.watch_status();
    timeout(WAIT, status.wait_for(|s| matches!(s, ScanStatus::TagDetected(_))))
        .await
        .unwrap()
        .unwrap();

    let scanner = session.scanner().clone();
    session.deactivate().await;

    assert_eq!(scanner.status().to_string(), "Successfully unlocked: Geduld!");
    assert_eq!(notes.try_recv().unwrap(), Notification::ScanSuccess("slow-tag".into()));
}

#[tokio::test]
async fn session_finishes_when_reader_ends() {
    let backend = Arc::new(StubBackend::default().answer("last-tag", Ok(character("Eind", "last-tag"))));
    let (mut session, mut notes, drv) = activate(backend).await;

    tap(&drv, "last-tag");
    drop(drv);

    timeout(WAIT, session.finished()).await.expect("session never finished");
    assert!(!session.is_listening());
    assert_eq!(session.status_message(), "Successfully unlocked: Eind!");
    assert_eq!(notes.try_recv().unwrap(), Notification::ScanSuccess("last-tag".into()));
}
