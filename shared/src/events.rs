//! Events and payloads crossing the agent's two boundaries.
//!
//! * Reader side: `ReaderEvent` is what a tag-reading capability delivers.
//! * Backend side: `UnlockRequest` goes out, `UnlockResult` / `ErrorBody`
//!   come back as JSON.
//! * Owner side: `Notification` is emitted to whoever hosts the scanner.
//!
//! Field names on the backend side follow the backend's JSON exactly
//! (`serialNumber`, `nfc_tag_id`, `is_unlocked`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One successful tag read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEvent {
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
}

impl TagEvent {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self { serial_number: serial_number.into() }
    }
}

/// Everything a tag reader can report once scanning has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// A tag was read (`reading`).
    Reading(TagEvent),
    /// The reader saw a tag but could not read it (`readingerror`).
    ReadingError,
}

/// Body of `POST /api/unlock-character`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRequest {
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
}

/// Success body of the unlock endpoint.
///
/// Only the three fields below are required; anything else the backend sends
/// (riddle hints, model paths, ...) is kept in `extra` so the owner receives
/// the full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockResult {
    pub name: String,
    pub nfc_tag_id: String,
    pub is_unlocked: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Error body of the unlock endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorBody {
    /// Human readable detail: strings verbatim, anything else as compact JSON.
    pub fn detail_text(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Notifications emitted to the scanner's owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum Notification {
    /// Carries the serial number of the tag that was unlocked.
    ScanSuccess(String),
    CharacterUnlocked(UnlockResult),
    /// Asks the owner to dismiss the scanner.
    Close,
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::ScanSuccess(_) => "scan-success",
            Notification::CharacterUnlocked(_) => "character-unlocked",
            Notification::Close => "close",
        }
    }
}
