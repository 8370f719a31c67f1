//! User-facing status line.

use std::fmt;

use shared::constants::{
    REJECTED_PREFIX, START_FAILED_PREFIX, STATUS_INITIALIZING, STATUS_LISTENING,
    STATUS_NETWORK_ERROR, STATUS_READ_ERROR, STATUS_UNSUPPORTED, UNLOCKED_PREFIX,
};

use super::error::ScanError;

/// What the scanner currently tells the user. `Display` renders the exact
/// text shown on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Initializing,
    Unsupported,
    StartFailed(String),
    Listening,
    /// Serial number of the tag being submitted.
    TagDetected(String),
    /// Name of the unlocked character.
    Unlocked(String),
    /// Detail returned by the backend.
    Rejected(String),
    NetworkError,
    ReadError,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Initializing => f.write_str(STATUS_INITIALIZING),
            ScanStatus::Unsupported => f.write_str(STATUS_UNSUPPORTED),
            ScanStatus::StartFailed(msg) => write!(f, "{START_FAILED_PREFIX}{msg}"),
            ScanStatus::Listening => f.write_str(STATUS_LISTENING),
            ScanStatus::TagDetected(serial) => write!(f, "Tag detected: {serial}. Unlocking..."),
            ScanStatus::Unlocked(name) => write!(f, "{UNLOCKED_PREFIX}{name}!"),
            ScanStatus::Rejected(detail) => write!(f, "{REJECTED_PREFIX}{detail}"),
            ScanStatus::NetworkError => f.write_str(STATUS_NETWORK_ERROR),
            ScanStatus::ReadError => f.write_str(STATUS_READ_ERROR),
        }
    }
}

impl From<&ScanError> for ScanStatus {
    fn from(e: &ScanError) -> Self {
        match e {
            ScanError::CapabilityUnsupported => ScanStatus::Unsupported,
            ScanError::StartScanFailed(msg) => ScanStatus::StartFailed(msg.clone()),
            ScanError::ReadFailed => ScanStatus::ReadError,
            ScanError::UnlockRejected { detail, .. } => ScanStatus::Rejected(detail.clone()),
            ScanError::NetworkFailure(_) => ScanStatus::NetworkError,
        }
    }
}
