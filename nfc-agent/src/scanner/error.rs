use thiserror::Error;

use super::unlock::UnlockError;

/// Everything that can go wrong during a session. None of these escape the
/// session: each one is turned into a status line for the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("tag-reading capability is not available")]
    CapabilityUnsupported,

    #[error("could not start scanning: {0}")]
    StartScanFailed(String),

    #[error("tag could not be read")]
    ReadFailed,

    #[error("backend rejected the unlock (HTTP {status}): {detail}")]
    UnlockRejected { status: u16, detail: String },

    #[error("unlock request failed: {0}")]
    NetworkFailure(String),
}

impl From<UnlockError> for ScanError {
    fn from(e: UnlockError) -> Self {
        match e {
            UnlockError::Rejected { status, detail } => ScanError::UnlockRejected { status, detail },
            UnlockError::Network(msg) => ScanError::NetworkFailure(msg),
        }
    }
}
