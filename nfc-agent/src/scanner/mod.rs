//! The scan session: reader events in, unlock calls out, status and owner
//! notifications as the observable result.

pub mod error;
pub mod session;
pub mod status;
pub mod unlock;

pub use error::ScanError;
pub use session::{Notifications, Phase, ScanSession, Scanner};
pub use status::ScanStatus;
pub use unlock::{HttpUnlockClient, UnlockClient, UnlockError};
