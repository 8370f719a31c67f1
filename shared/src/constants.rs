/// Path of the backend endpoint that unlocks the character bound to a tag.
pub const UNLOCK_PATH: &str = "/api/unlock-character";

pub const STATUS_INITIALIZING: &str = "Initializing NFC scanner...";
pub const STATUS_UNSUPPORTED: &str = "Web NFC is not supported on this device.";
pub const STATUS_LISTENING: &str = "NFC scan started. Tap a tag to unlock.";
pub const STATUS_READ_ERROR: &str = "Could not read the tag. Please try again.";
pub const STATUS_NETWORK_ERROR: &str = "Network error or problem making the request.";

pub const START_FAILED_PREFIX: &str = "Error: ";
pub const UNLOCKED_PREFIX: &str = "Successfully unlocked: ";
pub const REJECTED_PREFIX: &str = "Failed to unlock character. Server said: ";

/// Used when an error response carries no usable `detail`.
pub const UNKNOWN_ERROR_DETAIL: &str = "Unknown error";

/// Line a text-based tag source emits when the antenna failed to read a tag.
pub const READ_ERROR_MARKER: &str = "!error";
/// Longest serial number accepted from a text-based tag source.
pub const MAX_SERIAL_LEN: usize = 128;
