//! Wire types and constants shared between the scanner agent and anything
//! that talks to it (owner UIs, driver shims, test harnesses).

pub mod constants;
pub mod events;
