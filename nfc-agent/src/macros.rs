/// Logs a line tagged with the component that produced it.
/// Usage:
/// ```rust,ignore
/// nfc_log!(Level::Info, "session", "Listening on {}", reader.name());
/// nfc_log!(Level::Warn, "unlock", "Backend rejected {}: {}", serial, detail);
/// ```
/// Timestamp, level, pid and tid are added by the `fern` dispatcher, so the
/// final line reads like:
/// [2026-10-17T16:32:10+02:00][INFO ][nfc_agent::scanner::session][pid=4568][tid=ThreadId(3)] [session] Listening on stdin
#[macro_export]
macro_rules! nfc_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            concat!("[", $component, "] ", $fmt)
            $(, $($arg)+)?
        );
    };
}
