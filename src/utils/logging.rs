use std::str::FromStr;

use tracing::Level;

/// Parse a configured log level. Accepts the `tracing` names in any case
/// and `warning` as an alias for `warn`.
pub fn parse_level(level: &str) -> Option<Level> {
    match level.trim() {
        l if l.eq_ignore_ascii_case("warning") => Some(Level::WARN),
        l => Level::from_str(l).ok(),
    }
}

/// Install the global fmt subscriber for the broker.
///
/// Delivery loops run on several workers, so events carry the thread id and
/// the emitting module. An unknown `level` falls back to `info` and is
/// reported once the subscriber is up. Repeated calls are no-ops.
pub fn init(level: &str) {
    let parsed = parse_level(level);
    let installed = tracing_subscriber::fmt()
        .with_max_level(parsed.unwrap_or(Level::INFO))
        .with_thread_ids(true)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed && parsed.is_none() {
        tracing::warn!(level, "unknown log level, using info");
    }
}
