//! Shared utilities: logging setup and the crate-level error type.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::persistence::StorageError;

    #[test]
    fn logging_init_accepts_levels() {
        // Repeated calls must not panic.
        logging::init("info");
        logging::init("debug");
        logging::init("bogus");
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        use tracing::Level;

        assert_eq!(logging::parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(logging::parse_level(" warning "), Some(Level::WARN));
        assert_eq!(logging::parse_level("Trace"), Some(Level::TRACE));
        assert_eq!(logging::parse_level("verbose"), None);
    }

    #[test]
    fn error_wraps_domain_errors() {
        let err: Error = StorageError::Closed.into();
        assert!(matches!(err, Error::Storage(StorageError::Closed)));
        assert_eq!(err.to_string(), "store is closed");

        let err: Error = BrokerError::QueueNotFound("q".into()).into();
        assert_eq!(err.to_string(), "queue `q` not found");
    }
}
