//! Error types for swivel-scan
//!
//! Failure classes and how the scan loop treats them:
//! - Transient radio errors (timeout, busy): retried next pass
//! - Unavailable radio: fatal, engine stops
//! - Store failure for one device: logged, that sighting is dropped
//! - Store unavailable: pass aborted, fatal after bounded retries

use std::time::Duration;
use thiserror::Error;

/// Radio discovery capability errors
#[derive(Error, Debug)]
pub enum RadioError {
    /// Discovery did not finish within its timeout
    #[error("Discovery timed out after {0:?}")]
    Timeout(Duration),

    /// Stack busy or temporarily refusing scans
    #[error("Radio busy: {0}")]
    Busy(String),

    /// Adapter missing, powered off, or permission denied
    #[error("Radio unavailable: {0}")]
    Unavailable(String),
}

impl RadioError {
    /// Whether the next pass should simply try again
    pub fn is_transient(&self) -> bool {
        !matches!(self, RadioError::Unavailable(_))
    }
}

/// Main error type for swivel-scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// Radio discovery errors
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// Store and configuration errors from swivel-common
    #[error(transparent)]
    Store(#[from] swivel_common::Error),

    /// Lifecycle method called in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Replay input could not be read or parsed
    #[error("Replay input error: {0}")]
    Replay(String),
}

/// Convenience Result type using swivel-scan ScanError
pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_error_transience() {
        assert!(RadioError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(RadioError::Busy("scan in progress".to_string()).is_transient());
        assert!(!RadioError::Unavailable("adapter powered off".to_string()).is_transient());
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: ScanError = swivel_common::Error::NotFound("device abc".to_string()).into();
        assert_eq!(err.to_string(), "Not found: device abc");
    }
}
