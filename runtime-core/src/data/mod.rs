//! Core message envelope types
//!
//! Every payload that crosses the channel bus travels inside a [`Message`]
//! envelope carrying a per-producer timestamp, a per-producer sequence
//! number, and an [`ErrorCode`]. Envelopes are produced once and then shared
//! as `Arc<Message<T>>` by every subscriber of the channel; a stage that
//! needs to mutate the payload clones it explicitly.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;

/// Enumerated outcome tag embedded in output messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Processing succeeded
    #[default]
    Success,
    /// An algorithm or task failed while handling this message
    ProcessError,
    /// The producing unit was misconfigured
    ConfigError,
    /// Unclassified failure
    Unknown,
}

impl ErrorCode {
    /// Convert to string for logging/display
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::ProcessError => "process_error",
            ErrorCode::ConfigError => "config_error",
            ErrorCode::Unknown => "unknown",
        }
    }
}

/// Typed message envelope
///
/// `timestamp` is in seconds, monotonic per producer; `sequence` is assigned
/// by the publishing [`Writer`](crate::channel::Writer) and is strictly
/// increasing per producer per channel. Subscribers receive the envelope by
/// shared reference and must not mutate it in place.
#[derive(Debug, Clone)]
pub struct Message<T> {
    /// The payload
    pub payload: T,
    /// Capture/publish time in seconds, monotonic per producer
    pub timestamp: f64,
    /// Per-producer sequence number, assigned at publish time
    pub sequence: u64,
    /// Outcome tag; `Success` unless the producer says otherwise
    pub error_code: ErrorCode,
}

impl<T> Message<T> {
    /// Create a new envelope stamped with the current monotonic time
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            timestamp: monotonic_now(),
            sequence: 0,
            error_code: ErrorCode::Success,
        }
    }

    /// Override the timestamp (e.g. to pass through an upstream capture time)
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the outcome tag
    pub fn with_error_code(mut self, error_code: ErrorCode) -> Self {
        self.error_code = error_code;
        self
    }

    /// Whether the envelope is tagged `Success`
    pub fn is_success(&self) -> bool {
        self.error_code == ErrorCode::Success
    }
}

/// Seconds elapsed since the first call in this process
///
/// Anchored to a process-wide `Instant`, so values are monotonic across all
/// producers and comparable within the process. Not wall-clock time.
pub fn monotonic_now() -> f64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_now_is_monotonic() {
        let a = monotonic_now();
        let b = monotonic_now();
        assert!(b >= a);
    }

    #[test]
    fn test_new_message_defaults() {
        let msg = Message::new(7u32);
        assert_eq!(msg.payload, 7);
        assert_eq!(msg.sequence, 0);
        assert!(msg.is_success());
    }

    #[test]
    fn test_error_code_tagging() {
        let msg = Message::new(()).with_error_code(ErrorCode::ProcessError);
        assert!(!msg.is_success());
        assert_eq!(msg.error_code.as_str(), "process_error");
    }

    #[test]
    fn test_error_code_serde_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ProcessError).unwrap();
        assert_eq!(json, "\"process_error\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::ProcessError);
    }
}
