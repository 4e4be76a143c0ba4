//! Session and transport configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sockjs_session::SessionOptions;
//!
//! let options = SessionOptions::new()
//!     .with_response_limit(64 * 1024)
//!     .with_heartbeat_delay(Duration::from_secs(10))
//!     .with_disconnect_delay(Duration::from_secs(2));
//!
//! assert!(options.validate().is_ok());
//! ```
//!
//! Options deserialize from camelCase keys with durations in milliseconds:
//!
//! ```json
//! { "responseLimit": 131072, "heartbeatDelay": 25000, "disconnectDelay": 5000 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default streaming response limit (128 KiB).
pub const DEFAULT_RESPONSE_LIMIT: u64 = 128 * 1024;

/// Default idle interval before a heartbeat frame is written.
pub const DEFAULT_HEARTBEAT_DELAY: Duration = Duration::from_secs(25);

/// Default grace window without an attached receiver.
pub const DEFAULT_DISCONNECT_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// SessionOptions
// ============================================================================

/// Configuration shared by every session of a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    /// Bytes after which a streaming response terminates itself.
    ///
    /// Zero means unlimited, which keeps a single response open forever and
    /// is discouraged.
    pub response_limit: u64,

    /// Idle interval after which an attached receiver gets a heartbeat.
    #[serde(with = "duration_ms")]
    pub heartbeat_delay: Duration,

    /// How long a session survives without an attached receiver.
    ///
    /// Also the time a closed session lingers in the registry so reconnect
    /// attempts receive its close frame.
    #[serde(with = "duration_ms")]
    pub disconnect_delay: Duration,

    /// Whether an interrupted connection closes its session.
    pub close_on_interrupt: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl SessionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            response_limit: DEFAULT_RESPONSE_LIMIT,
            heartbeat_delay: DEFAULT_HEARTBEAT_DELAY,
            disconnect_delay: DEFAULT_DISCONNECT_DELAY,
            close_on_interrupt: true,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionOptions {
    /// Sets the streaming response limit in bytes (0 = unlimited).
    #[inline]
    #[must_use]
    pub fn with_response_limit(mut self, bytes: u64) -> Self {
        self.response_limit = bytes;
        self
    }

    /// Sets the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_delay(mut self, delay: Duration) -> Self {
        self.heartbeat_delay = delay;
        self
    }

    /// Sets the disconnect grace window.
    #[inline]
    #[must_use]
    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }

    /// Sets whether an interrupted connection closes its session.
    #[inline]
    #[must_use]
    pub fn with_close_on_interrupt(mut self, close: bool) -> Self {
        self.close_on_interrupt = close;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl SessionOptions {
    /// Returns the response limit, `None` when unlimited.
    #[inline]
    #[must_use]
    pub const fn response_limit(&self) -> Option<u64> {
        match self.response_limit {
            0 => None,
            limit => Some(limit),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a delay is zero.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_delay.is_zero() {
            return Err(Error::config("heartbeat delay must be greater than zero"));
        }
        if self.disconnect_delay.is_zero() {
            return Err(Error::config("disconnect delay must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
