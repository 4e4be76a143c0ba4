//! Type-safe identifiers.
//!
//! | Type | Source |
//! |------|--------|
//! | [`SessionId`] | Chosen by the client, carried in the request path |
//! | [`AttachToken`] | Generated per accepted attach, process-unique |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// SessionId
// ============================================================================

/// Opaque session identifier.
///
/// The routing layer extracts it from the URL; the core only requires it to
/// be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSessionId`] if `id` is empty.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::invalid_session_id("session id must not be empty"));
        }
        Ok(Self(id))
    }

    /// Generates a random session id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ============================================================================
// AttachToken
// ============================================================================

/// Global counter for attach tokens.
static ATTACH_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one accepted attachment of a receiver to a session.
///
/// Detach requests carry the token so a stale detach never clears a newer
/// attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachToken(u64);

impl AttachToken {
    /// Allocates the next token.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(ATTACH_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttachToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
