//! Protocol frames and their textual form.
//!
//! | Frame | Text |
//! |-------|------|
//! | [`Frame::Open`] | `o` |
//! | [`Frame::Messages`] | `a["m1","m2"]` |
//! | [`Frame::Heartbeat`] | `h` |
//! | [`Frame::Close`] | `c[3000,"Go away!"]` |
//!
//! Transports wrap the text in their own envelope (see [`crate::transport`]).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string};

use crate::error::{Error, Result};

// ============================================================================
// Reserved Close Values
// ============================================================================

/// Close code sent to a connection that lost the attach race.
pub const ANOTHER_CONNECTION_CODE: u16 = 2010;

/// Close reason paired with [`ANOTHER_CONNECTION_CODE`].
pub const ANOTHER_CONNECTION_REASON: &str = "Another connection still open";

/// Close code answered when a session closed without explicit metadata.
pub const GO_AWAY_CODE: u16 = 3000;

/// Close reason paired with [`GO_AWAY_CODE`].
pub const GO_AWAY_REASON: &str = "Go away!";

/// Close code recorded when an interrupted connection closes its session.
pub const INTERRUPTED_CODE: u16 = 1002;

/// Close reason paired with [`INTERRUPTED_CODE`].
pub const INTERRUPTED_REASON: &str = "Connection interrupted";

// ============================================================================
// CloseInfo
// ============================================================================

/// Close code and human-readable reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

impl CloseInfo {
    /// Creates close metadata.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The `2010 "Another connection still open"` pair.
    #[inline]
    #[must_use]
    pub fn another_connection() -> Self {
        Self::new(ANOTHER_CONNECTION_CODE, ANOTHER_CONNECTION_REASON)
    }

    /// The generic `3000 "Go away!"` pair.
    #[inline]
    #[must_use]
    pub fn go_away() -> Self {
        Self::new(GO_AWAY_CODE, GO_AWAY_REASON)
    }

    /// The `1002 "Connection interrupted"` pair.
    #[inline]
    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(INTERRUPTED_CODE, INTERRUPTED_REASON)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.code, self.reason)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One protocol-level unit sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Session opened.
    Open,
    /// Ordered batch of application messages.
    Messages(Vec<String>),
    /// Keep-alive.
    Heartbeat,
    /// Session closed.
    Close(CloseInfo),
}

impl Frame {
    /// Creates a close frame.
    #[inline]
    #[must_use]
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(CloseInfo::new(code, reason))
    }

    /// Creates a message frame holding a single message.
    #[inline]
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Messages(vec![message.into()])
    }

    /// Returns `true` for close frames.
    #[inline]
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Returns the frame's single-letter tag.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> char {
        match self {
            Self::Open => 'o',
            Self::Messages(_) => 'a',
            Self::Heartbeat => 'h',
            Self::Close(_) => 'c',
        }
    }

    /// Encodes the frame into its textual form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if payload serialization fails.
    pub fn encode(&self) -> Result<String> {
        let body = match self {
            Self::Open | Self::Heartbeat => String::new(),
            Self::Messages(messages) => to_string(messages)?,
            Self::Close(info) => to_string(&(info.code, &info.reason))?,
        };

        let mut text = String::with_capacity(1 + body.len());
        text.push(self.tag());
        text.push_str(&body);
        Ok(text)
    }

    /// Decodes a frame from its textual form.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFrame`] for an empty or unknown frame
    /// - [`Error::Json`] for a malformed payload
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let tag = chars
            .next()
            .ok_or_else(|| Error::invalid_frame("empty frame"))?;
        let body = chars.as_str();

        match tag {
            'o' | 'h' if !body.is_empty() => Err(Error::invalid_frame(format!(
                "unexpected payload after '{tag}'"
            ))),
            'o' => Ok(Self::Open),
            'h' => Ok(Self::Heartbeat),
            'a' => Ok(Self::Messages(from_str(body)?)),
            'c' => {
                let (code, reason): (u16, String) = from_str(body)?;
                Ok(Self::Close(CloseInfo { code, reason }))
            }
            other => Err(Error::invalid_frame(format!("unknown frame tag '{other}'"))),
        }
    }
}

// ============================================================================
// Coalescing
// ============================================================================

/// Merges the message frames at the head of `frames` into one frame.
///
/// Returns the frame to deliver next with the number of source frames it
/// covers, or `None` when `frames` is empty. Non-message frames are never
/// merged.
#[must_use]
pub fn coalesce_head<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> Option<(Frame, usize)> {
    let mut frames = frames.into_iter();
    let head = frames.next()?;

    let Frame::Messages(first) = head else {
        return Some((head.clone(), 1));
    };

    let mut batch = first.clone();
    let mut count = 1;
    for frame in frames {
        let Frame::Messages(next) = frame else {
            break;
        };
        batch.extend(next.iter().cloned());
        count += 1;
    }

    Some((Frame::Messages(batch), count))
}

// ============================================================================
// Tests
// ============================================================================
