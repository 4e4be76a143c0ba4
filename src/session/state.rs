//! Session lifecycle states.

use std::fmt;

/// Lifecycle state of a [`Session`](super::Session).
///
/// States are ordered; a session only ever moves to a greater state.
///
/// ```text
/// Opening ──► Active ──► Closing ──► Closed
///    │                      ▲           ▲
///    └──────────────────────┴───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Created, `open` frame not yet delivered.
    Opening,
    /// `open` frame delivered.
    Active,
    /// Close requested, close frame pending on the attached receiver.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` while the session accepts application messages.
    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Opening | Self::Active)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[inline]
    #[must_use]
    pub fn can_advance_to(&self, next: Self) -> bool {
        next > *self
    }

    /// Returns the lowercase state name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
