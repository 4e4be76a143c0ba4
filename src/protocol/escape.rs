//! Selective percent-escaping for line-oriented transports.
//!
//! Eventsource streams break only on CR and LF, so only those two characters
//! and the escape character itself are encoded. Everything else, including
//! `+`, `&` and `#`, passes through unchanged.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;

use crate::error::{Error, Result};

// ============================================================================
// Escaping
// ============================================================================

/// Escapes `%`, CR and LF as `%25`, `%0D` and `%0A`.
#[must_use]
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['%', '\r', '\n']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Reverses [`escape`], decoding every `%XX` sequence.
///
/// # Errors
///
/// Returns [`Error::InvalidFrame`] if the decoded bytes are not UTF-8.
pub fn unescape(text: &str) -> Result<Cow<'_, str>> {
    urlencoding::decode(text)
        .map_err(|e| Error::invalid_frame(format!("escaped text is not valid UTF-8: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
