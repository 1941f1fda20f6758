//! Upstream credential handling.

use std::fmt;

use serde::{Deserialize, Deserializer};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Marker printed instead of the credential value.
pub const REDACTED: &str = "[REDACTED]";

/// API token presented to the upstream ERP on every call.
///
/// `Debug` and `Display` both print `[REDACTED]`. The backing buffer is zeroed
/// on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read-only access to the raw token.
    ///
    /// Callers must not log or persist the returned slice.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Render the header value, e.g. `Bearer <token>`; an empty scheme
    /// yields the raw token.
    #[must_use]
    pub fn header_value(&self, scheme: &str) -> Zeroizing<String> {
        if scheme.is_empty() {
            Zeroizing::new(self.0.clone())
        } else {
            Zeroizing::new(format!("{scheme} {}", self.0))
        }
    }

    /// Replace standalone occurrences of the token in `text` with `[REDACTED]`.
    ///
    /// An occurrence counts only when it is not glued to another word
    /// character (alphanumeric, `-` or `_`), so text that merely contains the
    /// token as a substring is returned unchanged.
    #[must_use]
    pub fn scrub(&self, text: &str) -> String {
        let token = self.0.as_str();
        if self.is_empty() || !text.contains(token) {
            return text.to_owned();
        }

        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        for (start, _) in text.match_indices(token) {
            let end = start + token.len();
            let glued_before = text[..start].chars().next_back().is_some_and(is_word_char);
            let glued_after = text[end..].chars().next().is_some_and(is_word_char);
            if glued_before || glued_after {
                continue;
            }
            out.push_str(&text[copied..start]);
            out.push_str(REDACTED);
            copied = end;
        }
        out.push_str(&text[copied..]);
        out
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}
