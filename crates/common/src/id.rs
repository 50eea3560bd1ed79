//! Identifiers: media IDs, media references and user IDs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::AppError;

/// ID generator for media records.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new media ID.
    ///
    /// Lowercase ULID: sortable by creation time and safe in URL paths.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }
}

/// Reference to a media record: `(origin, media_id)`.
///
/// Rendered as `origin/media_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaRef {
    /// Server the media originated from.
    pub origin: String,
    /// Media ID, unique within the origin.
    pub media_id: String,
}

impl MediaRef {
    /// Create a new reference.
    pub fn new(origin: impl Into<String>, media_id: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            media_id: media_id.into(),
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.media_id)
    }
}

impl FromStr for MediaRef {
    type Err = AppError;

    /// Accepts `origin/media_id` with an optional `mxc://` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("mxc://").unwrap_or(s);
        match trimmed.split_once('/') {
            Some((origin, media_id))
                if !origin.is_empty() && !media_id.is_empty() && !media_id.contains('/') =>
            {
                Ok(Self::new(origin, media_id))
            }
            _ => Err(AppError::Validation(format!("malformed media reference: {s}"))),
        }
    }
}

/// Server part of a user ID of the form `@localpart:server`.
///
/// Returns `None` when the ID has no server part.
#[must_use]
pub fn user_server(user_id: &str) -> Option<&str> {
    let rest = user_id.strip_prefix('@').unwrap_or(user_id);
    rest.split_once(':')
        .map(|(_, server)| server)
        .filter(|server| !server.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ulid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 26);
        assert_ne!(id1, id2);
        assert_eq!(id1, id1.to_lowercase());
    }

    #[test]
    fn test_media_ref_parse() {
        let r: MediaRef = "example.org/abc".parse().unwrap();
        assert_eq!(r, MediaRef::new("example.org", "abc"));

        let r: MediaRef = "mxc://example.org/abc".parse().unwrap();
        assert_eq!(r.to_string(), "example.org/abc");
    }

    #[test]
    fn test_media_ref_rejects_garbage() {
        assert!("example.org".parse::<MediaRef>().is_err());
        assert!("/abc".parse::<MediaRef>().is_err());
        assert!("example.org/a/b".parse::<MediaRef>().is_err());
    }

    #[test]
    fn test_user_server() {
        assert_eq!(user_server("@alice:example.org"), Some("example.org"));
        assert_eq!(user_server("@alice:example.org:8448"), Some("example.org:8448"));
        assert_eq!(user_server("@alice"), None);
        assert_eq!(user_server("@alice:"), None);
    }
}
