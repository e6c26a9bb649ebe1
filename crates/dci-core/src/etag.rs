//! Opaque version stamps.
//!
//! An etag is regenerated on every write and is not derived from the record
//! content. Conditional writes compare the stored value with the one the
//! caller supplied in `If-Match`.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    /// Generate a fresh stamp: the md5 hex digest of a random UUID.
    pub fn generate() -> Self {
        let digest = md5::compute(Uuid::new_v4().as_bytes());
        Self(format!("{:x}", digest))
    }

    /// Parse an `If-Match` header value. Weak markers and quotes are ignored.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let value = value.strip_prefix("W/").unwrap_or(value);
        let value = value.trim_matches('"');
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Etag {
    fn from(value: String) -> Self {
        Self(value)
    }
}
