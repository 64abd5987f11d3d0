//! Per-connection identity allocation.

use std::fmt;

use uuid::Uuid;

/// Opaque identifier assigned to a client at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A fresh 128-bit random id in hyphenated UUID form.
pub fn new_identity() -> SessionId {
    SessionId(Uuid::new_v4().to_string())
}
