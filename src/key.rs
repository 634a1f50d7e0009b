use std::fmt;

use serde::{Deserialize, Serialize};

/// Anonymous identity that flag treatments and tracked events are attributed to.
///
/// A session generates one random key at startup with [`Key::random`] and keeps it for its whole
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key {
    matching_key: String,
}

impl Key {
    /// Use an existing matching key.
    pub fn new(matching_key: impl Into<String>) -> Key {
        Key {
            matching_key: matching_key.into(),
        }
    }

    /// Generate a fresh anonymous key (UUID v4).
    pub fn random() -> Key {
        Key::new(uuid::Uuid::new_v4().to_string())
    }

    /// The key string sent to the backend.
    pub fn matching_key(&self) -> &str {
        &self.matching_key
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.matching_key)
    }
}
