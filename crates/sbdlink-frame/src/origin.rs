use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of the device on the far side of the channel (modem IMEI).
///
/// Channel metadata only; never written into a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(Arc<str>);

impl OriginId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OriginId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OriginId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}
