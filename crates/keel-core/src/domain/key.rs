//! ResourceKey - identifies one reconcilable entity.
//!
//! The key is the queue's dedup key and is compared by value.
//! Textual form is `namespace/name`, or just `name` for cluster-scoped
//! resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeyParseError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    namespace: Option<String>,
    name: String,
}

impl ResourceKey {
    /// Namespaced key.
    pub fn namespaced(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            namespace: Some(namespace.as_ref().to_owned()),
            name: name.as_ref().to_owned(),
        }
    }

    /// Cluster-scoped key (no namespace).
    pub fn cluster(name: impl AsRef<str>) -> Self {
        Self {
            namespace: None,
            name: name.as_ref().to_owned(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster(name)),
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::namespaced(ns, name))
            }
            _ => Err(KeyParseError(s.to_string())),
        }
    }
}

impl From<&str> for ResourceKey {
    /// Lenient conversion used by tests and demos: anything that does not
    /// parse is treated as a cluster-scoped name.
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| Self::cluster(s))
    }
}
