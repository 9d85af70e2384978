//! Stable `namespace/name` identity keys shared by rules and objects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identity key of a cluster resource.
///
/// Namespaced resources render as `namespace/name`, cluster-scoped ones as
/// just `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Parse `namespace/name` or `name`.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let mut parts = raw.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster_scoped(name)),
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::new(ns, name))
            }
            _ => Err(CoreError::KeyDerivation(format!(
                "'{}' is not a valid namespace/name key",
                raw
            ))),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Anything that can derive a stable identity key from its own fields.
pub trait Keyed {
    fn key(&self) -> Result<ObjectKey, CoreError>;
}
