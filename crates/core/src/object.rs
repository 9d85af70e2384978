//! Workload objects observed in the cluster.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::key::{Keyed, ObjectKey};

/// Metadata block shared by objects and rule definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// Bumped by the API server on every spec change.
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Derive the `namespace/name` key. An empty namespace means cluster-scoped.
    pub fn key(&self) -> Result<ObjectKey, CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::KeyDerivation(
                "metadata.name must not be empty".to_string(),
            ));
        }
        Ok(match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ObjectKey::new(ns, &self.name),
            _ => ObjectKey::cluster_scoped(&self.name),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

/// A workload object that rules are matched against.
///
/// The engine never owns these; it keeps a snapshot inside each Association.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateObject {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
}

impl CandidateObject {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: kind.into(),
            metadata: ObjectMeta {
                namespace: Some(namespace.into()),
                name: name.into(),
                generation: 1,
                ..Default::default()
            },
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.metadata.generation = generation;
        self
    }

    pub fn with_owner(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.metadata.owner_references.push(OwnerReference {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        });
        self
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    /// API group portion of `apiVersion` (`apps/v1` → `apps`, `v1` → ``).
    pub fn group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }
}

impl Keyed for CandidateObject {
    fn key(&self) -> Result<ObjectKey, CoreError> {
        self.metadata.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_namespace_and_name() {
        let obj = CandidateObject::new("Pod", "billing", "web-0");
        assert_eq!(obj.key().unwrap(), ObjectKey::new("billing", "web-0"));
    }

    #[test]
    fn empty_namespace_is_cluster_scoped() {
        let mut obj = CandidateObject::new("Node", "", "node-a");
        obj.metadata.namespace = Some(String::new());
        assert_eq!(obj.key().unwrap(), ObjectKey::cluster_scoped("node-a"));
    }

    #[test]
    fn missing_name_fails_key_derivation() {
        let obj = CandidateObject::new("Pod", "billing", "");
        assert!(matches!(obj.key(), Err(CoreError::KeyDerivation(_))));
    }

    #[test]
    fn group_is_taken_from_api_version() {
        let mut obj = CandidateObject::new("Deployment", "ns", "d");
        assert_eq!(obj.group(), "");
        obj.api_version = "apps/v1".to_string();
        assert_eq!(obj.group(), "apps");
    }

    #[test]
    fn deserializes_kubernetes_style_yaml() {
        let obj: CandidateObject = serde_json::from_str(
            r#"{
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "namespace": "billing",
                    "name": "web-0",
                    "generation": 4,
                    "labels": {"app": "foo"},
                    "ownerReferences": [{"kind": "ReplicaSet", "name": "web"}]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(obj.generation(), 4);
        assert_eq!(obj.metadata.labels["app"], "foo");
        assert_eq!(obj.metadata.owner_references[0].kind, "ReplicaSet");
    }
}
