//! MeterDefinition: the rule specification matched against workload objects.
//!
//! Mirrors the shape of the cluster custom resource so definitions can be
//! loaded straight from YAML manifests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::key::{Keyed, ObjectKey};
use crate::object::ObjectMeta;

fn default_api_version() -> String {
    "marketplace.redhat.com/v1beta1".to_string()
}

fn default_kind() -> String {
    "MeterDefinition".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterDefinition {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: MeterDefinitionSpec,
}

impl MeterDefinition {
    /// Empty definition at generation 1 with no filters.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                namespace: Some(namespace.into()),
                uid: format!("uid-{}", name),
                name,
                generation: 1,
                ..Default::default()
            },
            spec: MeterDefinitionSpec::default(),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.metadata.uid = uid.into();
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.metadata.generation = generation;
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.spec.kind = Some(kind.into());
        self
    }

    /// Append a filter selecting objects labelled `key=value`.
    pub fn with_label_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut selector = LabelSelector::default();
        selector.match_labels.insert(key.into(), value.into());
        self.spec.resource_filters.push(ResourceFilter {
            label: Some(LabelFilter {
                label_selector: selector,
            }),
            ..Default::default()
        });
        self
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }
}

impl Keyed for MeterDefinition {
    fn key(&self) -> Result<ObjectKey, CoreError> {
        self.metadata.key()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterDefinitionSpec {
    /// API group of the metered workload (`apps`, empty for core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind of the metered workload (`Pod`, `Service`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Any filter matching selects the object.
    #[serde(default)]
    pub resource_filters: Vec<ResourceFilter>,
}

/// One alternative selection; every selector present must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<NamespaceFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerFilter>,
    /// Overrides `spec.kind` for this filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceFilter {
    /// Namespaces the object must live in. Empty matches every namespace.
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelFilter {
    pub label_selector: LabelSelector,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationFilter {
    #[serde(default)]
    pub match_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Kubernetes-style label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl std::fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectorOperator::In => write!(f, "In"),
            SelectorOperator::NotIn => write!(f, "NotIn"),
            SelectorOperator::Exists => write!(f, "Exists"),
            SelectorOperator::DoesNotExist => write!(f, "DoesNotExist"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION_YAML: &str = r#"
apiVersion: marketplace.redhat.com/v1beta1
kind: MeterDefinition
metadata:
  namespace: billing
  name: foo-pods
  uid: 5d1c
  generation: 2
spec:
  group: ""
  kind: Pod
  resourceFilters:
    - namespace:
        names: [billing, shared]
      label:
        labelSelector:
          matchLabels:
            app: foo
          matchExpressions:
            - key: tier
              operator: NotIn
              values: [test]
    - owner:
        kind: ReplicaSet
"#;

    #[test]
    fn parses_manifest() {
        let def: MeterDefinition = serde_yaml::from_str(DEFINITION_YAML).unwrap();
        assert_eq!(def.key().unwrap(), ObjectKey::new("billing", "foo-pods"));
        assert_eq!(def.generation(), 2);
        assert_eq!(def.uid(), "5d1c");
        assert_eq!(def.spec.resource_filters.len(), 2);

        let selector = &def.spec.resource_filters[0]
            .label
            .as_ref()
            .unwrap()
            .label_selector;
        assert_eq!(selector.match_labels["app"], "foo");
        assert_eq!(selector.match_expressions[0].operator, SelectorOperator::NotIn);
    }

    #[test]
    fn api_version_and_kind_default() {
        let def: MeterDefinition = serde_yaml::from_str(
            "metadata:\n  name: bare\nspec:\n  resourceFilters: []\n",
        )
        .unwrap();
        assert_eq!(def.kind, "MeterDefinition");
        assert_eq!(def.key().unwrap(), ObjectKey::cluster_scoped("bare"));
    }
}
