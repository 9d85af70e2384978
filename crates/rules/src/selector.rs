//! Built-in predicate compiler for MeterDefinition resource filters.
//!
//! An object matches a definition when its group and kind agree with the
//! definition and ANY resource filter matches. A filter matches when ALL of
//! the selectors it carries match.

use std::collections::BTreeMap;
use std::sync::Arc;

use meterdef_core::{
    CandidateObject, LabelSelector, LabelSelectorRequirement, MeterDefinition, ResourceFilter,
    SelectorOperator,
};

use crate::predicate::{Predicate, PredicateCompiler};

/// Compiles namespace / label / annotation / owner selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorCompiler;

impl PredicateCompiler for SelectorCompiler {
    fn compile(&self, definition: &MeterDefinition) -> Result<Arc<dyn Predicate>, String> {
        let spec = &definition.spec;
        if spec.resource_filters.is_empty() {
            return Err("spec.resourceFilters must contain at least one filter".to_string());
        }

        for (i, filter) in spec.resource_filters.iter().enumerate() {
            validate_filter(filter).map_err(|e| format!("resourceFilters[{}]: {}", i, e))?;
        }

        Ok(Arc::new(SelectorPredicate {
            group: spec.group.clone(),
            kind: spec.kind.clone().filter(|k| !k.is_empty()),
            filters: spec.resource_filters.clone(),
        }))
    }
}

fn validate_filter(filter: &ResourceFilter) -> Result<(), String> {
    if filter.namespace.is_none()
        && filter.label.is_none()
        && filter.annotation.is_none()
        && filter.owner.is_none()
        && filter.kind.is_none()
    {
        return Err("filter must set at least one selector".to_string());
    }
    if let Some(label) = &filter.label {
        for req in &label.label_selector.match_expressions {
            validate_requirement(req)?;
        }
    }
    if let Some(owner) = &filter.owner {
        if owner.kind.is_none() && owner.name.is_none() {
            return Err("owner selector needs a kind or a name".to_string());
        }
    }
    Ok(())
}

fn validate_requirement(req: &LabelSelectorRequirement) -> Result<(), String> {
    if req.key.is_empty() {
        return Err("matchExpressions key must not be empty".to_string());
    }
    match req.operator {
        SelectorOperator::In | SelectorOperator::NotIn if req.values.is_empty() => Err(format!(
            "operator {} on '{}' requires at least one value",
            req.operator, req.key
        )),
        SelectorOperator::Exists | SelectorOperator::DoesNotExist if !req.values.is_empty() => {
            Err(format!(
                "operator {} on '{}' must not carry values",
                req.operator, req.key
            ))
        }
        _ => Ok(()),
    }
}

struct SelectorPredicate {
    group: Option<String>,
    kind: Option<String>,
    filters: Vec<ResourceFilter>,
}

impl Predicate for SelectorPredicate {
    fn matches(&self, object: &CandidateObject) -> Result<bool, String> {
        let needs_kind = self.kind.is_some() || self.filters.iter().any(|f| f.kind.is_some());
        if needs_kind && object.kind.is_empty() {
            return Err("object has no kind".to_string());
        }

        if let Some(group) = &self.group {
            if object.group() != group.as_str() {
                return Ok(false);
            }
        }

        Ok(self
            .filters
            .iter()
            .any(|filter| filter_matches(filter, self.kind.as_deref(), object)))
    }
}

fn filter_matches(filter: &ResourceFilter, default_kind: Option<&str>, object: &CandidateObject) -> bool {
    if let Some(kind) = filter.kind.as_deref().or(default_kind) {
        if object.kind != kind {
            return false;
        }
    }

    if let Some(ns) = &filter.namespace {
        if !ns.names.is_empty() {
            let object_ns = object.metadata.namespace.as_deref().unwrap_or("");
            if !ns.names.iter().any(|n| n == object_ns) {
                return false;
            }
        }
    }

    if let Some(label) = &filter.label {
        if !selector_matches(&label.label_selector, &object.metadata.labels) {
            return false;
        }
    }

    if let Some(annotation) = &filter.annotation {
        let all = annotation
            .match_annotations
            .iter()
            .all(|(k, v)| object.metadata.annotations.get(k) == Some(v));
        if !all {
            return false;
        }
    }

    if let Some(owner) = &filter.owner {
        let any = object.metadata.owner_references.iter().any(|r| {
            owner.kind.as_ref().map_or(true, |k| &r.kind == k)
                && owner.name.as_ref().map_or(true, |n| &r.name == n)
        });
        if !any {
            return false;
        }
    }

    true
}

/// Kubernetes label-selector semantics over a label map.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let labels_ok = selector
        .match_labels
        .iter()
        .all(|(k, v)| labels.get(k) == Some(v));

    labels_ok
        && selector.match_expressions.iter().all(|req| {
            let value = labels.get(&req.key);
            match req.operator {
                SelectorOperator::In => value.is_some_and(|v| req.values.contains(v)),
                SelectorOperator::NotIn => value.map_or(true, |v| !req.values.contains(v)),
                SelectorOperator::Exists => value.is_some(),
                SelectorOperator::DoesNotExist => value.is_none(),
            }
        })
}
