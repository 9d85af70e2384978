//! End-to-end behaviour of registry, index and coordinator together.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use meterdef_core::{CandidateObject, EngineConfig, MeterDefinition, ObjectKey};
use meterdef_index::{IndexChange, ObjectIndex, ResyncCoordinator};
use meterdef_queue::Queue;
use meterdef_rules::{Admission, Predicate, PredicateCompiler, RuleRegistry, SelectorCompiler};

struct Engine {
    registry: Arc<RuleRegistry>,
    index: Arc<ObjectIndex>,
    coordinator: ResyncCoordinator,
}

impl Engine {
    fn new() -> Self {
        Self::with_compiler(Arc::new(SelectorCompiler))
    }

    fn with_compiler(compiler: Arc<dyn PredicateCompiler>) -> Self {
        let registry = Arc::new(RuleRegistry::new(compiler, &EngineConfig::default()));
        let index = Arc::new(ObjectIndex::new(Arc::clone(&registry)));
        let coordinator = ResyncCoordinator::new(Arc::clone(&registry), Arc::clone(&index));
        Self {
            registry,
            index,
            coordinator,
        }
    }

    fn settle(&self) {
        self.coordinator.drain().expect("coordinator drain");
    }

    fn objects_for(&self, rule: &ObjectKey) -> BTreeSet<ObjectKey> {
        self.index
            .by_index(rule)
            .unwrap()
            .iter()
            .map(|a| a.key.clone())
            .collect()
    }
}

fn rule(name: &str, app: &str) -> MeterDefinition {
    MeterDefinition::new("billing", name)
        .with_kind("Pod")
        .with_label_filter("app", app)
}

fn pod(name: &str, app: &str) -> CandidateObject {
    CandidateObject::new("Pod", "billing", name).with_label("app", app)
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("billing", name)
}

#[test]
fn scenario_rule_delete_empties_index() {
    let engine = Engine::new();
    let r1 = rule("R1", "foo");
    engine.registry.add(r1.clone()).unwrap();
    engine.settle();

    engine.index.add(pod("objX", "foo")).unwrap();

    let listed = engine.index.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, key("objX"));
    assert_eq!(listed[0].rules, vec![key("R1")]);

    engine.registry.delete(&r1).unwrap();
    engine.settle();

    assert!(engine.index.list().is_empty());
    assert!(engine.index.by_index(&key("R1")).unwrap().is_empty());
}

#[test]
fn scenario_rule_delete_empties_index_without_intermediate_drain() {
    let engine = Engine::new();
    let r1 = rule("R1", "foo");
    engine.registry.add(r1.clone()).unwrap();
    engine.index.add(pod("objX", "foo")).unwrap();
    assert_eq!(engine.index.list()[0].rules, vec![key("R1")]);

    engine.registry.delete(&r1).unwrap();
    engine.settle();

    assert!(engine.index.list().is_empty());
    assert!(engine.index.by_index(&key("R1")).unwrap().is_empty());
}

#[test]
fn rule_deletes_cascade_past_objects_that_fail_evaluation() {
    let engine = Engine::new();
    let label_only = MeterDefinition::new("billing", "label-only").with_label_filter("app", "foo");
    engine.registry.add(label_only.clone()).unwrap();
    let mut kindless = pod("bare", "foo");
    kindless.kind.clear();
    engine.index.add(kindless).unwrap();
    engine.index.add(pod("web", "foo")).unwrap();

    engine.registry.add(rule("pods", "foo")).unwrap();
    engine.registry.delete(&label_only).unwrap();
    for _ in 0..3 {
        if engine.coordinator.drain().is_ok() {
            break;
        }
    }

    assert!(engine.registry.changes().is_empty());
    assert!(engine.objects_for(&key("label-only")).is_empty());
    assert_eq!(engine.index.list_keys(), vec![key("web")]);
    assert_eq!(engine.objects_for(&key("pods")), BTreeSet::from([key("web")]));
    engine.index.verify().unwrap();
}

#[test]
fn scenario_generation_gates_updates() {
    let engine = Engine::new();
    engine.registry.add(rule("R1", "foo")).unwrap();
    engine.settle();

    engine.index.add(pod("objY", "foo")).unwrap();
    let changes = engine.index.changes();
    changes.pop_ready(|_| -> Result<(), ()> { Ok(()) }).unwrap();
    let before = engine.index.get_by_key(&key("objY")).unwrap();

    assert_eq!(
        engine.index.update(pod("objY", "foo")).unwrap(),
        IndexChange::Unchanged
    );
    assert!(changes.is_empty());
    assert_eq!(engine.index.get_by_key(&key("objY")).unwrap(), before);

    assert_eq!(
        engine.index.update(pod("objY", "nothing").with_generation(2)).unwrap(),
        IndexChange::Removed
    );
    assert!(engine.index.get_by_key(&key("objY")).is_none());
}

#[test]
fn cascade_delete_clears_every_reference() {
    let engine = Engine::new();
    let doomed = rule("doomed", "foo");
    engine.registry.add(doomed.clone()).unwrap();
    engine.registry.add(rule("keeper", "bar")).unwrap();
    for i in 0..20 {
        let app = if i % 2 == 0 { "foo" } else { "bar" };
        engine.index.add(pod(&format!("p{}", i), app)).unwrap();
    }
    engine.settle();
    assert_eq!(engine.objects_for(&key("doomed")).len(), 10);

    engine.registry.delete(&doomed).unwrap();
    engine.settle();

    assert!(engine.objects_for(&key("doomed")).is_empty());
    assert_eq!(engine.objects_for(&key("keeper")).len(), 10);
    assert_eq!(engine.index.len(), 10);
    engine.index.verify().unwrap();
}

#[test]
fn inverted_index_matches_associations() {
    let engine = Engine::new();
    engine.registry.add(rule("a", "x")).unwrap();
    engine.registry.add(rule("b", "y")).unwrap();
    engine
        .registry
        .add(MeterDefinition::new("billing", "any-team").with_kind("Pod").with_label_filter("team", "t"))
        .unwrap();

    for (name, app, team) in [("o1", "x", true), ("o2", "y", true), ("o3", "x", false), ("o4", "z", true)] {
        let mut obj = pod(name, app);
        if team {
            obj = obj.with_label("team", "t");
        }
        engine.index.add(obj).unwrap();
    }

    for rule_key in engine.index.indexed_rules() {
        let expected: BTreeSet<_> = engine
            .index
            .list()
            .iter()
            .filter(|a| a.contains_rule(&rule_key))
            .map(|a| a.key.clone())
            .collect();
        assert_eq!(engine.objects_for(&rule_key), expected, "rule {}", rule_key);
    }

    engine.index.delete(&pod("o1", "x")).unwrap();
    assert!(!engine.objects_for(&key("a")).contains(&key("o1")));
    assert!(!engine.objects_for(&key("any-team")).contains(&key("o1")));
    engine.index.verify().unwrap();
}

#[test]
fn find_matches_is_exact_subset() {
    let engine = Engine::new();
    let apps = ["a", "b", "a", "c", "a"];
    for (i, app) in apps.iter().enumerate() {
        engine.registry.add(rule(&format!("r{}", i), app)).unwrap();
    }

    let matched: Vec<_> = engine
        .registry
        .find_matches(&pod("o", "a"), false)
        .unwrap()
        .into_iter()
        .map(|r| r.key.name.clone())
        .collect();
    assert_eq!(matched, vec!["r0", "r2", "r4"]);
}

#[test]
fn rapid_rule_writes_are_capped_without_errors() {
    let engine = Engine::new();
    let outcomes: Vec<_> = (1..=11)
        .map(|g| engine.registry.update(rule("hot", "foo").with_generation(g)))
        .collect();

    assert!(outcomes.iter().all(|o| o.is_ok()));
    let admitted = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(Admission::Admitted)))
        .count();
    assert_eq!(admitted, 10);
}

#[test]
fn memoized_outcome_until_cache_is_skipped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let compiler: Arc<dyn PredicateCompiler> =
        Arc::new(move |_: &MeterDefinition| -> Result<Arc<dyn Predicate>, String> {
            let counter = Arc::clone(&counter);
            Ok(Arc::new(move |_: &CandidateObject| -> Result<bool, String> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }))
        });
    let engine = Engine::with_compiler(compiler);
    engine.registry.add(rule("r", "foo")).unwrap();

    engine.index.add(pod("o", "foo")).unwrap();
    engine.index.add(pod("o", "foo")).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    engine.index.resync().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn replace_then_rule_resync_converges() {
    let engine = Engine::new();
    engine.registry.add(rule("stale", "foo")).unwrap();
    engine.settle();
    engine.index.replace(vec![pod("a", "foo"), pod("b", "bar")]).unwrap();
    assert_eq!(engine.index.list_keys(), vec![key("a")]);

    // A missed delete and a missed add, healed by one snapshot each.
    engine.registry.resync(vec![rule("fresh", "bar")]).unwrap();
    engine.settle();
    assert!(engine.objects_for(&key("stale")).is_empty());

    engine.index.replace(vec![pod("a", "foo"), pod("b", "bar")]).unwrap();
    assert_eq!(engine.index.list_keys(), vec![key("b")]);
    assert_eq!(engine.objects_for(&key("fresh")), BTreeSet::from([key("b")]));
}

#[test]
fn concurrent_object_writers_and_coordinator_stay_consistent() {
    let engine = Arc::new(Engine::new());
    engine.registry.add(rule("r1", "foo")).unwrap();
    engine.registry.add(rule("r2", "foo")).unwrap();
    engine.settle();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..50 {
                    let name = format!("t{}-o{}", t, i);
                    engine.index.add(pod(&name, "foo")).unwrap();
                    if i % 5 == 0 {
                        engine.index.delete(&pod(&name, "foo")).unwrap();
                    }
                }
            })
        })
        .collect();

    let r2 = rule("r2", "foo");
    engine.registry.delete(&r2).unwrap();
    engine.settle();

    for writer in writers {
        writer.join().unwrap();
    }
    engine.settle();
    engine.index.rematch_all(false).unwrap();

    assert_eq!(engine.index.len(), 4 * 40);
    assert!(engine.objects_for(&key("r2")).is_empty());
    assert_eq!(engine.objects_for(&key("r1")).len(), 4 * 40);
    engine.index.verify().unwrap();
}
