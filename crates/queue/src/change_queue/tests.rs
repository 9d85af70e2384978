//! Tests for the coalescing change queue.

use std::sync::Arc;
use std::time::Duration;

use meterdef_core::ObjectKey;

use super::*;

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("ns", name)
}

fn drain(queue: &ChangeQueue<u32>) -> Vec<(DeltaKind, ObjectKey, u32)> {
    let mut seen = Vec::new();
    while let Ok(Some(_)) = queue.pop_ready(|d: &Delta<u32>| -> Result<(), ()> {
        seen.push((d.kind, d.key.clone(), d.object));
        Ok(())
    }) {}
    seen
}

#[test]
fn pops_in_insertion_order() {
    let queue = ChangeQueue::new("test");
    queue.add(key("a"), 1).unwrap();
    queue.add(key("b"), 2).unwrap();
    queue.delete(key("c"), 3).unwrap();

    let seen = drain(&queue);
    assert_eq!(
        seen,
        vec![
            (DeltaKind::Added, key("a"), 1),
            (DeltaKind::Added, key("b"), 2),
            (DeltaKind::Deleted, key("c"), 3),
        ]
    );
    assert!(queue.is_empty());
}

#[test]
fn later_delta_coalesces_in_place() {
    let queue = ChangeQueue::new("test");
    queue.add(key("a"), 1).unwrap();
    queue.add(key("b"), 2).unwrap();
    queue.update(key("a"), 10).unwrap();

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.keys(), vec![key("a"), key("b")]);

    let seen = drain(&queue);
    assert_eq!(seen[0], (DeltaKind::Added, key("a"), 10));
}

#[test]
fn add_then_delete_leaves_nothing() {
    let queue = ChangeQueue::new("test");
    queue.add(key("a"), 1).unwrap();
    queue.delete(key("a"), 1).unwrap();

    assert!(queue.is_empty());
    assert!(queue.keys().is_empty());
    assert!(drain(&queue).is_empty());
}

#[test]
fn retaining_queue_keeps_delete_of_unseen_add() {
    let queue = ChangeQueue::with_policy("rules", CoalescePolicy::RetainDeletes);
    queue.add(key("a"), 1).unwrap();
    queue.add(key("b"), 2).unwrap();
    queue.delete(key("a"), 3).unwrap();

    assert_eq!(queue.keys(), vec![key("a"), key("b")]);
    assert_eq!(
        drain(&queue),
        vec![(DeltaKind::Deleted, key("a"), 3), (DeltaKind::Added, key("b"), 2)]
    );
}

#[test]
fn update_then_delete_is_single_delete() {
    let queue = ChangeQueue::new("test");
    queue.update(key("a"), 1).unwrap();
    queue.delete(key("a"), 2).unwrap();

    assert_eq!(drain(&queue), vec![(DeltaKind::Deleted, key("a"), 2)]);
}

#[test]
fn failed_handler_requeues_at_head() {
    let queue = ChangeQueue::new("test");
    queue.add(key("a"), 1).unwrap();
    queue.add(key("b"), 2).unwrap();

    let result = queue.pop_ready(|_: &Delta<u32>| Err("boom"));
    assert_eq!(result, Err("boom"));
    assert_eq!(queue.keys(), vec![key("a"), key("b")]);

    let seen = drain(&queue);
    assert_eq!(seen[0], (DeltaKind::Added, key("a"), 1));
}

#[test]
fn requeue_folds_newer_delta() {
    let queue = Arc::new(ChangeQueue::new("test"));
    queue.add(key("a"), 1).unwrap();

    let producer = Arc::clone(&queue);
    let result = queue.pop_ready(|_: &Delta<u32>| {
        // A newer change lands while the failing handler runs.
        producer.update(key("a"), 5).unwrap();
        Err(())
    });
    assert!(result.is_err());

    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get(&key("a")).unwrap().kind, DeltaKind::Added);
    assert_eq!(queue.get(&key("a")).unwrap().object, 5);
}

#[test]
fn requeue_cancelled_by_newer_delete() {
    let queue = Arc::new(ChangeQueue::new("test"));
    queue.add(key("a"), 1).unwrap();

    let producer = Arc::clone(&queue);
    let _ = queue.pop_ready(|_: &Delta<u32>| {
        producer.delete(key("a"), 1).unwrap();
        Err(())
    });
    assert!(queue.is_empty());
}

#[test]
fn closed_queue_rejects_writes() {
    let queue: ChangeQueue<u32> = ChangeQueue::new("rules");
    queue.close();
    assert_eq!(queue.add(key("a"), 1), Err(QueueError::Closed("rules".to_string())));
    assert!(queue.is_closed());
}

#[test]
fn has_synced_tracks_initial_population() {
    let queue = ChangeQueue::new("test");
    assert!(!queue.has_synced());

    queue.add(key("a"), 1).unwrap();
    queue.add(key("b"), 2).unwrap();
    queue.mark_populated();
    assert!(!queue.has_synced());

    // Keys pushed after population don't hold back sync.
    queue.add(key("c"), 3).unwrap();

    queue.pop_ready(|_: &Delta<u32>| -> Result<(), ()> { Ok(()) }).unwrap();
    assert!(!queue.has_synced());
    queue.pop_ready(|_: &Delta<u32>| -> Result<(), ()> { Ok(()) }).unwrap();
    assert!(queue.has_synced());
    assert_eq!(queue.len(), 1);
}

#[test]
fn has_synced_ignores_failed_pop() {
    let queue = ChangeQueue::new("test");
    queue.add(key("a"), 1).unwrap();
    queue.mark_populated();

    let _ = queue.pop_ready(|_: &Delta<u32>| Err(()));
    assert!(!queue.has_synced());
    queue.pop_ready(|_: &Delta<u32>| -> Result<(), ()> { Ok(()) }).unwrap();
    assert!(queue.has_synced());
}

#[tokio::test]
async fn pop_waits_for_producer() {
    let queue = Arc::new(ChangeQueue::new("test"));

    let consumer = Arc::clone(&queue);
    let handle = tokio::spawn(async move {
        let mut got = None;
        consumer
            .pop(|d: &Delta<u32>| -> Result<(), ()> {
                got = Some(d.object);
                Ok(())
            })
            .await
            .unwrap();
        got
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.add(key("a"), 7).unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("consumer woke up")
        .unwrap();
    assert_eq!(got, Some(7));
}

#[tokio::test]
async fn close_releases_waiting_consumer() {
    let queue: Arc<ChangeQueue<u32>> = Arc::new(ChangeQueue::new("test"));

    let consumer = Arc::clone(&queue);
    let handle = tokio::spawn(async move {
        consumer
            .pop(|_: &Delta<u32>| -> Result<(), ()> { Ok(()) })
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("consumer released")
        .unwrap();
    assert_eq!(result, Ok(None));
}

#[tokio::test]
async fn closed_queue_still_drains_backlog() {
    let queue = ChangeQueue::new("test");
    queue.add(key("a"), 1).unwrap();
    queue.close();

    let first = queue
        .pop(|_: &Delta<u32>| -> Result<(), ()> { Ok(()) })
        .await;
    assert_eq!(first, Ok(Some(key("a"))));

    let second = queue
        .pop(|_: &Delta<u32>| -> Result<(), ()> { Ok(()) })
        .await;
    assert_eq!(second, Ok(None));
}
