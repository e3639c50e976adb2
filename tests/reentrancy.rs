//! Reentrancy tests: handlers that mutate the store, the subscriptions, or
//! the queue while a flush is being delivered.

use ripple::{
    ChangePipeline, Collection, Key, KeyHandler, PipelineConfig, SchedulerKind,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn manual_pipeline(source: &dyn ripple::ChangeSource) -> ChangePipeline {
    ChangePipeline::attach(
        source,
        PipelineConfig {
            scheduler: SchedulerKind::Manual,
        },
    )
}

fn counting_handler(counter: &Arc<AtomicUsize>) -> KeyHandler {
    let counter = Arc::clone(counter);
    Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_mutation_during_flush_delivers_next_cycle() {
    let users = Arc::new(Collection::new("users"));
    let pipeline = manual_pipeline(users.as_ref());

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let users = Arc::clone(&users);
        let calls = Arc::clone(&calls);
        pipeline.subscribe_on_key(
            "u1",
            Arc::new(move |_: &Vec<Key>| {
                // First delivery writes again; must not recurse into this
                // same flush.
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    users.upsert(json!({"id": "u1", "refreshed": true})).unwrap();
                }
            }),
        );
    }

    users.upsert(json!({"id": "u1"})).unwrap();
    pipeline.flush_now();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The reentrant write opened a new cycle.
    assert_eq!(pipeline.queue().len(), 1);
    pipeline.flush_now();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(pipeline.queue().is_empty());
}

#[test]
fn test_task_enqueued_during_flush_runs_next_flush() {
    let users = Collection::new("users");
    let pipeline = manual_pipeline(&users);

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let order = Arc::clone(&order);
        let queue = Arc::clone(pipeline.queue());
        pipeline.subscribe_on_key(
            "u1",
            Arc::new(move |_: &Vec<Key>| {
                order.lock().push("handler");
                let order = Arc::clone(&order);
                queue.enqueue(Box::new(move || {
                    order.lock().push("followup");
                }));
            }),
        );
    }

    users.upsert(json!({"id": "u1"})).unwrap();
    pipeline.flush_now();
    assert_eq!(*order.lock(), vec!["handler"]);

    pipeline.flush_now();
    assert_eq!(*order.lock(), vec!["handler", "followup"]);
}

#[test]
fn test_subscribe_during_flush_waits_for_next_cycle() {
    let users = Arc::new(Collection::new("users"));
    let pipeline = Arc::new(manual_pipeline(users.as_ref()));

    let late_calls = Arc::new(AtomicUsize::new(0));
    let late = counting_handler(&late_calls);
    {
        let pipeline = Arc::clone(&pipeline);
        let late = Arc::clone(&late);
        let registered = AtomicUsize::new(0);
        pipeline.clone().subscribe_on_key(
            "u1",
            Arc::new(move |_: &Vec<Key>| {
                if registered.fetch_add(1, Ordering::SeqCst) == 0 {
                    pipeline.subscribe_on_key("u1", Arc::clone(&late));
                }
            }),
        );
    }

    users.upsert(json!({"id": "u1"})).unwrap();
    pipeline.flush_now();
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);

    users.upsert(json!({"id": "u1", "v": 2})).unwrap();
    pipeline.flush_now();
    assert_eq!(late_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handler_unsubscribing_itself() {
    let users = Arc::new(Collection::new("users"));
    let pipeline = Arc::new(manual_pipeline(users.as_ref()));

    let calls = Arc::new(AtomicUsize::new(0));
    // Self-referential: the handler needs its own Arc to unsubscribe with.
    let slot: Arc<parking_lot::Mutex<Option<KeyHandler>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let handler: KeyHandler = {
        let pipeline = Arc::clone(&pipeline);
        let calls = Arc::clone(&calls);
        let slot = Arc::clone(&slot);
        Arc::new(move |_: &Vec<Key>| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = slot.lock().as_ref() {
                pipeline.unsubscribe_from_key(&Key::from("u1"), me);
            }
        })
    };
    *slot.lock() = Some(Arc::clone(&handler));
    pipeline.subscribe_on_key("u1", handler);

    users.upsert(json!({"id": "u1"})).unwrap();
    pipeline.flush_now();
    users.upsert(json!({"id": "u1", "v": 2})).unwrap();
    pipeline.flush_now();

    // Fired once, then it was gone.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.metrics().handler_registrations, 0);
}

#[test]
fn test_handler_unsubscribing_a_peer_mid_cycle() {
    let users = Arc::new(Collection::new("users"));
    let pipeline = Arc::new(manual_pipeline(users.as_ref()));

    let peer_calls = Arc::new(AtomicUsize::new(0));
    let peer = counting_handler(&peer_calls);
    pipeline.subscribe_on_key("u2", Arc::clone(&peer));

    {
        let pipeline = Arc::clone(&pipeline);
        let peer = Arc::clone(&peer);
        pipeline.clone().subscribe_on_key(
            "u1",
            Arc::new(move |_: &Vec<Key>| {
                pipeline.unsubscribe_from_key(&Key::from("u2"), &peer);
            }),
        );
    }

    // u1 changes first, so the remover runs before the peer's turn.
    users.upsert(json!({"id": "u1"})).unwrap();
    users.upsert(json!({"id": "u2"})).unwrap();
    pipeline.flush_now();

    assert_eq!(peer_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_nested_flush_now_is_bounded() {
    let users = Arc::new(Collection::new("users"));
    let pipeline = Arc::new(manual_pipeline(users.as_ref()));

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let pipeline = Arc::clone(&pipeline);
        let calls = Arc::clone(&calls);
        pipeline.clone().subscribe_on_key(
            "u1",
            Arc::new(move |_: &Vec<Key>| {
                calls.fetch_add(1, Ordering::SeqCst);
                // The queue was drained before delivery; this returns
                // immediately instead of recursing.
                pipeline.flush_now();
            }),
        );
    }

    users.upsert(json!({"id": "u1"})).unwrap();
    pipeline.flush_now();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
