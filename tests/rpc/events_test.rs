mod common;

use std::sync::{Arc, Mutex};

use runworker::events::RESERVED_EVENTS;
use runworker::supervisor::RpcError;
use runworker::EventError;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use common::{within, worker};

#[tokio::test]
async fn test_reserved_names_fail_before_sending() {
    let worker = worker("chatty").await;
    for name in RESERVED_EVENTS {
        match worker.emit_to_worker(name, Value::Null) {
            Err(RpcError::Event(EventError::Reserved(reported))) => assert_eq!(reported, name),
            other => panic!("Expected Reserved for {name}, got {:?}", other),
        }
    }
    // Not reserved: the load-failure channel doubles as a custom event.
    assert!(worker.emit_to_worker("error", Value::Null).is_ok());
    assert!(worker.is_alive());
    worker.terminate();
}

#[tokio::test]
async fn test_worker_event_fires_before_call_settles() {
    let worker = worker("chatty").await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second"] {
        let sink = seen.clone();
        worker.on("pong", move |payload| {
            sink.lock().unwrap().push((tag, payload.clone()));
        });
    }

    let result = worker.call(&["ping"], vec![json!({"n": 1})]).await.unwrap();
    assert_eq!(result, None);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("first", json!({"n": 1})), ("second", json!({"n": 1}))]
    );
    worker.terminate();
}

#[tokio::test]
async fn test_coordinator_event_reaches_worker_listener() {
    let worker = worker("chatty").await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    worker.on("poked", move |payload| {
        let _ = tx.send(payload.clone());
    });

    worker.emit_to_worker("poke", json!("hi")).unwrap();
    worker.emit_to_worker("poke", json!([1, 2])).unwrap();

    assert_eq!(within(rx.recv()).await, Some(json!("hi")));
    assert_eq!(within(rx.recv()).await, Some(json!([1, 2])));
    worker.terminate();
}

#[tokio::test]
async fn test_worker_side_reserved_names_are_rejected() {
    let worker = worker("chatty").await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    worker.on("custom", move |payload| {
        let _ = tx.send(payload.clone());
    });

    let err = worker.call(&["shout"], vec![json!("exit")]).await.unwrap_err();
    let remote = err.remote().unwrap();
    assert_eq!(remote.message, "'exit' is a reserved message keyword");
    assert_eq!(remote.code(), Some("RESERVED_EVENT"));

    worker.call(&["shout"], vec![json!("custom")]).await.unwrap();
    assert_eq!(within(rx.recv()).await, Some(Value::Null));
    worker.terminate();
}

#[tokio::test]
async fn test_module_event_from_deferred_call() {
    let worker = worker("demo").await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    worker.on("helloworld", move |payload| {
        let _ = tx.send(payload.clone());
    });

    assert_eq!(
        worker.call(&["action1"], vec![json!("out")]).await.unwrap(),
        Some(json!(1))
    );
    assert_eq!(rx.try_recv().unwrap(), json!("hi"));
    worker.terminate();
}
