mod common;

use std::time::Duration;

use futures::future::join_all;
use runworker::supervisor::{spawn, CallableKind, LoadMode, OpaqueKind, Proxy, RpcError};
use runworker::protocol::ScalarKind;
use serde_json::{json, Value};

use common::{options, within, worker};

#[tokio::test]
async fn test_basic_scenario() {
    let worker = worker("demo").await;

    assert_eq!(
        worker.call(&["add"], vec![json!(2), json!(3)]).await.unwrap(),
        Some(json!(5))
    );
    assert_eq!(
        worker.call(&["delayed"], vec![json!(4)]).await.unwrap(),
        Some(json!(8))
    );
    assert_eq!(worker.call(&["list", "0"], vec![]).await.unwrap(), Some(json!(4)));
    assert_eq!(worker.call(&["list", "1"], vec![]).await.unwrap(), Some(json!(5)));
    assert_eq!(
        worker.call(&["namespace", "sub1"], vec![]).await.unwrap(),
        Some(json!(3))
    );
    assert_eq!(
        worker.call(&["test"], vec![json!("asd")]).await.unwrap(),
        Some(json!("asd!"))
    );

    worker.terminate();
}

#[tokio::test]
async fn test_typed_call() {
    let worker = worker("demo").await;
    let add = worker.stub(&["add"]).unwrap();
    assert_eq!(add.kind(), CallableKind::Sync);
    assert_eq!(add.call_as::<i64>(vec![json!(40), json!(2)]).await.unwrap(), 42);
    assert_eq!(worker.stub(&["delayed"]).unwrap().kind(), CallableKind::Deferred);
    worker.terminate();
}

#[tokio::test]
async fn test_mirror_keeps_declaration_order_and_hides_scalars() {
    let worker = worker("demo").await;
    let proxy = worker.proxy();

    let keys = proxy.keys();
    assert_eq!(&keys[..4], &["add", "delayed", "action1", "action2"]);

    for key in ["x", "y", "z"] {
        assert!(proxy.get(key).unwrap().is_opaque(), "{key} should be opaque");
    }
    assert!(matches!(
        proxy.get("x"),
        Some(Proxy::Opaque(OpaqueKind::Scalar(ScalarKind::Number)))
    ));
    assert!(matches!(proxy.get("v1"), Some(Proxy::Opaque(OpaqueKind::Null))));
    assert!(matches!(
        worker.call(&["x"], vec![]).await,
        Err(RpcError::NoSuchPath(path)) if path == "x"
    ));

    // The scalar in the middle still occupies index 1.
    let mixed = proxy.get("mixed").unwrap();
    assert!(mixed.index(1).unwrap().is_opaque());
    assert_eq!(
        worker.call(&["mixed", "2"], vec![]).await.unwrap(),
        Some(json!("third"))
    );

    worker.terminate();
}

#[tokio::test]
async fn test_pending_values() {
    let worker = worker("demo").await;
    assert_eq!(worker.stub(&["ready"]).unwrap().kind(), CallableKind::Pending);
    assert_eq!(worker.call(&["action3"], vec![]).await.unwrap(), Some(json!(true)));
    assert_eq!(worker.call(&["ready"], vec![]).await.unwrap(), Some(json!("ready")));
    assert_eq!(worker.call(&["ready"], vec![]).await.unwrap(), Some(json!("ready")));
    worker.terminate();
}

#[tokio::test]
async fn test_absent_result_differs_from_null() {
    let worker = worker("demo").await;
    assert_eq!(worker.call(&["nothing"], vec![]).await.unwrap(), None);
    assert_eq!(worker.call(&["null"], vec![]).await.unwrap(), Some(Value::Null));
    assert_eq!(worker.call(&["echo"], vec![]).await.unwrap(), None);
    assert_eq!(
        worker.call(&["echo"], vec![Value::Null]).await.unwrap(),
        Some(Value::Null)
    );

    let nested = json!({"list": [1, "two", {"three": 3.5}], "flag": false});
    assert_eq!(
        worker.call(&["echo"], vec![nested.clone()]).await.unwrap(),
        Some(nested)
    );
    worker.terminate();
}

#[tokio::test]
async fn test_remote_errors_keep_their_fields() {
    let worker = worker("demo").await;

    let err = worker.call(&["error"], vec![]).await.unwrap_err();
    let remote = err.remote().expect("remote error");
    assert_eq!(remote.message, "test error");
    assert_eq!(remote.code(), Some("E_TEST"));

    let err = worker.call(&["nativeError"], vec![]).await.unwrap_err();
    assert!(err.remote().unwrap().message.contains("invalid digit"));

    let err = worker
        .call(&["add"], vec![json!("two"), json!(3)])
        .await
        .unwrap_err();
    assert_eq!(err.remote().unwrap().code(), Some("INVALID_ARGUMENT"));

    assert!(worker.is_alive());
    worker.terminate();
}

#[tokio::test]
async fn test_panic_is_returned_and_worker_survives() {
    let worker = worker("demo").await;

    let err = worker.call(&["panic"], vec![]).await.unwrap_err();
    let remote = err.remote().unwrap();
    assert!(remote.message.contains("worker panicked on purpose"));
    assert_eq!(remote.field("panic"), Some(&json!(true)));

    assert_eq!(
        worker.call(&["add"], vec![json!(1), json!(1)]).await.unwrap(),
        Some(json!(2))
    );
    worker.terminate();
}

#[tokio::test]
async fn test_receiver_bound_methods() {
    let worker = worker("demo").await;
    assert_eq!(worker.call(&["getY"], vec![]).await.unwrap(), Some(json!("abc")));

    for expected in 1..=3 {
        assert_eq!(
            worker.call(&["counter", "increment"], vec![]).await.unwrap(),
            Some(json!(expected))
        );
    }
    assert_eq!(
        worker.call(&["counter", "increment"], vec![json!(5)]).await.unwrap(),
        Some(json!(8))
    );
    assert_eq!(
        worker.call(&["counter", "get"], vec![]).await.unwrap(),
        Some(json!(8))
    );
    worker.terminate();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_never_cross() {
    const CALLS: i64 = 5_000;
    let first = worker("demo").await;
    let second = worker("demo").await;

    let calls = (0..CALLS).flat_map(|i| {
        let a = first.clone();
        let b = second.clone();
        [
            tokio::spawn(async move { (i, 0, a.call(&["add"], vec![json!(i), json!(0)]).await) }),
            tokio::spawn(async move { (i, 1, b.call(&["add"], vec![json!(i), json!(1_000_000)]).await) }),
        ]
    });

    for joined in within(join_all(calls)).await {
        let (i, offset, outcome) = joined.unwrap();
        let expected = if offset == 0 { i } else { i + 1_000_000 };
        assert_eq!(outcome.unwrap(), Some(json!(expected)));
    }

    assert_eq!(first.pending_calls(), 0);
    assert_eq!(second.pending_calls(), 0);
    first.terminate();
    second.terminate();
}

#[tokio::test]
async fn test_later_sync_call_overtakes_deferred_call() {
    let worker = worker("demo").await;

    let slow = worker.stub(&["slow"]).unwrap();
    let pending = tokio::spawn(async move { slow.call(vec![json!(500), json!("slow")]).await });
    common::eventually(|| worker.pending_calls() == 1).await;

    assert_eq!(
        worker.call(&["add"], vec![json!(1), json!(2)]).await.unwrap(),
        Some(json!(3))
    );
    assert!(!pending.is_finished());
    assert_eq!(within(pending).await.unwrap().unwrap(), Some(json!("slow")));
    worker.terminate();
}

#[tokio::test]
async fn test_deferred_load_mode_announces_same_tree() {
    let eager = worker("demo").await;
    let deferred = spawn("demo", options().load_mode(LoadMode::Deferred))
        .await
        .unwrap();

    let paths = |proxy: &Proxy| -> Vec<String> {
        proxy.stubs().iter().map(|stub| stub.path().join(".")).collect()
    };
    assert_eq!(paths(eager.proxy()), paths(deferred.proxy()));
    assert_eq!(
        deferred.call(&["delayed"], vec![json!(21)]).await.unwrap(),
        Some(json!(42))
    );

    eager.terminate();
    deferred.terminate();
}

#[tokio::test]
async fn test_deferred_calls_settle_independently() {
    let worker = worker("demo").await;
    let calls = [600u64, 10, 400].map(|ms| {
        let worker = worker.clone();
        async move {
            worker
                .call(&["slow"], vec![json!(ms), json!(ms)])
                .await
                .map(|value| (ms, value))
        }
    });

    let started = std::time::Instant::now();
    for outcome in within(join_all(calls)).await {
        let (ms, value) = outcome.unwrap();
        assert_eq!(value, Some(json!(ms)));
    }
    // Run side by side, not one after another.
    assert!(started.elapsed() < Duration::from_millis(900));
    worker.terminate();
}
