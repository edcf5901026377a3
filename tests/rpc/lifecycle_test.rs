mod common;

use std::time::Duration;

use runworker::supervisor::{spawn, Cluster, ClusterEvent, Lifecycle, LoadMode, RpcError};
use serde_json::json;
use tokio::sync::broadcast;

use common::{eventually, options, within, worker};

async fn next_exit(feed: &mut broadcast::Receiver<Lifecycle>) -> (Option<u32>, runworker::supervisor::ExitInfo) {
    loop {
        if let Lifecycle::Exited { pid, info } = within(feed.recv()).await.unwrap() {
            return (pid, info);
        }
    }
}

#[tokio::test]
async fn test_exit_rejects_every_pending_call() {
    const PENDING: usize = 10;
    let worker = worker("demo").await;
    let forever = worker.stub(&["forever"]).unwrap();

    let calls: Vec<_> = (0..PENDING)
        .map(|_| {
            let stub = forever.clone();
            tokio::spawn(async move { stub.call(vec![]).await })
        })
        .collect();
    eventually(|| worker.pending_calls() == PENDING).await;

    let exit_call = worker.call(&["exit"], vec![json!(0)]).await;
    assert!(matches!(exit_call, Err(RpcError::WorkerExited { .. })));

    for call in calls {
        match within(call).await.unwrap() {
            Err(RpcError::WorkerExited { module_path, code }) => {
                assert_eq!(module_path, "demo");
                assert_eq!(code, Some(0));
            }
            other => panic!("Expected WorkerExited, got {:?}", other),
        }
    }

    assert!(!worker.is_alive());
    assert_eq!(worker.pending_calls(), 0);
}

#[tokio::test]
async fn test_exit_leaves_other_workers_calls_pending() {
    let doomed = worker("demo").await;
    let survivor = worker("demo").await;

    let forever = doomed.stub(&["forever"]).unwrap();
    let doomed_calls: Vec<_> = (0..3)
        .map(|_| {
            let stub = forever.clone();
            tokio::spawn(async move { stub.call(vec![]).await })
        })
        .collect();

    let forever = survivor.stub(&["forever"]).unwrap();
    let survivor_forever = tokio::spawn(async move { forever.call(vec![]).await });
    let slow = survivor.stub(&["slow"]).unwrap();
    let survivor_slow =
        tokio::spawn(async move { slow.call(vec![json!(800), json!("mine")]).await });
    eventually(|| doomed.pending_calls() == 3 && survivor.pending_calls() == 2).await;

    let _ = doomed.call(&["exit"], vec![json!(0)]).await;
    for call in doomed_calls {
        assert!(matches!(
            within(call).await.unwrap(),
            Err(RpcError::WorkerExited { .. })
        ));
    }

    assert!(survivor.is_alive());
    assert_eq!(survivor.pending_calls(), 2);
    assert_eq!(within(survivor_slow).await.unwrap().unwrap(), Some(json!("mine")));
    assert_eq!(survivor.pending_calls(), 1);
    assert!(!survivor_forever.is_finished());

    survivor.terminate();
    assert!(matches!(
        within(survivor_forever).await.unwrap(),
        Err(RpcError::WorkerExited { .. })
    ));
}

#[tokio::test]
async fn test_dead_handle_fails_fast() {
    let worker = worker("demo").await;
    let add = worker.stub(&["add"]).unwrap();

    let _ = worker.call(&["exit"], vec![json!(7)]).await;
    let info = within(worker.wait_for_exit()).await;
    assert_eq!(info.code, Some(7));
    assert!(!info.requested);

    let started = std::time::Instant::now();
    assert!(matches!(
        add.call(vec![json!(1), json!(2)]).await,
        Err(RpcError::WorkerDead { .. })
    ));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(matches!(
        worker.emit_to_worker("custom", json!(1)),
        Err(RpcError::WorkerDead { .. })
    ));
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let worker = worker("demo").await;
    let mut feed = worker.lifecycle();

    worker.terminate();
    worker.terminate();
    let info = within(worker.wait_for_exit()).await;
    assert!(info.requested);
    assert!(!worker.is_alive());

    let (pid, exited) = next_exit(&mut feed).await;
    assert_eq!(pid, worker.pid());
    assert!(exited.requested);

    worker.terminate();
    assert!(matches!(
        worker.call(&["add"], vec![json!(1), json!(2)]).await,
        Err(RpcError::WorkerDead { .. })
    ));
}

#[tokio::test]
async fn test_dropping_last_handle_stops_worker() {
    let worker = worker("demo").await;
    let mut feed = worker.lifecycle();
    drop(worker);

    let (_, info) = next_exit(&mut feed).await;
    assert!(info.requested);
}

#[tokio::test]
async fn test_respawn_replaces_crashed_worker() {
    let worker = spawn("demo", options().respawn(true)).await.unwrap();
    let mut feed = worker.lifecycle();
    assert_eq!(worker.respawns(), 0);

    let _ = worker.call(&["exit"], vec![json!(1)]).await;

    let (pid, info) = next_exit(&mut feed).await;
    assert_eq!(pid, worker.pid());
    assert_eq!(info.code, Some(1));
    assert!(!info.requested);

    let replacement = match within(feed.recv()).await.unwrap() {
        Lifecycle::Respawned(handle) => handle,
        other => panic!("Expected Respawned, got {:?}", other),
    };
    assert_eq!(replacement.respawns(), 1);
    assert_ne!(replacement.pid(), worker.pid());
    assert_eq!(replacement.module_path(), "demo");

    // The old handle is left as it was: dead.
    assert!(!worker.is_alive());
    assert!(matches!(
        worker.call(&["add"], vec![json!(1), json!(1)]).await,
        Err(RpcError::WorkerDead { .. })
    ));
    assert_eq!(
        replacement.call(&["add"], vec![json!(20), json!(22)]).await.unwrap(),
        Some(json!(42))
    );

    // A requested exit is not respawned.
    replacement.terminate();
    let (_, info) = next_exit(&mut feed).await;
    assert!(info.requested);
    assert!(
        tokio::time::timeout(Duration::from_millis(300), feed.recv())
            .await
            .is_err(),
        "no further notifications expected"
    );
}

#[tokio::test]
async fn test_unclaimed_replacement_is_stopped() {
    let worker = spawn("demo", options().respawn(true)).await.unwrap();
    let original = worker.pid();

    let _ = worker.call(&["exit"], vec![json!(1)]).await;
    within(worker.wait_for_exit()).await;
    // Subscribed while the replacement is still starting up.
    let mut feed = worker.lifecycle();

    let replacement = match within(feed.recv()).await.unwrap() {
        Lifecycle::Respawned(handle) => handle,
        other => panic!("Expected Respawned, got {:?}", other),
    };
    let replacement_pid = replacement.pid();
    assert_ne!(replacement_pid, original);
    drop(replacement);

    let (pid, info) = next_exit(&mut feed).await;
    assert_eq!(pid, replacement_pid);
    assert!(info.requested);
}

#[tokio::test]
async fn test_listeners_follow_respawn() {
    let worker = spawn("demo", options().respawn(true)).await.unwrap();
    let mut feed = worker.lifecycle();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    worker.on("helloworld", move |payload| {
        let _ = tx.send(payload.clone());
    });

    let _ = worker.call(&["exit"], vec![json!(2)]).await;
    let replacement = loop {
        if let Lifecycle::Respawned(handle) = within(feed.recv()).await.unwrap() {
            break handle;
        }
    };

    replacement.call(&["action1"], vec![]).await.unwrap();
    assert_eq!(within(rx.recv()).await, Some(json!("hi")));
    replacement.terminate();
}

#[tokio::test]
async fn test_load_failure_rejects_spawn() {
    match spawn("broken", options()).await {
        Err(RpcError::LoadFailed { module_path, error }) => {
            assert_eq!(module_path, "broken");
            assert_eq!(error.message, "broken module refuses to load");
            assert_eq!(error.code(), Some("E_BROKEN"));
        }
        other => panic!("Expected LoadFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_module_rejects_spawn_in_both_modes() {
    for mode in [LoadMode::Eager, LoadMode::Deferred] {
        let err = spawn("ghost", options().load_mode(mode)).await.unwrap_err();
        let remote = err.remote().expect("worker error");
        assert_eq!(remote.message, "Cannot find module 'ghost'");
        assert_eq!(remote.code(), Some("MODULE_NOT_FOUND"));
    }
}

#[tokio::test]
async fn test_missing_program_rejects_spawn() {
    let err = spawn("demo", options().program("/nonexistent/runworker-host"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::SpawnFailed(_)));
}

#[tokio::test]
async fn test_worker_without_protocol_rejects_spawn() {
    // `true` exits at once without announcing anything.
    let err = spawn("demo", options().program("true")).await.unwrap_err();
    assert!(matches!(err, RpcError::WorkerExited { code: Some(0), .. }));
}

#[tokio::test]
async fn test_cluster_tracks_workers() {
    let cluster = Cluster::new(options());
    let mut events = cluster.subscribe();

    let first = cluster.spawn("demo").await.unwrap();
    let second = cluster.spawn("chatty").await.unwrap();
    assert_eq!(cluster.len(), 2);

    for _ in 0..2 {
        assert!(matches!(
            within(events.recv()).await.unwrap(),
            ClusterEvent::Online { .. }
        ));
    }

    let _ = first.call(&["exit"], vec![json!(4)]).await;
    match within(events.recv()).await.unwrap() {
        ClusterEvent::Exit { module_path, pid, info } => {
            assert_eq!(module_path, "demo");
            assert_eq!(pid, first.pid());
            assert_eq!(info.code, Some(4));
        }
        other => panic!("Expected Exit, got {:?}", other),
    }
    eventually(|| cluster.len() == 1).await;
    assert_eq!(cluster.workers()[0].pid(), second.pid());

    cluster.terminate_all();
    assert!(cluster.is_empty());
    within(second.wait_for_exit()).await;
}

#[tokio::test]
async fn test_dropping_cluster_stops_its_workers() {
    let cluster = Cluster::new(options());
    let handle = cluster.spawn("demo").await.unwrap();
    let mut feed = handle.lifecycle();
    let pid = handle.pid();

    drop(handle);
    drop(cluster);

    let (exited, info) = next_exit(&mut feed).await;
    assert_eq!(exited, pid);
    assert!(info.requested);
}
