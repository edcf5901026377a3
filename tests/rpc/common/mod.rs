#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use runworker::supervisor::{spawn, SpawnOptions, WorkerHandle};

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Options that start the demo host binary as the worker.
pub fn options() -> SpawnOptions {
    SpawnOptions::new().program(env!("CARGO_BIN_EXE_runworker"))
}

pub async fn worker(module: &str) -> WorkerHandle {
    spawn(module, options()).await.expect("worker should start")
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(PATIENCE, future)
        .await
        .expect("timed out")
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
