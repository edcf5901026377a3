//! A set of supervised workers with one shared notification feed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;
use tracing::debug;

use super::error::RpcResult;
use super::handle::{spawn, ExitInfo, Lifecycle, WorkerHandle};
use super::options::SpawnOptions;

const CLUSTER_CAPACITY: usize = 256;

/// Notification about any worker of a [`Cluster`].
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// A worker became ready, either freshly spawned or as a replacement.
    Online {
        module_path: String,
        pid: Option<u32>,
    },
    /// A worker process ended.
    Exit {
        module_path: String,
        pid: Option<u32>,
        info: ExitInfo,
    },
}

/// Registry of running workers.
///
/// Respawned replacements take their predecessor's place; workers that are
/// gone for good are dropped from the registry. Dropping the last clone of
/// the cluster drops its handles, which stops workers nobody else holds.
#[derive(Clone)]
pub struct Cluster {
    options: SpawnOptions,
    workers: Arc<Mutex<Vec<WorkerHandle>>>,
    events: broadcast::Sender<ClusterEvent>,
}

impl Cluster {
    /// Every worker of the cluster is spawned with `options`.
    pub fn new(options: SpawnOptions) -> Self {
        let (events, _) = broadcast::channel(CLUSTER_CAPACITY);
        Self {
            options,
            workers: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Vec<WorkerHandle>> {
        lock(&self.workers)
    }

    /// Spawn a worker for `module_path` and add it to the cluster.
    pub async fn spawn(&self, module_path: impl Into<String>) -> RpcResult<WorkerHandle> {
        let handle = spawn(module_path, self.options.clone()).await?;
        let lifecycle = handle.lifecycle();

        self.registry().push(handle.clone());
        let _ = self.events.send(ClusterEvent::Online {
            module_path: handle.module_path().to_string(),
            pid: handle.pid(),
        });

        if handle.is_alive() {
            tokio::spawn(watch_lineage(
                handle.module_path().to_string(),
                lifecycle,
                Arc::downgrade(&self.workers),
                self.events.clone(),
            ));
        } else {
            // Exited before the feed was subscribed.
            let info = handle.wait_for_exit().await;
            forget(&self.workers, handle.pid());
            let _ = self.events.send(ClusterEvent::Exit {
                module_path: handle.module_path().to_string(),
                pid: handle.pid(),
                info,
            });
        }
        Ok(handle)
    }

    /// Live workers, in spawn order.
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.registry()
            .iter()
            .filter(|handle| handle.is_alive())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Terminate every worker and forget them.
    pub fn terminate_all(&self) {
        let workers: Vec<_> = self.registry().drain(..).collect();
        for handle in &workers {
            handle.terminate();
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("workers", &self.registry().len())
            .finish()
    }
}

fn lock(workers: &Mutex<Vec<WorkerHandle>>) -> MutexGuard<'_, Vec<WorkerHandle>> {
    workers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forget(workers: &Mutex<Vec<WorkerHandle>>, pid: Option<u32>) {
    lock(workers).retain(|handle| handle.pid() != pid || handle.is_alive());
}

/// Follow one worker and its replacements until the lineage ends.
async fn watch_lineage(
    module_path: String,
    mut lifecycle: broadcast::Receiver<Lifecycle>,
    workers: Weak<Mutex<Vec<WorkerHandle>>>,
    events: broadcast::Sender<ClusterEvent>,
) {
    loop {
        let notification = match lifecycle.recv().await {
            Ok(notification) => notification,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(module = %module_path, missed, "cluster feed lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(registry) = workers.upgrade() else {
            debug!(module = %module_path, "cluster dropped, no longer watching");
            break;
        };

        match notification {
            Lifecycle::Exited { pid, info } => {
                forget(&registry, pid);
                let _ = events.send(ClusterEvent::Exit {
                    module_path: module_path.clone(),
                    pid,
                    info,
                });
            }
            Lifecycle::Respawned(handle) => {
                let _ = events.send(ClusterEvent::Online {
                    module_path: module_path.clone(),
                    pid: handle.pid(),
                });
                lock(&registry).push(handle);
            }
            Lifecycle::ProtocolViolation { .. } | Lifecycle::RespawnFailed(_) => {}
        }
    }
}
