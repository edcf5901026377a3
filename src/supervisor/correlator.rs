//! Pending-call table of one worker handle.
//!
//! The table and the handle's liveness flag share one lock. A call is
//! registered only while the handle is alive, and the death path flips the
//! flag and drains the table in the same critical section, so a dead
//! handle's table is always empty.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use super::error::{RpcError, RpcResult};
use crate::ids::IdGenerator;

/// What a pending call resolves to.
pub type Outcome = RpcResult<Option<Value>>;

struct Table {
    alive: bool,
    calls: HashMap<String, oneshot::Sender<Outcome>>,
}

/// Issues correlation ids and settles each pending call exactly once.
pub struct Correlator {
    module_path: String,
    ids: IdGenerator,
    table: Mutex<Table>,
}

impl Correlator {
    pub fn new(module_path: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            ids: IdGenerator::new(),
            table: Mutex::new(Table {
                alive: true,
                calls: HashMap::new(),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending call.
    ///
    /// Fails with [`RpcError::WorkerDead`] once the handle has died.
    pub fn register(&self) -> RpcResult<(String, oneshot::Receiver<Outcome>)> {
        let mut table = self.table();
        if !table.alive {
            return Err(RpcError::WorkerDead {
                module_path: self.module_path.clone(),
            });
        }

        let mut id = self.ids.next_id()?;
        while table.calls.contains_key(&id) {
            id = self.ids.next_id()?;
        }

        let (tx, rx) = oneshot::channel();
        table.calls.insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Drop a registration whose request never left the coordinator.
    pub fn abandon(&self, id: &str) {
        self.table().calls.remove(id);
    }

    /// Settle the call `id` with `outcome`.
    ///
    /// An unknown or already settled id is a protocol violation.
    pub fn settle(&self, id: &str, outcome: Outcome) -> RpcResult<()> {
        let sender = self
            .table()
            .calls
            .remove(id)
            .ok_or_else(|| RpcError::ProtocolViolation { id: id.to_string() })?;

        // The caller may have stopped waiting; the entry is gone either way.
        let _ = sender.send(outcome);
        Ok(())
    }

    /// Mark the handle dead and reject every pending call.
    ///
    /// Returns the number of calls rejected. Later calls return 0.
    pub fn fail_all<F>(&self, reason: F) -> usize
    where
        F: Fn() -> RpcError,
    {
        let drained: Vec<_> = {
            let mut table = self.table();
            table.alive = false;
            table.calls.drain().collect()
        };

        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(reason()));
        }
        count
    }

    pub fn is_alive(&self) -> bool {
        self.table().alive
    }

    /// Number of calls awaiting a response.
    pub fn pending(&self) -> usize {
        self.table().calls.len()
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("module_path", &self.module_path)
            .field("alive", &self.is_alive())
            .field("pending", &self.pending())
            .finish()
    }
}
