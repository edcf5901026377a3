//! Module loading: resolving a module path to a declared export surface.

use std::collections::HashMap;

use async_trait::async_trait;

use super::bridge::Bridge;
use crate::export::Export;
use crate::marshal::PlainError;

/// Loads the module a worker serves.
///
/// A failed load is fatal for the worker: the error is reported to the
/// coordinator and the process exits.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `module_path`. `bridge` lets module code emit and
    /// receive custom events for the rest of the worker's life.
    async fn load(&self, module_path: &str, bridge: &Bridge) -> Result<Export, PlainError>;
}

/// Builds one module's exports.
pub type ModuleFactory = Box<dyn Fn(&Bridge) -> Result<Export, PlainError> + Send + Sync>;

/// Loader backed by a fixed table of named modules compiled into the worker.
#[derive(Default)]
pub struct ModuleTable {
    modules: HashMap<String, ModuleFactory>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `name`.
    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Bridge) -> Result<Export, PlainError> + Send + Sync + 'static,
    {
        self.modules.insert(name.into(), Box::new(factory));
        self
    }

    /// Registered module names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ModuleLoader for ModuleTable {
    async fn load(&self, module_path: &str, bridge: &Bridge) -> Result<Export, PlainError> {
        match self.modules.get(module_path) {
            Some(factory) => factory(bridge),
            None => Err(PlainError::new(format!("Cannot find module '{module_path}'"))
                .with_field("code", "MODULE_NOT_FOUND")),
        }
    }
}

impl std::fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleTable")
            .field("modules", &self.names())
            .finish()
    }
}
