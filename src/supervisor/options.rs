//! How a worker process is started.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::{RpcError, RpcResult};
use crate::config::{expand_env_vars, Settings};

/// When the worker learns which module to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Module path travels in the child's environment; the worker loads it
    /// right away.
    #[default]
    Eager,
    /// The worker announces `online` and waits for an `init` envelope.
    Deferred,
}

/// Options for [`spawn`](super::spawn).
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Worker executable. Defaults to the current executable.
    pub program: Option<PathBuf>,
    /// Extra command-line arguments for the worker.
    pub args: Vec<String>,
    /// Extra environment variables for the worker.
    pub env: Vec<(String, String)>,
    pub load_mode: LoadMode,
    /// Replace the worker when it exits without being asked to.
    ///
    /// The replacement handle is only delivered as `Lifecycle::Respawned`;
    /// without a `lifecycle()` subscriber it is dropped, which stops it.
    pub respawn: bool,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from the `[worker]` section of the settings.
    ///
    /// `${VAR}` references in the program path are expanded here.
    pub fn from_settings(settings: &Settings) -> Result<Self, crate::config::SettingsError> {
        let program = settings
            .worker
            .program
            .as_deref()
            .map(expand_env_vars)
            .transpose()?
            .map(PathBuf::from);

        Ok(Self {
            program,
            args: settings.worker.args.clone(),
            env: Vec::new(),
            load_mode: settings.worker.load_mode,
            respawn: settings.worker.respawn,
        })
    }

    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn load_mode(mut self, load_mode: LoadMode) -> Self {
        self.load_mode = load_mode;
        self
    }

    pub fn respawn(mut self, respawn: bool) -> Self {
        self.respawn = respawn;
        self
    }

    /// The executable to start.
    pub(crate) fn resolve_program(&self) -> RpcResult<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => env::current_exe().map_err(RpcError::SpawnFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let options = SpawnOptions::new()
            .program("/bin/worker")
            .arg("--quiet")
            .env("RUST_BACKTRACE", "1")
            .load_mode(LoadMode::Deferred)
            .respawn(true);

        assert_eq!(options.resolve_program().unwrap(), PathBuf::from("/bin/worker"));
        assert_eq!(options.args, vec!["--quiet"]);
        assert_eq!(options.env, vec![("RUST_BACKTRACE".to_string(), "1".to_string())]);
        assert_eq!(options.load_mode, LoadMode::Deferred);
        assert!(options.respawn);
    }

    #[test]
    fn test_defaults_to_current_exe() {
        let options = SpawnOptions::default();
        assert_eq!(options.load_mode, LoadMode::Eager);
        assert!(!options.respawn);
        assert_eq!(options.resolve_program().unwrap(), env::current_exe().unwrap());
    }

    #[test]
    fn test_from_settings() {
        env::set_var("RUNWORKER_TEST_BIN_DIR", "/opt/workers");
        let settings: Settings = toml::from_str(
            r#"
[worker]
program = "${RUNWORKER_TEST_BIN_DIR}/host"
args = ["-v"]
load_mode = "deferred"
respawn = true
"#,
        )
        .unwrap();

        let options = SpawnOptions::from_settings(&settings).unwrap();
        assert_eq!(options.program, Some(PathBuf::from("/opt/workers/host")));
        assert_eq!(options.args, vec!["-v"]);
        assert_eq!(options.load_mode, LoadMode::Deferred);
        assert!(options.respawn);
        env::remove_var("RUNWORKER_TEST_BIN_DIR");
    }

    #[test]
    fn test_from_settings_missing_var() {
        let mut settings = Settings::default();
        settings.worker.program = Some("${RUNWORKER_TEST_UNSET_12345}/host".into());
        assert!(SpawnOptions::from_settings(&settings).is_err());
    }
}
