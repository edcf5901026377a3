//! Configuration module for runworker.
//!
//! Handles the settings file and environment variable expansion.

mod settings;

pub use settings::{expand_env_vars, LoggingSettings, Settings, SettingsError, WorkerSettings};
