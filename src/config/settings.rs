//! TOML-based configuration for runworker.
//!
//! Supports a config file (runworker.toml) with environment variable
//! expansion in the worker program path.
//!
//! Example configuration:
//! ```toml
//! [worker]
//! program = "${HOME}/bin/my-host"
//! args = ["--quiet"]
//! load_mode = "deferred"
//! respawn = true
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogFormat;
use crate::supervisor::LoadMode;

/// Variable naming an explicit config file.
pub const CONFIG_ENV: &str = "RUNWORKER_CONFIG";

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// How workers are started.
    pub worker: WorkerSettings,

    /// Log level and format.
    pub logging: LoggingSettings,
}

/// Worker configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker executable (supports ${ENV_VAR} expansion). The current
    /// executable when unset.
    pub program: Option<String>,

    /// Extra arguments for the worker.
    pub args: Vec<String>,

    /// `eager` or `deferred`.
    pub load_mode: LoadMode,

    /// Replace workers that exit on their own.
    pub respawn: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// error, warn, info, debug or trace.
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `RUNWORKER_CONFIG`
    /// 2. `./runworker.toml`
    /// 3. `~/.config/runworker/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("runworker.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("runworker").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax. A lone `$` is kept.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find('$') {
        result.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => (braced, braced.len() + 1),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if name.is_empty() && consumed == 0 {
            result.push('$');
        } else {
            let value = env::var(name).map_err(|_| SettingsError::MissingEnvVar(name.to_string()))?;
            result.push_str(&value);
        }
        rest = &after[consumed..];
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_env_vars_braces() {
        env::set_var("RUNWORKER_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${RUNWORKER_TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            expand_env_vars("prefix_${RUNWORKER_TEST_VAR}_suffix").unwrap(),
            "prefix_hello_suffix"
        );
        env::remove_var("RUNWORKER_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        env::set_var("RUNWORKER_TEST_VAR2", "world");
        assert_eq!(expand_env_vars("$RUNWORKER_TEST_VAR2").unwrap(), "world");
        assert_eq!(expand_env_vars("$RUNWORKER_TEST_VAR2!").unwrap(), "world!");
        env::remove_var("RUNWORKER_TEST_VAR2");
    }

    #[test]
    fn test_expand_lone_dollar() {
        assert_eq!(expand_env_vars("cost: $ 5").unwrap(), "cost: $ 5");
        assert_eq!(expand_env_vars("trailing $").unwrap(), "trailing $");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("${NONEXISTENT_VAR_12345}");
        assert!(matches!(result, Err(SettingsError::MissingEnvVar(name)) if name == "NONEXISTENT_VAR_12345"));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[worker]
program = "/usr/local/bin/host"
args = ["-q"]
load_mode = "deferred"
respawn = true

[logging]
level = "debug"
format = "json"
"#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.worker.program.as_deref(), Some("/usr/local/bin/host"));
        assert_eq!(settings.worker.args, vec!["-q"]);
        assert_eq!(settings.worker.load_mode, LoadMode::Deferred);
        assert!(settings.worker.respawn);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.worker.program.is_none());
        assert_eq!(settings.worker.load_mode, LoadMode::Eager);
        assert!(!settings.worker.respawn);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[worker]\nrespawn = true").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert!(settings.worker.respawn);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_from_file_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Settings::from_file(dir.path().join("absent.toml")),
            Err(SettingsError::FileNotFound(_))
        ));

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[worker\nrespawn = ").unwrap();
        assert!(matches!(
            Settings::from_file(&broken),
            Err(SettingsError::ParseError(_))
        ));

        let wrong_mode = dir.path().join("mode.toml");
        fs::write(&wrong_mode, "[worker]\nload_mode = \"lazy\"").unwrap();
        assert!(Settings::from_file(&wrong_mode).is_err());
    }
}
