//! Dotfile settings loading
//!
//! A `.mango` file in the working directory changes the defaults of the
//! `start` command. It uses the environment file grammar, so values may be
//! quoted and lines may be commented out.

use crate::env::Env;
use crate::procfile::DEFAULT_PROCFILE;
use crate::{ConfigError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the settings dotfile.
pub const DOTFILE: &str = ".mango";

/// Seconds a process is given between SIGTERM and SIGKILL.
pub const DEFAULT_SHUTDOWN_GRACE_TIME: u64 = 3;

/// Default job label for shipped log lines.
pub const DEFAULT_LOKI_JOB: &str = "mango";

/// Defaults for the `start` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Procfile path
    pub procfile: PathBuf,
    /// Base port; unset means no `PORT` is assigned unless the env has one
    pub port: Option<u16>,
    /// Concurrency specification, unparsed
    pub concurrency: String,
    /// Shutdown grace time in seconds
    pub shutdown_grace_time: u64,
    /// Loki push endpoint
    pub loki_url: Option<String>,
    /// Loki job label
    pub loki_job: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            procfile: PathBuf::from(DEFAULT_PROCFILE),
            port: None,
            concurrency: String::new(),
            shutdown_grace_time: DEFAULT_SHUTDOWN_GRACE_TIME,
            loki_url: None,
            loki_job: DEFAULT_LOKI_JOB.to_string(),
        }
    }
}

impl Settings {
    /// Build settings from parsed dotfile variables over the defaults.
    pub fn from_env(vars: &Env) -> Result<Self> {
        let mut settings = Settings::default();

        for (key, value) in vars.iter() {
            match key {
                "procfile" if !value.is_empty() => settings.procfile = PathBuf::from(value),
                "port" if !value.is_empty() => settings.port = Some(parse_port(value)?),
                "concurrency" => settings.concurrency = value.to_string(),
                "shutdown_grace_time" if !value.is_empty() => {
                    settings.shutdown_grace_time = value.parse().map_err(|_| {
                        ConfigError::Invalid(format!("shutdown_grace_time: {:?}", value))
                    })?;
                }
                "loki.url" if !value.is_empty() => settings.loki_url = Some(value.to_string()),
                "loki.job" if !value.is_empty() => settings.loki_job = value.to_string(),
                _ => debug!(key = key, "Ignoring dotfile setting"),
            }
        }

        Ok(settings)
    }

    /// Grace period between the termination and kill signals.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_time)
    }
}

/// Parse a TCP port number.
pub fn parse_port(value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Port(value.to_string()))
}

/// Loader for the settings dotfile
pub struct SettingsLoader {
    /// Path of the dotfile
    path: PathBuf,
    /// Whether to use default values when the file is missing
    use_defaults: bool,
}

impl SettingsLoader {
    /// Create a loader for the given dotfile.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            use_defaults: true,
        }
    }

    /// Create a loader for `.mango` in the current directory.
    pub fn current_dir() -> Self {
        Self::new(DOTFILE)
    }

    /// Set whether to use defaults for a missing dotfile
    pub fn use_defaults(mut self, use_defaults: bool) -> Self {
        self.use_defaults = use_defaults;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the settings.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            if self.use_defaults {
                debug!(path = %self.path.display(), "No dotfile, using defaults");
                return Ok(Settings::default());
            } else {
                return Err(ConfigError::NotFound(self.path.clone()));
            }
        }

        Settings::from_env(&Env::read(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_defaults() {
        let settings = SettingsLoader::new("/nonexistent/.mango").load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.grace_period(), Duration::from_secs(3));
        assert_eq!(settings.loki_job, "mango");
    }

    #[test]
    fn test_loader_no_defaults() {
        let result = SettingsLoader::new("/nonexistent/.mango")
            .use_defaults(false)
            .load();
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_loader_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mango");
        std::fs::write(
            &path,
            "procfile=Procfile.dev\nport=15000\nconcurrency=foo=2,bar=3,web=3\nshutdown_grace_time=30\nloki.url=http://localhost:3100\nloki.job=ci\n",
        )
        .unwrap();

        let settings = SettingsLoader::new(&path).load().unwrap();
        assert_eq!(settings.procfile, PathBuf::from("Procfile.dev"));
        assert_eq!(settings.port, Some(15000));
        assert_eq!(settings.concurrency, "foo=2,bar=3,web=3");
        assert_eq!(settings.shutdown_grace_time, 30);
        assert_eq!(settings.loki_url.as_deref(), Some("http://localhost:3100"));
        assert_eq!(settings.loki_job, "ci");
    }

    #[test]
    fn test_loader_bad_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mango");
        std::fs::write(&path, "port=mango\n").unwrap();
        assert!(matches!(
            SettingsLoader::new(&path).load(),
            Err(ConfigError::Port(_))
        ));
    }
}
