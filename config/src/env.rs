//! Environment file handling
//!
//! Environment files hold `KEY=value` or `export KEY=value` lines. They are
//! merged in order into a single [`Env`] which every process instance clones
//! before adding its own variables (such as `PORT`).

use crate::{ConfigError, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment file used when none is given explicitly.
pub const DEFAULT_ENV_FILE: &str = ".env";

const ENV_LINE: &str = r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_.]*)\s*=\s*(.*)$";

/// A mapping of environment variable names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: IndexMap<String, String>,
}

impl Env {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the contents of an environment file.
    pub fn parse(content: &str) -> Result<Self> {
        Self::parse_named(content, "<inline>")
    }

    /// Read and parse an environment file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse_named(&content, &path.display().to_string())
    }

    fn parse_named(content: &str, source: &str) -> Result<Self> {
        let line_re = Regex::new(ENV_LINE)?;
        let mut env = Env::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let caps = line_re
                .captures(line)
                .ok_or_else(|| ConfigError::EnvFile {
                    path: source.to_string(),
                    line: lineno + 1,
                    reason: format!("expected KEY=value, got {:?}", line),
                })?;

            let value = parse_value(&caps[2]).map_err(|reason| ConfigError::EnvFile {
                path: source.to_string(),
                line: lineno + 1,
                reason,
            })?;
            env.insert(&caps[1], value);
        }

        Ok(env)
    }

    /// Get a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set a variable, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Merge another environment into this one (other takes precedence).
    pub fn merge(&mut self, other: &Env) {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Iterate over all variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the environment is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Env {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Env::new();
        for (key, value) in iter {
            env.insert(key, value);
        }
        env
    }
}

/// Load and merge environment files in order; later files win.
///
/// With no files given, `.env` in the current directory is used when present.
pub fn load_env_files(paths: &[PathBuf]) -> Result<Env> {
    if paths.is_empty() {
        let default = Path::new(DEFAULT_ENV_FILE);
        if default.exists() {
            debug!(path = %default.display(), "Loading default env file");
            return Env::read(default);
        }
        return Ok(Env::new());
    }

    let mut env = Env::new();
    for path in paths {
        debug!(path = %path.display(), "Loading env file");
        env.merge(&Env::read(path)?);
    }
    Ok(env)
}

fn parse_value(raw: &str) -> std::result::Result<String, String> {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix('\'') {
        return rest
            .find('\'')
            .map(|end| rest[..end].to_string())
            .ok_or_else(|| "unterminated single quote".to_string());
    }

    if let Some(rest) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return Ok(value),
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => break,
                },
                c => value.push(c),
            }
        }
        return Err("unterminated double quote".to_string());
    }

    let value = match raw.find(" #") {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    Ok(value.trim_end().to_string())
}
