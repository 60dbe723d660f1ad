//! Per-process instance counts (`-c web=2,worker=1`).

use crate::{ConfigError, Result};
use std::collections::HashMap;

/// Reserved name that sets the default count for every process.
pub const ALL: &str = "all";

/// Instance counts keyed by process name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Concurrency {
    counts: HashMap<String, usize>,
}

impl Concurrency {
    /// Parse a `name=count` list separated by commas.
    ///
    /// Empty or all-whitespace input yields an empty mapping. Whitespace around
    /// names and counts is ignored.
    pub fn parse(value: &str) -> Result<Self> {
        let mut counts = HashMap::new();
        if value.trim().is_empty() {
            return Ok(Self { counts });
        }

        for part in value.split(',') {
            let (name, count) = part
                .split_once('=')
                .ok_or_else(|| ConfigError::Concurrency(format!("missing '=' in {:?}", part)))?;

            let (name, count) = (name.trim(), count.trim());
            if name.is_empty() || count.is_empty() {
                return Err(ConfigError::Concurrency(format!(
                    "empty name or count in {:?}",
                    part
                )));
            }

            let count: u16 = count.parse().map_err(|e| {
                ConfigError::Concurrency(format!("bad count {:?} for {}: {}", count, name, e))
            })?;
            counts.insert(name.to_string(), count as usize);
        }

        Ok(Self { counts })
    }

    /// Explicit count for a name, if one was given.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.counts.get(name).copied()
    }

    /// Number of instances to run: explicit count, else `all`, else 1.
    pub fn count_for(&self, name: &str) -> usize {
        self.get(name).or_else(|| self.get(ALL)).unwrap_or(1)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
