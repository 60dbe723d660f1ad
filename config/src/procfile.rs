//! Procfile parsing
//!
//! A Procfile declares one process type per line as `name: command`. Blank
//! lines and `#` comments are ignored.

use crate::concurrency::Concurrency;
use crate::{ConfigError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Procfile used when none is given explicitly.
pub const DEFAULT_PROCFILE: &str = "Procfile";

const ENTRY_LINE: &str = r"^([A-Za-z0-9_-]+):\s*(.+)$";

/// A single declared process type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcfileEntry {
    /// Process type name
    pub name: String,
    /// Shell command line
    pub command: String,
    /// Position in the Procfile, starting at zero
    pub index: usize,
}

impl ProcfileEntry {
    /// Display name of one instance of this entry.
    ///
    /// Instances are numbered from one, and only carry a suffix when more than
    /// one instance of the entry is running.
    pub fn instance_name(&self, instance: usize, instances: usize) -> String {
        if instances > 1 {
            format!("{}.{}", self.name, instance + 1)
        } else {
            self.name.clone()
        }
    }
}

/// An ordered list of process declarations.
#[derive(Debug, Clone, Default)]
pub struct Procfile {
    entries: Vec<ProcfileEntry>,
}

impl Procfile {
    /// Parse Procfile contents.
    pub fn parse(content: &str) -> Result<Self> {
        let entry_re = Regex::new(ENTRY_LINE)?;
        let mut entries: Vec<ProcfileEntry> = Vec::new();
        let mut seen = HashSet::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let caps = entry_re.captures(line).ok_or_else(|| ConfigError::Procfile {
                line: lineno + 1,
                reason: format!("expected 'name: command', got {:?}", line),
            })?;

            let name = caps[1].to_string();
            if !seen.insert(name.clone()) {
                return Err(ConfigError::Procfile {
                    line: lineno + 1,
                    reason: format!("duplicate process name {:?}", name),
                });
            }

            entries.push(ProcfileEntry {
                name,
                command: caps[2].trim().to_string(),
                index: entries.len(),
            });
        }

        Ok(Self { entries })
    }

    /// Read and parse a Procfile from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[ProcfileEntry] {
        &self.entries
    }

    /// Whether a process with the given name is declared.
    pub fn has_process(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Names of every declared process.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Width of the longest instance display name under the given concurrency.
    pub fn longest_process_name(&self, concurrency: &Concurrency) -> usize {
        self.entries
            .iter()
            .map(|e| {
                let count = concurrency.count_for(&e.name);
                if count > 1 {
                    e.instance_name(count - 1, count).len()
                } else {
                    e.name.len()
                }
            })
            .max()
            .unwrap_or(0)
    }
}
