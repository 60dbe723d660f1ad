//! Mango configuration
//!
//! This crate reads everything the supervisor needs before it starts a single
//! process:
//!
//! - [`procfile`]: process declarations (`name: command`)
//! - [`env`]: environment files merged into the base environment
//! - [`concurrency`]: instance counts per process (`web=2,worker=1`)
//! - [`loader`]: the `.mango` dotfile with defaults for the `start` command
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mango_config::{Concurrency, Procfile, SettingsLoader};
//!
//! let settings = SettingsLoader::current_dir().load().unwrap();
//! let procfile = Procfile::read(&settings.procfile).unwrap();
//! let concurrency = Concurrency::parse(&settings.concurrency).unwrap();
//!
//! for entry in procfile.entries() {
//!     println!("{} x{}", entry.name, concurrency.count_for(&entry.name));
//! }
//! ```

pub mod concurrency;
pub mod env;
pub mod error;
pub mod loader;
pub mod procfile;

pub use concurrency::Concurrency;
pub use env::{load_env_files, Env};
pub use error::{ConfigError, Result};
pub use loader::{parse_port, Settings, SettingsLoader};
pub use procfile::{Procfile, ProcfileEntry};
