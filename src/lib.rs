//! # mercurio - parallel file sending over rsync
//!
//! mercurio sends files and directory trees to a local or remote
//! destination. Each file is transferred by its own `rsync -c --partial`
//! process, and a fixed pool of workers keeps several transfers running at
//! once.
//!
//! ## Features
//!
//! - **Lazy enumeration**: directory trees are walked one entry at a time
//!   as workers ask for more work
//! - **Exactly-once transfers**: every file found is handed to one worker
//! - **Fail fast**: the first failed transfer stops the run and is reported
//!   with rsync's exit status and the exact command line
//! - **Key management**: restrict an SSH key to rrsync under one directory,
//!   and revoke it later
//!
//! ## Quick Start
//!
//! ```no_run
//! use mercurio::core::run;
//!
//! let summary = run(&["data/", "results.csv"], "user@server:incoming", None).unwrap();
//! summary.print_summary();
//! ```
//!
//! ## Advanced Usage
//!
//! ```no_run
//! use mercurio::config::PoolConfig;
//! use mercurio::core::WorkerPool;
//! use mercurio::fs::PathEnumerator;
//! use mercurio::progress::ProgressReporter;
//!
//! let config = PoolConfig {
//!     workers: 8,
//!     cancel_on_error: false,
//!     ..Default::default()
//! };
//!
//! let enumerator = PathEnumerator::with_config(["/data/run-42"], config.enumerator.clone());
//! let pool = WorkerPool::new(enumerator, "backup@archive:runs", config)
//!     .with_progress(ProgressReporter::new());
//!
//! let summary = pool.run().unwrap();
//! summary.print_summary();
//! ```
//!
//! ## Key Management
//!
//! ```no_run
//! use mercurio::keys::{AuthorizedKeys, DestinationTemplate, PublicKey};
//!
//! let keys = AuthorizedKeys::new("/home/archive/.ssh/authorized_keys");
//! let key = PublicKey::from_file("alice_ed25519.pub").unwrap();
//! let template = DestinationTemplate::new("~/mercurio/$owner");
//!
//! let authorization = keys.authorize(key, &template, None).unwrap();
//! println!("{}", authorization.entry);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod keys;
pub mod progress;

// Re-export commonly used types
pub use crate::config::PoolConfig;
pub use crate::core::{RunSummary, WorkerPool};
pub use crate::error::{MercurioError, Result};
pub use crate::fs::{PathEnumerator, TransferUnit};
pub use crate::progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use mercurio::prelude::*;
    //! ```

    pub use crate::config::{EnumeratorConfig, PoolConfig, ToolConfig};
    pub use crate::core::{run, send, Launcher, ProcessLauncher, RunSummary, TransferCommand, WorkerPool};
    pub use crate::error::{MercurioError, Result};
    pub use crate::fs::{PathEnumerator, TransferUnit};
    pub use crate::keys::{AuthorizedKeyEntry, AuthorizedKeys, DestinationTemplate, KeySelector, PublicKey};
    pub use crate::progress::ProgressReporter;
}
