//! Configuration module for mercurio
//!
//! Provides the CLI arguments and the runtime settings of the
//! transfer pipeline.

mod settings;

pub use settings::*;
