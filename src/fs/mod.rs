//! File system module
//!
//! Turns the requested input paths into transfer units, walking
//! directory trees lazily.

mod scanner;

pub use scanner::*;
