//! Progress reporting module
//!
//! Shows the send operation while it runs.

mod reporter;

pub use reporter::*;
