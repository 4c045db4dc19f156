//! Transfer pipeline
//!
//! Runs the external transfer tool once per unit, from a fixed-size pool
//! of workers sharing one path enumerator.

mod command;
mod scheduler;
mod worker;

pub use command::*;
pub use scheduler::*;
pub use worker::{transfer_unit, PoolStats, SharedEnumerator, WorkerReport};
