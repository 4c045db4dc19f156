//! SSH key management
//!
//! Grants and withdraws rrsync access to the destination host through
//! the authorized_keys file.

mod authorized;
mod publickey;

pub use authorized::*;
pub use publickey::*;
