//! Error types for mercurio
//!
//! One error enum covers the transfer pipeline and the key management
//! workflows. Resolution problems met while enumerating input paths are
//! not errors: they are logged and skipped by the enumerator.

use std::path::PathBuf;
use thiserror::Error;

#[cfg(unix)]
const EEXIST: i32 = libc::EEXIST;
#[cfg(not(unix))]
const EEXIST: i32 = 17;

#[cfg(unix)]
const EINVAL: i32 = libc::EINVAL;
#[cfg(not(unix))]
const EINVAL: i32 = 22;

/// Main error type for mercurio operations
#[derive(Error, Debug)]
pub enum MercurioError {
    /// The external transfer tool exited with a non-zero status
    #[error("{message} (exit status {status}): {command}")]
    Transfer {
        /// Exit status reported by the tool
        status: i32,
        /// Human-readable description of the status
        message: String,
        /// Exact command line that was attempted
        command: String,
    },

    /// The external transfer tool could not be started
    #[error("failed to run '{command}': {source}")]
    Spawn {
        /// Command line that could not be spawned
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A public key or authorized_keys entry could not be parsed
    #[error("{0}")]
    KeyFormat(String),

    /// The destination template needs an owner and none could be found
    #[error("unable to guess the owner of the key, which is required to compute the destination directory '{template}'")]
    OwnerUnknown {
        /// Destination directory template
        template: String,
    },

    /// The key is already present in authorized_keys
    #[error("the key provided is already being used: {key}")]
    AlreadyAuthorized {
        /// Key material found in the file
        key: String,
    },

    /// Worker thread error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl MercurioError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a transfer error, describing `status` with the tool's exit-code table
    pub fn transfer(status: i32, command: impl Into<String>) -> Self {
        Self::Transfer {
            status,
            message: crate::core::describe_exit_status(status),
            command: command.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Check if this error comes from running the transfer tool
    pub fn is_transfer_failure(&self) -> bool {
        matches!(self, Self::Transfer { .. } | Self::Spawn { .. })
    }

    /// Get the command line associated with this error, if any
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Transfer { command, .. } | Self::Spawn { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Process exit status to report for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Transfer { status, .. } if *status > 0 && *status < 256 => *status,
            Self::OwnerUnknown { .. } => EINVAL,
            Self::AlreadyAuthorized { .. } => EEXIST,
            _ => 1,
        }
    }
}

/// Result type alias for mercurio operations
pub type Result<T> = std::result::Result<T, MercurioError>;

impl From<serde_json::Error> for MercurioError {
    fn from(err: serde_json::Error) -> Self {
        MercurioError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| MercurioError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_keeps_status_and_command() {
        let err = MercurioError::transfer(23, "rsync -c --partial /a host:b");
        match &err {
            MercurioError::Transfer { status, message, command } => {
                assert_eq!(*status, 23);
                assert_eq!(message, "partial transfer due to error");
                assert_eq!(command, "rsync -c --partial /a host:b");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.exit_code(), 23);
        assert!(err.is_transfer_failure());
        assert_eq!(err.command(), Some("rsync -c --partial /a host:b"));
    }

    #[test]
    fn test_exit_codes() {
        let owner = MercurioError::OwnerUnknown { template: "~/mercurio/$owner".into() };
        assert_eq!(owner.exit_code(), EINVAL);

        let dup = MercurioError::AlreadyAuthorized { key: "AAAA".into() };
        assert_eq!(dup.exit_code(), EEXIST);

        let io = MercurioError::io("/x", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(io.exit_code(), 1);
        assert!(io.command().is_none());
    }

    #[test]
    fn test_io_result_ext() {
        let res: std::io::Result<()> = Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        let err = res.with_path("/etc/shadow").unwrap_err();
        assert!(err.to_string().contains("/etc/shadow"));
    }
}
