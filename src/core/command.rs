//! External transfer tool invocation
//!
//! Every unit is sent by one rsync process. This module builds the exact
//! command line for a unit and runs it through a [`Launcher`], the seam the
//! worker pool uses to spawn processes.

use crate::config::ToolConfig;
use crate::fs::TransferUnit;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// rsync availability status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsyncStatus {
    /// rsync is available and working
    Available,
    /// rsync is not installed
    NotInstalled,
    /// rsync is installed but `--version` failed
    ValidationFailed,
}

/// Detect whether `program` behaves like a working rsync
pub fn detect_rsync(program: &str) -> RsyncStatus {
    match Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
    {
        Ok(output) if output.status.success() => {
            if String::from_utf8_lossy(&output.stdout).contains("rsync") {
                RsyncStatus::Available
            } else {
                RsyncStatus::ValidationFailed
            }
        }
        Ok(_) => RsyncStatus::ValidationFailed,
        Err(_) => RsyncStatus::NotInstalled,
    }
}

/// Describe an rsync exit status
///
/// Descriptions follow the EXIT VALUES section of the rsync manual.
/// Statuses above 128 come from processes killed by a signal.
pub fn describe_exit_status(status: i32) -> String {
    let text = match status {
        0 => "success",
        1 => "syntax or usage error",
        2 => "protocol incompatibility",
        3 => "errors selecting input/output files, dirs",
        4 => "requested action not supported",
        5 => "error starting client-server protocol",
        6 => "daemon unable to append to log-file",
        10 => "error in socket I/O",
        11 => "error in file I/O",
        12 => "error in rsync protocol data stream",
        13 => "errors with program diagnostics",
        14 => "error in IPC code",
        20 => "received SIGUSR1 or SIGINT",
        21 => "some error returned by waitpid()",
        22 => "error allocating core memory buffers",
        23 => "partial transfer due to error",
        24 => "partial transfer due to vanished source files",
        25 => "the --max-delete limit stopped deletions",
        30 => "timeout in data send/receive",
        35 => "timeout waiting for daemon connection",
        255 => "remote shell failed",
        s if s > 128 && s < 255 => return format!("killed by signal {}", s - 128),
        s => return format!("exited with status {s}"),
    };
    text.to_string()
}

/// Join the destination root with a unit's destination directory
///
/// The join is textual so that remote roots such as `user@host:dir` are
/// preserved. A non-empty directory gets a trailing `/` so the tool treats
/// the destination as a directory.
pub fn join_destination(root: &str, directory: &Path) -> OsString {
    let mut joined = OsString::from(root);
    if directory.as_os_str().is_empty() {
        return joined;
    }

    if !(root.is_empty() || root.ends_with('/') || root.ends_with(':')) {
        joined.push("/");
    }
    joined.push(directory);
    if !directory.to_string_lossy().ends_with('/') {
        joined.push("/");
    }
    joined
}

/// Source argument anchoring a unit's destination for `--relative`
///
/// Returns `<base>/./<destination>/<file name>`, where `<base>` is what is
/// left of the source's parent once `destination` is removed from its end.
/// rsync then recreates `<destination>` under the root, creating every
/// missing level. `None` when the source path does not end with the
/// unit's destination.
pub fn anchored_source(unit: &TransferUnit) -> Option<OsString> {
    let parent = unit.source.parent()?;
    let name = unit.source.file_name()?;
    if !parent.ends_with(&unit.destination) {
        return None;
    }

    let depth = unit.destination.components().count();
    let mut anchored = parent.ancestors().nth(depth)?.join(".");
    if !unit.destination.as_os_str().is_empty() {
        anchored.push(&unit.destination);
    }
    anchored.push(name);
    Some(anchored.into_os_string())
}

/// The exact command line run for one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    /// Program to run
    pub program: String,
    /// Arguments, in order
    pub args: Vec<OsString>,
}

impl TransferCommand {
    /// Build the command sending `unit` under `destination_root`
    ///
    /// Units whose source ends with their destination directory, which is
    /// every unit the enumerator produces, are sent with `--relative` so
    /// intermediate directories are created whatever order units arrive
    /// in. Other units are sent to the joined destination directory.
    pub fn for_unit(tool: &ToolConfig, unit: &TransferUnit, destination_root: &str) -> Self {
        let mut args: Vec<OsString> = vec!["-c".into(), "--partial".into()];
        let anchored = anchored_source(unit);
        if anchored.is_some() {
            args.push("--relative".into());
        }
        if tool.mkpath {
            args.push("--mkpath".into());
        }

        match anchored {
            Some(source) => {
                args.push(source);
                args.push(destination_root.into());
            }
            None => {
                args.push(unit.source.clone().into_os_string());
                args.push(join_destination(destination_root, &unit.destination));
            }
        }

        Self {
            program: tool.program.clone(),
            args,
        }
    }

    /// Source argument of the command
    pub fn source(&self) -> Option<&OsStr> {
        self.args.iter().rev().nth(1).map(OsString::as_os_str)
    }

    /// Destination argument of the command
    pub fn destination(&self) -> Option<&OsStr> {
        self.args.last().map(OsString::as_os_str)
    }
}

impl fmt::Display for TransferCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs transfer commands
///
/// Implementations block until the command has finished and return its
/// exit status. An `Err` means the command could not be run at all.
pub trait Launcher: Send + Sync {
    /// Run `command` to completion
    fn launch(&self, command: &TransferCommand) -> io::Result<i32>;
}

/// Spawns real processes with their standard streams discarded
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, command: &TransferCommand) -> io::Result<i32> {
        let status = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;

        Ok(exit_status_code(status))
    }
}

/// Numeric status of a finished process, `128 + signal` when it was killed
fn exit_status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
