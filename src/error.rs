//! Error types for the virtual memory subsystem

use core::fmt;
use std::io;

use crate::process::Pid;

/// Common error type used throughout the VM subsystem.
///
/// Unresolvable page faults and permission violations are deliberately not
/// represented here. Both are surfaced to callers as short transfers from the
/// memory access layer, matching how the surrounding kernel turns them into a
/// process-level fault response.
#[derive(Debug)]
pub enum VmError {
    /// Operation named a process that is not registered
    NoSuchProcess(Pid),
    /// Executable image rejected at load time
    BadImage(String),
    /// Backing store I/O failure
    Io(io::Error),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::NoSuchProcess(pid) => write!(f, "no such process: {}", pid),
            VmError::BadImage(msg) => write!(f, "bad executable image: {}", msg),
            VmError::Io(err) => write!(f, "backing store I/O error: {}", err),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VmError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for VmError {
    fn from(err: io::Error) -> Self {
        VmError::Io(err)
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, VmError>;
