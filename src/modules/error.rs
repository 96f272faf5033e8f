//! Error taxonomy shared across the crate.
//!
//! Callers sitting above this crate (an RPC dispatcher, typically) map
//! these variants onto their own status codes, so each variant captures a
//! distinct failure class rather than a call site.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure classes surfaced by volume, mount and quota operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input: missing identifier or path, conflicting
    /// directives, non-positive quota request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The targeted volume or mount does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate create with a capacity that differs from the volume's
    /// current quota.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Wire-format violation: unexpected packet type, wrong response
    /// length, non-zero registration status, malformed session metadata.
    /// The connection it happened on must be discarded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A required OS tool is absent from the execution environment.
    #[error("{tool} executable not found in $PATH")]
    ToolMissing {
        /// Name of the missing binary.
        tool: String,
    },

    /// An OS-level mount or unmount failed; the message carries the
    /// invoked command and its combined output.
    #[error("mount failure: {0}")]
    Mount(String),

    /// Filesystem or tool failure outside the mount path, including
    /// partial directory removal.
    #[error("{0}")]
    Internal(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the error denotes a missing volume or mount.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
