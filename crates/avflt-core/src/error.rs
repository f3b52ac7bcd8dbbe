//! Error kinds surfaced by the broker and their mapping to negative errno
//! values, mirroring how a kernel filter module reports failures back
//! through a hook's return slot.

use thiserror::Error;

/// Errors the broker can report to a hook caller or an agent.
///
/// `NotAccepted` is never actually handed to a caller as an errno: the hook
/// dispatcher converts it silently into "allow" (see the broker's fail-open
/// policy). It is still a first-class variant because `RequestQueue::submit`
/// needs to report it to its caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AvError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("request not accepted")]
    NotAccepted,
    #[error("interrupted")]
    Interrupted,
    #[error("timed out waiting for reply")]
    TimedOut,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("bad address")]
    BadAddress,
    #[error("no such entry")]
    NoEntry,
}

impl AvError {
    /// Converts this error to the negative libc error code a hook would
    /// write into its return slot.
    #[must_use]
    pub fn to_errno(self) -> i32 {
        match self {
            AvError::OutOfMemory => -libc::ENOMEM,
            AvError::NotAccepted => 0,
            AvError::Interrupted => -libc::EINTR,
            AvError::TimedOut => -libc::ETIMEDOUT,
            AvError::InvalidArgument => -libc::EINVAL,
            AvError::BadAddress => -libc::EFAULT,
            AvError::NoEntry => -libc::ENOENT,
        }
    }
}

/// Result alias used throughout the broker.
pub type AvResult<T> = Result<T, AvError>;

/// Extension trait for converting errors to errno, for symmetry with
/// external collaborators that return their own error types.
pub trait ToErrno {
    fn to_errno(&self) -> i32;
}

impl ToErrno for AvError {
    fn to_errno(&self) -> i32 {
        AvError::to_errno(*self)
    }
}
