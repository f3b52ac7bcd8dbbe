//! Capability interface for the kernel-specific half of encoding a request:
//! opening a read-only handle on the agent's behalf and installing it into
//! the agent's descriptor table.
//!
//! A real implementation would call into the host kernel (`dentry_open`,
//! `get_unused_fd`, `fd_install`); none of that is expressible in hosted
//! Rust, so the broker only ever depends on this trait. [`FakeHandleBroker`]
//! is the test/simulation double, returning synthetic ids the way a fake
//! scheduler dependency would.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::AvError;
use crate::event::{AgentId, DentryRef, MountRef, OpenFlags};

pub type RawFd = i32;

/// An opaque, broker-assigned handle to a reserved-but-not-yet-installed
/// file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenHandle(pub u64);

pub trait HandleBroker: Send + Sync {
    /// Opens a read-only handle on `dentry`/`mount` (preserving the
    /// `largefile` flag) and reserves a descriptor slot in `agent`'s table,
    /// returning both the handle and the fd number the agent will observe
    /// once installed.
    fn reserve(
        &self,
        agent: AgentId,
        dentry: &DentryRef,
        mount: &MountRef,
        flags: OpenFlags,
    ) -> Result<(OpenHandle, RawFd), AvError>;

    /// Makes a previously reserved handle visible in the agent's
    /// descriptor table, transferring ownership to the agent.
    fn install(&self, handle: OpenHandle);

    /// Releases a reserved-but-not-installed handle (the encode-teardown
    /// path, e.g. when the request line did not fit the caller's buffer).
    fn release(&self, handle: OpenHandle);
}

/// Test/simulation double: returns synthetic, monotonically increasing
/// handles and fds, with an injectable one-shot open failure.
#[derive(Default)]
pub struct FakeHandleBroker {
    next: AtomicU64,
    fail_next_reserve: AtomicBool,
}

impl FakeHandleBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_reserve(&self) {
        self.fail_next_reserve.store(true, Ordering::Release);
    }
}

impl HandleBroker for FakeHandleBroker {
    fn reserve(
        &self,
        _agent: AgentId,
        _dentry: &DentryRef,
        _mount: &MountRef,
        _flags: OpenFlags,
    ) -> Result<(OpenHandle, RawFd), AvError> {
        if self.fail_next_reserve.swap(false, Ordering::AcqRel) {
            return Err(AvError::InvalidArgument);
        }
        let id = self.next.fetch_add(1, Ordering::AcqRel) + 1;
        Ok((OpenHandle(id), id as RawFd))
    }

    fn install(&self, _handle: OpenHandle) {}

    fn release(&self, _handle: OpenHandle) {}
}
