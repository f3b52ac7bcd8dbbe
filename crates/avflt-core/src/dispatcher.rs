//! Hook dispatcher and agent I/O codec.
//!
//! The dispatcher turns a pre-open/post-release hook call into a cache hit,
//! an immediate continue, or a submitted [`crate::event::Event`] that blocks
//! the calling thread until an agent replies or the wait times out. The
//! agent I/O codec is the other end of that exchange: pop, encode, install,
//! checkout on read; parse and complete on write.

use std::sync::Arc;

use tracing::debug;

use crate::cache::RootData;
use crate::codec::{encode_request, parse_reply};
use crate::context::BrokerContext;
use crate::error::AvError;
use crate::event::{
    AgentId, DentryRef, Event, EventKind, FileRef, Identity, Interrupt, MountRef, NewEvent,
    OpenFlags, WaitOutcome,
};
use crate::handle_broker::HandleBroker;
use crate::queue::PopOutcome;

/// The verdict value that denies an access with "operation not permitted",
/// distinct from an ordinary negative errno.
pub const FILE_INFECTED: i32 = 1;

/// Input to a hook call: everything the dispatcher needs to decide whether
/// this access needs scanning, independent of how the filter framework
/// represents a file.
pub struct FileAccess {
    pub identity: Identity,
    pub path: Option<String>,
    pub file: Option<FileAccessFile>,
}

/// The live-file half of an access; absent for accesses with no inode
/// (e.g. the hook fired on something other than a regular file).
pub struct FileAccessFile {
    pub mount: MountRef,
    pub dentry: DentryRef,
    pub flags: OpenFlags,
    pub writable: bool,
    pub writecount: i32,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    /// Deny the access, writing this negative errno into the hook's return
    /// slot.
    Stop(i32),
}

fn evaluate_verdict(res: i32) -> Decision {
    if res < 0 {
        Decision::Stop(res)
    } else if res == FILE_INFECTED {
        Decision::Stop(-libc::EPERM)
    } else {
        Decision::Continue
    }
}

pub struct HookDispatcher<'a> {
    ctx: &'a BrokerContext,
}

impl<'a> HookDispatcher<'a> {
    pub fn new(ctx: &'a BrokerContext) -> Self {
        Self { ctx }
    }

    pub fn pre_open(&self, access: &FileAccess, interrupt: &Interrupt) -> Decision {
        self.dispatch(access, EventKind::Open, false, interrupt)
    }

    pub fn post_release(&self, access: &FileAccess, interrupt: &Interrupt) -> Decision {
        self.dispatch(access, EventKind::Close, true, interrupt)
    }

    /// Whether this access is even a candidate for scanning: the broker must
    /// be accepting requests, the caller must not be a registered agent (an
    /// agent scanning its own reads would recurse forever), and the file
    /// must have a live, non-empty inode.
    fn should_check(&self, access: &FileAccess) -> bool {
        if self.ctx.queue.is_stopped() {
            return false;
        }
        if self.ctx.registry.is_registered(access.identity.tgid) {
            return false;
        }
        match &access.file {
            Some(file) => file.size != 0,
            None => false,
        }
    }

    fn dispatch(
        &self,
        access: &FileAccess,
        kind: EventKind,
        is_close: bool,
        interrupt: &Interrupt,
    ) -> Decision {
        if !self.should_check(access) {
            return Decision::Continue;
        }
        let file = access.file.as_ref().expect("should_check verified a file is present");
        let root = self.ctx.roots.get_or_create(file.mount.root_id());

        if self.ctx.cache_enabled() && root.cache() {
            let inode_data = self.ctx.inodes.attach(file.dentry.inode());
            inode_data.observe_writecount(file.writecount, file.writable, is_close);
            if let Some(verdict) = inode_data.probe(self.ctx.cache_ver(), root.cache_ver()) {
                return evaluate_verdict(verdict);
            }
        }

        let Some(event) = self.alloc(access, kind, file, &root) else {
            return Decision::Stop(AvError::OutOfMemory.to_errno());
        };

        if self.ctx.queue.submit(Arc::clone(&event), true).is_err() {
            // No agent is present to serve this request; the documented
            // policy is to fail open rather than block forever.
            return Decision::Continue;
        }

        match event.completion.wait(self.ctx.reply_timeout(), interrupt) {
            WaitOutcome::Completed => {
                self.update_cache(&event, &root);
                evaluate_verdict(event.result())
            }
            WaitOutcome::TimedOut => {
                self.ctx.mark_timed_out();
                self.ctx.queue.remove(&event);
                Decision::Stop(AvError::TimedOut.to_errno())
            }
            WaitOutcome::Interrupted => {
                self.ctx.queue.remove(&event);
                Decision::Stop(AvError::Interrupted.to_errno())
            }
        }
    }

    fn alloc(
        &self,
        access: &FileAccess,
        kind: EventKind,
        file: &FileAccessFile,
        root: &Arc<RootData>,
    ) -> Option<Arc<Event>> {
        if self.ctx.faults.take_oom() {
            return None;
        }
        let inode_data = self.ctx.inodes.attach(file.dentry.inode());
        Some(Event::build(NewEvent {
            kind,
            identity: access.identity,
            path: access.path.clone(),
            file_ref: Some(FileRef {
                mount: file.mount.clone(),
                dentry: file.dentry.clone(),
                flags: file.flags,
            }),
            cache_eligible: true,
            root_ref: Some(Arc::clone(root)),
            root_cache_ver_snapshot: root.cache_ver(),
            inode_cache_ver_snapshot: inode_data.inode_cache_ver(),
        }))
    }

    /// Installs the reply's verdict into the inode cache, under the version
    /// snapshots taken when the event was created rather than whatever is
    /// current now: a write that lands between submit and reply must still
    /// invalidate this entry on the next probe.
    fn update_cache(&self, event: &Event, root: &Arc<RootData>) {
        if !matches!(event.kind, EventKind::Open | EventKind::Close) {
            return;
        }
        if !event.cache_eligible() || !self.ctx.cache_enabled() || !root.cache_enabled() {
            return;
        }
        let Some(file_ref) = &event.file_ref else {
            return;
        };
        let inode_data = self.ctx.inodes.attach(file_ref.dentry.inode());
        inode_data.install(
            event.result(),
            event.root_cache_ver_snapshot,
            event.inode_cache_ver_snapshot,
            self.ctx.cache_ver(),
        );
    }
}

/// Outcome of an agent's blocking read of the next request.
pub enum AgentReadOutcome {
    Request(Vec<u8>),
    /// The gate is closed and the queue is empty; the agent should stop
    /// polling.
    Stopped,
    Interrupted,
}

/// The agent-facing half of request/reply transport: pop, reserve, encode,
/// install on read; parse and complete on write.
pub struct AgentIo<'a, H: HandleBroker> {
    ctx: &'a BrokerContext,
    handle_broker: &'a H,
}

impl<'a, H: HandleBroker> AgentIo<'a, H> {
    pub fn new(ctx: &'a BrokerContext, handle_broker: &'a H) -> Self {
        Self { ctx, handle_broker }
    }

    /// Blocks until a request is ready for `agent`, encoding it into a
    /// buffer of at most `capacity` bytes.
    pub fn read_request(
        &self,
        agent: AgentId,
        interrupt: &Interrupt,
        capacity: usize,
    ) -> Result<AgentReadOutcome, AvError> {
        let event = match self.ctx.queue.pop(&self.ctx.ids, interrupt) {
            PopOutcome::Event(event) => event,
            PopOutcome::Stopped => return Ok(AgentReadOutcome::Stopped),
            PopOutcome::Interrupted => return Ok(AgentReadOutcome::Interrupted),
        };

        if let Some(file_ref) = &event.file_ref {
            let (handle, fd) = match self.handle_broker.reserve(
                agent,
                &file_ref.dentry,
                &file_ref.mount,
                file_ref.flags,
            ) {
                Ok(reserved) => reserved,
                Err(err) => {
                    self.ctx.queue.readd(&event);
                    return Err(err);
                }
            };
            event.set_fd(fd);
            match encode_request(&event, capacity) {
                Ok(bytes) => {
                    self.handle_broker.install(handle);
                    self.ctx.registry.checkout(agent, Arc::clone(&event));
                    Ok(AgentReadOutcome::Request(bytes))
                }
                Err(err) => {
                    self.handle_broker.release(handle);
                    self.ctx.queue.readd(&event);
                    Err(err)
                }
            }
        } else {
            match encode_request(&event, capacity) {
                Ok(bytes) => {
                    self.ctx.registry.checkout(agent, Arc::clone(&event));
                    Ok(AgentReadOutcome::Request(bytes))
                }
                Err(err) => {
                    self.ctx.queue.readd(&event);
                    Err(err)
                }
            }
        }
    }

    pub fn write_reply(&self, agent: AgentId, buf: &[u8]) -> Result<(), AvError> {
        let reply = parse_reply(buf)?;
        let outcome = self.ctx.registry.complete_reply(agent, reply);
        if outcome.is_err() {
            debug!(agent, id = reply.id, "reply for unknown or already-claimed event");
        }
        outcome
    }
}
