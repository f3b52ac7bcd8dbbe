//! Request/reply brokering core for an anti-virus file-access filter.
//!
//! This crate implements the scan-request broker that sits on a filesystem
//! filter framework's file-open and file-close hooks: it turns a hooked
//! access into a pending [`event::Event`], hands it to whichever agent
//! process is next available, blocks the hook until a verdict arrives (or
//! a timeout elapses), and maintains a per-inode result cache so repeat
//! accesses under unchanged versions skip the round trip entirely.
//!
//! The filesystem filter framework, the agent registry's own
//! creation/authentication/enumeration machinery, path stringification, and
//! the scanning engine itself are all external collaborators; this crate
//! only depends on the narrow trait boundaries in [`filter_framework`] and
//! [`handle_broker`].
//!
//! # Module map
//!
//! - [`event`] — the pending-scan-request unit of work and its completion slot.
//! - [`queue`] — the FIFO admission gate agents pop from.
//! - [`registry`] — per-agent backlog and reply matching.
//! - [`cache`] — per-inode and per-root cache-version state.
//! - [`dispatcher`] — the hook dispatcher and agent I/O codec glue.
//! - [`codec`] — the wire format for agent requests and replies.
//! - [`lifecycle`] — admission-gate transitions and cache invalidation.
//! - [`context`] — broker-wide state threaded through all of the above.
//! - [`config`] — administrative configuration and defaults.
//! - [`error`] — the broker's error enum and its errno mapping.
//! - [`handle_broker`], [`filter_framework`] — capability traits for the
//!   kernel-specific and filter-framework-specific halves of the system,
//!   plus fakes usable by tests and [`avflt-sim`](../avflt_sim/index.html).

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod filter_framework;
pub mod handle_broker;
pub mod lifecycle;
pub mod queue;
pub mod registry;

pub use cache::{InMemoryInodeDataService, InodeData, InodeDataService, RootData, RootTable};
pub use codec::{encode_request, parse_reply, ReplyLine};
pub use config::BrokerConfig;
pub use context::BrokerContext;
pub use dispatcher::{AgentIo, Decision, FileAccess, FileAccessFile, HookDispatcher};
pub use error::{AvError, AvResult};
pub use event::{Event, EventId, EventKind, Identity, Interrupt, WaitOutcome};
pub use filter_framework::FilterFramework;
pub use handle_broker::HandleBroker;
pub use lifecycle::LifecycleController;
pub use queue::RequestQueue;
pub use registry::AgentRegistry;
