//! Per-agent backlog and reply matcher.
//!
//! Agents are keyed by their thread-group id, the same key the source
//! filter uses to find a registered process's backlog (`avflt_proc_find`).
//! Only the narrow slice of the real agent registry the broker needs is
//! modeled here: registration, lookup, per-agent backlog, and reply
//! completion. Agent creation, authentication, and enumeration for
//! administrative tooling are out of scope.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::codec::ReplyLine;
use crate::error::AvError;
use crate::event::{AgentId, Event, EventId};

/// A registered agent and the events it has checked out of the queue but
/// not yet replied to.
pub struct AgentState {
    pub id: AgentId,
    backlog: DashMap<EventId, Arc<Event>>,
}

impl AgentState {
    fn new(id: AgentId) -> Self {
        Self {
            id,
            backlog: DashMap::new(),
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

/// Registry of currently-connected agents and their backlogs.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<AgentState>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: AgentId) -> Arc<AgentState> {
        self.agents
            .entry(id)
            .or_insert_with(|| Arc::new(AgentState::new(id)))
            .clone()
    }

    pub fn is_registered(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    pub fn lookup(&self, id: AgentId) -> Option<Arc<AgentState>> {
        self.agents.get(&id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Appends a checked-out event to an agent's backlog. The event must
    /// already have an id assigned (i.e. have been popped off the queue).
    pub fn checkout(&self, agent: AgentId, event: Arc<Event>) {
        if let Some(state) = self.lookup(agent) {
            state.backlog.insert(event.id(), event);
        }
    }

    /// Applies a parsed reply: locates the agent, removes the matching
    /// backlog entry, and completes it. A reply for an id that was already
    /// claimed by a timeout or drain (or that never existed) fails with
    /// `NoEntry`, even if a stale backlog entry had to be evicted along the
    /// way.
    pub fn complete_reply(&self, agent: AgentId, reply: ReplyLine) -> Result<(), AvError> {
        let state = self.lookup(agent).ok_or(AvError::NoEntry)?;
        let event = state
            .backlog
            .remove(&reply.id)
            .map(|(_, v)| v)
            .ok_or(AvError::NoEntry)?;
        if !event.completion.try_claim() {
            return Err(AvError::NoEntry);
        }
        event.set_result(reply.res);
        if let Some(cache) = reply.cache {
            event.set_cache_eligible(cache != 0);
        }
        event.completion.signal();
        Ok(())
    }

    /// Removes a departing agent and completes every event still in its
    /// backlog, so no submitter is left blocked on an agent that is gone.
    pub fn strand(&self, agent: AgentId) -> usize {
        let Some((_, state)) = self.agents.remove(&agent) else {
            return 0;
        };
        let stranded: Vec<_> = state
            .backlog
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for event in &stranded {
            if event.completion.try_claim() {
                event.completion.signal();
            }
        }
        if !stranded.is_empty() {
            warn!(agent, count = stranded.len(), "stranded events on agent departure");
        }
        stranded.len()
    }
}
