//! The six end-to-end scenarios from the broker's testable-properties list,
//! each driven against a real [`BrokerContext`] with a [`FakeFilterFramework`]
//! and [`FakeHandleBroker`] standing in for the kernel and a live scanner.

use std::thread;
use std::time::Duration;

use avflt_core::cache::RootData;
use avflt_core::config::BrokerConfig;
use avflt_core::context::BrokerContext;
use avflt_core::dispatcher::{
    AgentIo, Decision, FileAccess, FileAccessFile, HookDispatcher,
};
use avflt_core::event::{DentryRef, Identity, Interrupt, MountRef, OpenFlags};
use avflt_core::filter_framework::FakeFilterFramework;
use avflt_core::handle_broker::FakeHandleBroker;
use avflt_core::lifecycle::LifecycleController;
use thiserror::Error;
use tracing::{debug, info};

pub const ALL_SCENARIOS: &[&str] = &[
    "clean-open",
    "cache-hit",
    "infected",
    "timeout",
    "gate-closed",
    "drain",
];

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unknown scenario {0:?}, expected one of {ALL_SCENARIOS:?}")]
    Unknown(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

pub fn run_named(name: &str) -> Result<String, ScenarioError> {
    info!(scenario = name, "running scenario");
    let outcome = match name {
        "clean-open" => clean_open(),
        "cache-hit" => cache_hit(),
        "infected" => infected(),
        "timeout" => timeout(),
        "gate-closed" => gate_closed(),
        "drain" => drain(),
        other => Err(ScenarioError::Unknown(other.to_string())),
    };
    match &outcome {
        Ok(summary) => info!(scenario = name, summary = %summary, "scenario finished"),
        Err(err) => debug!(scenario = name, error = %err, "scenario failed"),
    }
    outcome
}

fn identity() -> Identity {
    Identity { pid: 100, tgid: 100, ppid: 1, ruid: 0 }
}

fn assert_that(cond: bool, msg: &str) -> Result<(), ScenarioError> {
    if cond {
        Ok(())
    } else {
        Err(ScenarioError::Assertion(msg.to_string()))
    }
}

fn access(inode: u64, path: &str, size: u64) -> FileAccess {
    FileAccess {
        identity: identity(),
        path: Some(path.to_string()),
        file: Some(FileAccessFile {
            mount: MountRef::new(1),
            dentry: DentryRef::new(inode),
            flags: OpenFlags::default(),
            writable: false,
            writecount: 0,
            size,
        }),
    }
}

/// Scenario 1: an open of a fresh file with no cached entry goes to the
/// agent, which replies clean; the hook returns *continue* and the cache is
/// populated for the next probe.
fn clean_open() -> Result<String, ScenarioError> {
    let ctx = BrokerContext::new(BrokerConfig::default());
    ctx.queue.start_accepting();
    ctx.registry.register(200);
    let handle_broker = FakeHandleBroker::new();
    let agent_io = AgentIo::new(&ctx, &handle_broker);
    let dispatcher = HookDispatcher::new(&ctx);
    let interrupt = Interrupt::new();

    let access = access(1, "/a", 10);
    let decision = thread::scope(|scope| {
        let handle = scope.spawn(|| dispatcher.pre_open(&access, &interrupt));
        thread::sleep(Duration::from_millis(10));
        let request = match agent_io.read_request(200, &Interrupt::new(), 256).unwrap() {
            avflt_core::dispatcher::AgentReadOutcome::Request(bytes) => bytes,
            _ => panic!("expected a request"),
        };
        let line = String::from_utf8(request[..request.len() - 1].to_vec()).unwrap();
        assert!(line.starts_with("id:1,type:0,fd:"));
        debug!(request = %line, "agent received request");
        agent_io.write_reply(200, b"id:1,res:0").unwrap();
        handle.join().unwrap()
    });

    assert_that(decision == Decision::Continue, "clean open must continue")?;
    Ok("continue, cache populated".to_string())
}

/// Scenario 2: a second open of the same inode under unchanged versions
/// hits the cache without any agent traffic.
fn cache_hit() -> Result<String, ScenarioError> {
    let ctx = BrokerContext::new(BrokerConfig::default());
    ctx.queue.start_accepting();
    ctx.registry.register(200);
    let handle_broker = FakeHandleBroker::new();
    let agent_io = AgentIo::new(&ctx, &handle_broker);
    let dispatcher = HookDispatcher::new(&ctx);
    let interrupt = Interrupt::new();
    let access = access(1, "/a", 10);

    thread::scope(|scope| {
        let handle = scope.spawn(|| dispatcher.pre_open(&access, &interrupt));
        thread::sleep(Duration::from_millis(10));
        agent_io.read_request(200, &Interrupt::new(), 256).unwrap();
        agent_io.write_reply(200, b"id:1,res:0").unwrap();
        handle.join().unwrap()
    });

    let second = dispatcher.pre_open(&access, &interrupt);
    assert_that(second == Decision::Continue, "cached hit must continue")?;
    assert_that(ctx.queue.is_empty(), "cache hit must not touch the queue")?;
    Ok("cache hit, no agent traffic".to_string())
}

/// Scenario 3: an infected verdict denies with `-EPERM` and the verdict is
/// cached.
fn infected() -> Result<String, ScenarioError> {
    let ctx = BrokerContext::new(BrokerConfig::default());
    ctx.queue.start_accepting();
    ctx.registry.register(200);
    let handle_broker = FakeHandleBroker::new();
    let agent_io = AgentIo::new(&ctx, &handle_broker);
    let dispatcher = HookDispatcher::new(&ctx);
    let interrupt = Interrupt::new();
    let access = access(2, "/b", 10);

    let decision = thread::scope(|scope| {
        let handle = scope.spawn(|| dispatcher.pre_open(&access, &interrupt));
        thread::sleep(Duration::from_millis(10));
        agent_io.read_request(200, &Interrupt::new(), 256).unwrap();
        agent_io.write_reply(200, b"id:1,res:1,cache:1").unwrap();
        handle.join().unwrap()
    });

    assert_that(decision == Decision::Stop(-libc::EPERM), "infected verdict must deny with EPERM")?;
    Ok("stop(-EPERM), infected cached".to_string())
}

/// Scenario 4: no agent ever replies; after the configured deadline the
/// submitter times out, the sticky flag is set, and the event is fully
/// released.
fn timeout() -> Result<String, ScenarioError> {
    let ctx = BrokerContext::new(BrokerConfig::default().reply_timeout_ms(50));
    ctx.queue.start_accepting();
    let dispatcher = HookDispatcher::new(&ctx);
    let access = access(3, "/c", 10);
    let decision = dispatcher.pre_open(&access, &Interrupt::new());
    debug!(?decision, "timeout scenario settled with no agent attached");

    assert_that(decision == Decision::Stop(-libc::ETIMEDOUT), "timeout must deny with ETIMEDOUT")?;
    assert_that(ctx.timed_out(), "sticky timeout flag must be set")?;
    assert_that(ctx.queue.is_empty(), "timed-out event must be removed from the queue")?;
    Ok("stop(-ETIMEDOUT), sticky flag set".to_string())
}

/// Scenario 5: the admission gate is closed and no agents are registered;
/// the submit fails open and the hook allows the access with code 0.
fn gate_closed() -> Result<String, ScenarioError> {
    let ctx = BrokerContext::new(BrokerConfig::default());
    let dispatcher = HookDispatcher::new(&ctx);
    let access = access(4, "/d", 10);
    let decision = dispatcher.pre_open(&access, &Interrupt::new());
    assert_that(decision == Decision::Continue, "closed gate must fail open")?;
    Ok("continue (fail-open, no AV present)".to_string())
}

/// Scenario 6: an event is enqueued, then the last agent departs and
/// `stop_accepting` + `drain` release it with the default result.
fn drain() -> Result<String, ScenarioError> {
    let ctx = BrokerContext::new(BrokerConfig::default());
    let framework = FakeFilterFramework::new(vec![RootData::new(1)]);
    let lifecycle = LifecycleController::new(&ctx, &framework);
    lifecycle.start_accepting();
    let dispatcher = HookDispatcher::new(&ctx);
    let access = access(5, "/e", 10);
    let interrupt = Interrupt::new();

    let decision = thread::scope(|scope| {
        let handle = scope.spawn(|| dispatcher.pre_open(&access, &interrupt));
        thread::sleep(Duration::from_millis(10));
        lifecycle.force_stop();
        lifecycle.shutdown();
        handle.join().unwrap()
    });

    assert_that(decision == Decision::Continue, "drained event must continue with default result")?;
    Ok("continue (drained with default result 0)".to_string())
}
