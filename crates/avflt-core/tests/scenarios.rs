//! End-to-end scenarios driving the hook dispatcher, agent I/O, and
//! lifecycle controller together, the way a real filter framework and a
//! live scanner agent would in production.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use avflt_core::cache::RootData;
use avflt_core::config::BrokerConfig;
use avflt_core::context::BrokerContext;
use avflt_core::dispatcher::{
    AgentIo, AgentReadOutcome, Decision, FileAccess, FileAccessFile, HookDispatcher,
};
use avflt_core::event::{DentryRef, Identity, Interrupt, MountRef, OpenFlags};
use avflt_core::filter_framework::FakeFilterFramework;
use avflt_core::handle_broker::FakeHandleBroker;
use avflt_core::lifecycle::LifecycleController;

fn identity() -> Identity {
    Identity { pid: 100, tgid: 100, ppid: 1, ruid: 0 }
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

#[test]
fn scenario_1_clean_open_populates_cache() {
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
            AgentReadOutcome::Request(bytes) => bytes,
            _ => panic!("expected a request"),
        };
        let line = std::str::from_utf8(&request[..request.len() - 1]).unwrap();
        assert_eq!(line, "id:1,type:0,fd:1,pid:100,tgid:100,ppid:1,ruid:0,path:/a");
        agent_io.write_reply(200, b"id:1,res:0").unwrap();
        handle.join().unwrap()
    });

    assert_eq!(decision, Decision::Continue);
}

#[test]
fn scenario_2_second_open_hits_cache_without_agent_traffic() {
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

    let decision = dispatcher.pre_open(&access, &interrupt);
    assert_eq!(decision, Decision::Continue);
    assert!(ctx.queue.is_empty());
}

#[test]
fn scenario_3_infected_verdict_denies_and_caches() {
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
    assert_eq!(decision, Decision::Stop(-libc::EPERM));

    // The infected verdict was cached: a second probe must not re-dispatch.
    let second = dispatcher.pre_open(&access, &interrupt);
    assert_eq!(second, Decision::Stop(-libc::EPERM));
    assert!(ctx.queue.is_empty());
}

#[test]
fn scenario_4_timeout_denies_and_sets_sticky_flag() {
    let ctx = BrokerContext::new(BrokerConfig::default().reply_timeout_ms(50));
    ctx.queue.start_accepting();
    let dispatcher = HookDispatcher::new(&ctx);
    let access = access(3, "/c", 10);
    let decision = dispatcher.pre_open(&access, &Interrupt::new());

    assert_eq!(decision, Decision::Stop(-libc::ETIMEDOUT));
    assert!(ctx.timed_out());
    assert!(ctx.queue.is_empty());
}

#[test]
fn scenario_5_closed_gate_fails_open() {
    let ctx = BrokerContext::new(BrokerConfig::default());
    let dispatcher = HookDispatcher::new(&ctx);
    let access = access(4, "/d", 10);
    let decision = dispatcher.pre_open(&access, &Interrupt::new());
    assert_eq!(decision, Decision::Continue);
}

#[test]
fn scenario_6_drain_releases_blocked_submitter_with_default_result() {
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
        let drained = lifecycle.shutdown();
        assert_eq!(drained, 1);
        handle.join().unwrap()
    });

    assert_eq!(decision, Decision::Continue);
}

#[test]
fn agent_departure_strands_backlog_but_never_blocks_submitter_forever() {
    let ctx = BrokerContext::new(BrokerConfig::default());
    ctx.queue.start_accepting();
    ctx.registry.register(300);
    let handle_broker = FakeHandleBroker::new();
    let agent_io = AgentIo::new(&ctx, &handle_broker);
    let dispatcher = HookDispatcher::new(&ctx);
    let interrupt = Interrupt::new();
    let access = access(6, "/f", 10);

    let decision = thread::scope(|scope| {
        let handle = scope.spawn(|| dispatcher.pre_open(&access, &interrupt));
        thread::sleep(Duration::from_millis(10));
        agent_io.read_request(300, &Interrupt::new(), 256).unwrap();
        // Agent dies before replying; the registry strands its backlog.
        assert_eq!(ctx.registry.strand(300), 1);
        handle.join().unwrap()
    });

    assert_eq!(decision, Decision::Continue);
}

#[test]
fn invalidate_all_forces_a_cache_miss_on_the_next_probe() {
    let ctx = BrokerContext::new(BrokerConfig::default());
    ctx.queue.start_accepting();
    ctx.registry.register(200);
    let handle_broker = FakeHandleBroker::new();
    let agent_io = AgentIo::new(&ctx, &handle_broker);
    let dispatcher = HookDispatcher::new(&ctx);
    let interrupt = Interrupt::new();
    let access = access(7, "/g", 10);
    let root = ctx.roots.get_or_create(1);
    let framework = FakeFilterFramework::new(vec![Arc::clone(&root)]);
    let lifecycle = LifecycleController::new(&ctx, &framework);

    thread::scope(|scope| {
        let handle = scope.spawn(|| dispatcher.pre_open(&access, &interrupt));
        thread::sleep(Duration::from_millis(10));
        agent_io.read_request(200, &Interrupt::new(), 256).unwrap();
        agent_io.write_reply(200, b"id:1,res:0").unwrap();
        handle.join().unwrap()
    });
    assert!(ctx.queue.is_empty());

    lifecycle.invalidate_all();

    // The stale cache entry must miss and re-dispatch to an agent.
    let decision = thread::scope(|scope| {
        let handle = scope.spawn(|| dispatcher.pre_open(&access, &interrupt));
        thread::sleep(Duration::from_millis(10));
        agent_io.read_request(200, &Interrupt::new(), 256).unwrap();
        agent_io.write_reply(200, b"id:2,res:0").unwrap();
        handle.join().unwrap()
    });
    assert_eq!(decision, Decision::Continue);
}
