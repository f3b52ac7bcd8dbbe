//! Stress tests driving many concurrent submitters and agents through the
//! public hook-dispatcher / agent-I/O surface, in the style of the FUSE
//! scheduler's own stress suite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use avflt_core::config::BrokerConfig;
use avflt_core::context::BrokerContext;
use avflt_core::dispatcher::{AgentIo, AgentReadOutcome, Decision, FileAccess, FileAccessFile, HookDispatcher};
use avflt_core::event::{DentryRef, Identity, Interrupt, MountRef, OpenFlags};
use avflt_core::handle_broker::FakeHandleBroker;

const SUBMITTER_COUNT: usize = 16;
const AGENT_COUNT: usize = 4;

fn identity(n: usize) -> Identity {
    Identity { pid: n as i32, tgid: n as i32, ppid: 1, ruid: 0 }
}

fn access(inode: u64, n: usize) -> FileAccess {
    FileAccess {
        identity: identity(n),
        path: Some(format!("/f{inode}")),
        file: Some(FileAccessFile {
            mount: MountRef::new(1),
            dentry: DentryRef::new(inode),
            flags: OpenFlags::default(),
            writable: false,
            writecount: 0,
            size: 10,
        }),
    }
}

/// Many submitters hit distinct inodes concurrently while a pool of agents
/// services the queue; every submitter must see exactly one completion and
/// every reply must be accepted exactly once.
#[test]
fn many_submitters_and_agents_each_request_completes_exactly_once() {
    let ctx = Arc::new(BrokerContext::new(BrokerConfig::default()));
    ctx.queue.start_accepting();
    let handle_broker = Arc::new(FakeHandleBroker::new());
    for agent in 0..AGENT_COUNT {
        ctx.registry.register(1000 + agent as i32);
    }

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let replies_sent = Arc::new(AtomicUsize::new(0));

    let agent_handles: Vec<_> = (0..AGENT_COUNT)
        .map(|agent_idx| {
            let ctx = Arc::clone(&ctx);
            let handle_broker = Arc::clone(&handle_broker);
            let stop = Arc::clone(&stop);
            let replies_sent = Arc::clone(&replies_sent);
            thread::spawn(move || {
                let agent_id = 1000 + agent_idx as i32;
                let agent_io = AgentIo::new(&ctx, handle_broker.as_ref());
                let interrupt = Interrupt::new();
                while !stop.load(Ordering::Acquire) {
                    match agent_io.read_request(agent_id, &interrupt, 256) {
                        Ok(AgentReadOutcome::Request(bytes)) => {
                            let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
                            let id: u64 = text
                                .split(',')
                                .next()
                                .unwrap()
                                .strip_prefix("id:")
                                .unwrap()
                                .parse()
                                .unwrap();
                            let reply = format!("id:{id},res:0");
                            agent_io.write_reply(agent_id, reply.as_bytes()).unwrap();
                            replies_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(AgentReadOutcome::Stopped) => break,
                        Ok(AgentReadOutcome::Interrupted) => continue,
                        Err(_) => continue,
                    }
                }
            })
        })
        .collect();

    let submitter_handles: Vec<_> = (0..SUBMITTER_COUNT)
        .map(|n| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let dispatcher = HookDispatcher::new(&ctx);
                let interrupt = Interrupt::new();
                let decision = dispatcher.pre_open(&access(n as u64, n), &interrupt);
                decision == Decision::Continue
            })
        })
        .collect();

    let mut all_continued = true;
    for h in submitter_handles {
        all_continued &= h.join().unwrap();
    }
    assert!(all_continued, "every clean reply must yield Continue");

    stop.store(true, Ordering::Release);
    ctx.queue.stop_accepting(false);
    for h in agent_handles {
        let _ = h.join();
    }
    for agent in 0..AGENT_COUNT {
        ctx.registry.strand(1000 + agent as i32);
    }

    assert_eq!(replies_sent.load(Ordering::Relaxed), SUBMITTER_COUNT);
    assert!(ctx.queue.is_empty());
}

/// Submitters that race a shrinking timeout must each see exactly one
/// outcome (timeout or reply), never a hang and never a double-complete.
#[test]
fn timeouts_and_replies_race_without_double_completion() {
    let ctx = Arc::new(BrokerContext::new(BrokerConfig::default().reply_timeout_ms(20)));
    ctx.queue.start_accepting();
    ctx.registry.register(200);
    let handle_broker = Arc::new(FakeHandleBroker::new());

    let agent = {
        let ctx = Arc::clone(&ctx);
        let handle_broker = Arc::clone(&handle_broker);
        thread::spawn(move || {
            let agent_io = AgentIo::new(&ctx, handle_broker.as_ref());
            let interrupt = Interrupt::new();
            // Reply to roughly half the requests promptly; let the rest miss
            // the deadline so both completion paths race in practice.
            let mut count = 0;
            loop {
                match agent_io.read_request(200, &interrupt, 256) {
                    Ok(AgentReadOutcome::Request(bytes)) => {
                        count += 1;
                        let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
                        let id: u64 = text
                            .split(',')
                            .next()
                            .unwrap()
                            .strip_prefix("id:")
                            .unwrap()
                            .parse()
                            .unwrap();
                        if count % 2 == 0 {
                            let reply = format!("id:{id},res:0");
                            let _ = agent_io.write_reply(200, reply.as_bytes());
                        }
                        if count >= SUBMITTER_COUNT {
                            break;
                        }
                    }
                    Ok(AgentReadOutcome::Stopped) => break,
                    Ok(AgentReadOutcome::Interrupted) => continue,
                    Err(_) => continue,
                }
            }
        })
    };

    let submitter_handles: Vec<_> = (0..SUBMITTER_COUNT)
        .map(|n| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let dispatcher = HookDispatcher::new(&ctx);
                let interrupt = Interrupt::new();
                dispatcher.pre_open(&access(100 + n as u64, n), &interrupt)
            })
        })
        .collect();

    let mut continues = 0;
    let mut timeouts = 0;
    for h in submitter_handles {
        match h.join().unwrap() {
            Decision::Continue => continues += 1,
            Decision::Stop(code) if code == -libc::ETIMEDOUT => timeouts += 1,
            other => panic!("unexpected decision: {other:?}"),
        }
    }
    assert_eq!(continues + timeouts, SUBMITTER_COUNT);

    ctx.queue.stop_accepting(false);
    thread::sleep(Duration::from_millis(30));
    let _ = agent.join();
}
