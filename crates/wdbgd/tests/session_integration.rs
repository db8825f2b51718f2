//! Integration tests for Session and DebuggerProcess against a fake cdb.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{process_exists, FakeDebugger};
use tokio::time::sleep;
use wdbg_core::{CommandStatus, SessionState, Target};
use wdbgd::session::{Session, SessionError};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn open(fake: &FakeDebugger, name: &str) -> Session {
    let target = Target::dump(fake.dump(name)).unwrap();
    Session::open(target, &fake.open_params())
        .await
        .expect("session should open")
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_open_reaches_ready_with_clean_startup_output() {
    let fake = FakeDebugger::new();
    let session = open(&fake, "crash.dmp").await;

    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.pid().is_some());
    assert_eq!(session.startup_output().len(), 1);
    assert!(session.startup_output()[0].starts_with("Loading Dump File ["));
    assert!(session
        .startup_output()
        .iter()
        .all(|l| !l.contains("Microsoft (R)") && !l.contains("0:000>")));

    session.close().await;
}

#[tokio::test]
async fn test_open_fails_when_debugger_exits_during_startup() {
    let fake = FakeDebugger::new();
    let target = Target::dump(fake.dump("die-on-start.dmp")).unwrap();
    let err = Session::open(target, &fake.open_params()).await.unwrap_err();
    match err {
        SessionError::Open { reason, .. } => {
            assert!(reason.contains("exited during startup"), "reason: {reason}");
            assert!(reason.contains("Could not open dump file"), "reason: {reason}");
        }
        other => panic!("Expected Open error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_open_times_out_and_kills_hung_debugger() {
    let fake = FakeDebugger::new();
    let target = Target::dump(fake.dump("hang-on-start.dmp")).unwrap();
    let mut params = fake.open_params();
    params.startup_timeout = Duration::from_millis(300);

    let err = Session::open(target, &params).await.unwrap_err();
    match err {
        SessionError::Open { reason, .. } => assert!(reason.contains("did not become ready")),
        other => panic!("Expected Open error, got {other:?}"),
    }
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_run_command_output_is_clean() {
    let fake = FakeDebugger::new();
    let session = open(&fake, "crash.dmp").await;

    let result = session.run("kb", TIMEOUT).await.unwrap();
    assert_eq!(result.status, CommandStatus::Completed);
    assert_eq!(result.lines, vec!["output for kb"]);
    assert!(!result.truncated);
    assert_eq!(session.state(), SessionState::Ready);

    let analysis = session.run("!analyze -v", TIMEOUT).await.unwrap();
    assert!(analysis.is_completed());
    assert!(analysis.text().contains("FAULTING_IP"));
    assert!(analysis.lines.iter().all(|l| !l.contains("0:000>")));
    assert!(analysis.lines.iter().all(|l| !l.contains("WDBG_")));

    session.close().await;
}

#[tokio::test]
async fn test_timeout_returns_partial_and_session_stays_ready() {
    let fake = FakeDebugger::new();
    let session = open(&fake, "crash.dmp").await;

    let slow = session.run("slow", Duration::from_millis(1)).await.unwrap();
    assert_eq!(slow.status, CommandStatus::TimedOut);
    assert_eq!(session.state(), SessionState::Ready);

    // The late "slow done" belongs to the timed-out command and is dropped.
    let next = session.run("r", TIMEOUT).await.unwrap();
    assert_eq!(next.status, CommandStatus::Completed);
    assert_eq!(next.lines, vec!["output for r"]);

    session.close().await;
}

#[tokio::test]
async fn test_huge_timeout_is_capped_and_session_stays_usable() {
    let fake = FakeDebugger::new();
    let session = open(&fake, "crash.dmp").await;

    let result = session.run("r", Duration::from_secs(u64::MAX)).await.unwrap();
    assert_eq!(result.status, CommandStatus::Completed);
    assert_eq!(result.lines, vec!["output for r"]);
    assert_eq!(session.state(), SessionState::Ready);

    let result = session.run("kb", Duration::MAX).await.unwrap();
    assert_eq!(result.lines, vec!["output for kb"]);
    assert_eq!(session.state(), SessionState::Ready);

    session.close().await;
}

#[tokio::test]
async fn test_concurrent_run_is_rejected_as_busy() {
    let fake = FakeDebugger::new();
    let session = Arc::new(open(&fake, "crash.dmp").await);

    let running = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run("slow", TIMEOUT).await })
    };
    sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), SessionState::Busy);

    let err = session.run("kb", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SessionError::Busy(_)));

    // Status reads don't wait for the running command.
    let summary = session.summary();
    assert_eq!(summary.state, SessionState::Busy);

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, CommandStatus::Completed);
    assert_eq!(result.lines, vec!["slow done"]);
    assert_eq!(session.state(), SessionState::Ready);

    session.close().await;
}

#[tokio::test]
async fn test_process_death_closes_session() {
    let fake = FakeDebugger::new();
    let session = open(&fake, "crash.dmp").await;

    let result = session.run("crash", TIMEOUT).await.unwrap();
    assert_eq!(result.status, CommandStatus::ProcessExited);
    assert_eq!(session.state(), SessionState::Closed);

    let err = session.run("kb", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SessionError::Closed(_)));
}

// ============================================================================
// Idle-prompt completion
// ============================================================================

fn idle_params(fake: &FakeDebugger) -> wdbgd::session::OpenParams {
    let mut params = fake.open_params();
    params.prompt_idle = Duration::from_millis(300);
    params
}

#[tokio::test]
async fn test_idle_prompt_completes_without_markers() {
    let fake = FakeDebugger::without_markers();
    let target = Target::dump(fake.dump("crash.dmp")).unwrap();
    let session = Session::open(target, &idle_params(&fake)).await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.startup_output()[0].starts_with("Loading Dump File ["));

    let result = session.run("k", TIMEOUT).await.unwrap();
    assert_eq!(result.status, CommandStatus::Completed);
    assert_eq!(result.lines, vec!["output for k"]);
    assert!(result.elapsed >= Duration::from_millis(250), "{:?}", result.elapsed);
    assert!(result.elapsed < Duration::from_secs(5), "{:?}", result.elapsed);

    session.close().await;
}

#[tokio::test]
async fn test_leftover_prompt_does_not_complete_next_command() {
    let fake = FakeDebugger::without_markers();
    let target = Target::dump(fake.dump("crash.dmp")).unwrap();
    let session = Session::open(target, &idle_params(&fake)).await.unwrap();

    session.run("r", TIMEOUT).await.unwrap();

    // The prompt from "r" is still the tail while "slow" sleeps.
    let result = session.run("slow", TIMEOUT).await.unwrap();
    assert_eq!(result.status, CommandStatus::Completed);
    assert_eq!(result.lines, vec!["slow done"]);
    assert!(result.elapsed >= Duration::from_millis(1500), "{:?}", result.elapsed);

    session.close().await;
}

// ============================================================================
// Closing
// ============================================================================

#[tokio::test]
async fn test_close_stops_process_and_is_idempotent() {
    let fake = FakeDebugger::new();
    let session = open(&fake, "crash.dmp").await;
    let pid = session.pid().unwrap();

    assert!(session.close().await);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!process_exists(pid), "debugger {pid} still running");

    assert!(!session.close().await);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_close_while_busy() {
    let fake = FakeDebugger::new();
    let session = Arc::new(open(&fake, "crash.dmp").await);
    let pid = session.pid().unwrap();

    let running = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run("slow", TIMEOUT).await })
    };
    sleep(Duration::from_millis(200)).await;

    assert!(session.close().await);
    // The in-flight command finishes one way or the other.
    running.await.unwrap().unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn test_attach_target_uses_attach_arguments() {
    let fake = FakeDebugger::new();
    let session = Session::open(Target::attach(4242), &fake.open_params())
        .await
        .unwrap();

    assert_eq!(session.key().as_str(), "attach:4242");
    assert_eq!(session.startup_output(), ["Attaching to process 4242"]);

    let log = std::fs::read_to_string(&fake.spawn_log).unwrap();
    assert!(log.contains("-p 4242"));

    session.close().await;
}
