//! Tests for the process supervisor using real short-lived children.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use super::control;
use super::*;
use crate::config::{ProbeKind, ProbeSpec, ServiceDefinition, SupervisorSettings};
use crate::error::KanshiError;
use crate::registry::ServiceRegistry;

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        graceful_timeout_seconds: 2,
        ready_settle_ms: 150,
        ready_poll_ms: 50,
        ..Default::default()
    }
}

fn svc(name: &str, command: &str, deps: &[&str]) -> ServiceDefinition {
    let mut def = ServiceDefinition::new(name, command);
    def.depends_on = deps.iter().map(|d| d.to_string()).collect();
    def.start_timeout_seconds = 5;
    def
}

fn supervisor(defs: Vec<ServiceDefinition>) -> Arc<ProcessSupervisor> {
    let registry = Arc::new(ServiceRegistry::new(defs).unwrap());
    Arc::new(ProcessSupervisor::new(registry, settings()).unwrap())
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn tcp_readiness(port: u16) -> ProbeSpec {
    ProbeSpec {
        kind: ProbeKind::TcpConnect,
        target: Some(format!("127.0.0.1:{}", port)),
        timeout_ms: 100,
    }
}

#[tokio::test]
async fn test_start_all_fan_out() {
    let sup = supervisor(vec![
        svc("b", "sleep 60", &["a"]),
        svc("c", "sleep 60", &["a"]),
        svc("a", "sleep 60", &[]),
    ]);

    let report = sup.start_all(false).await.unwrap();
    assert_eq!(report.started, vec!["a", "b", "c"]);
    assert!(report.is_complete());

    for name in ["a", "b", "c"] {
        assert_eq!(sup.state_of(name), Some(ProcessState::Running));
    }

    let a = sup.snapshot("a").unwrap();
    let b = sup.snapshot("b").unwrap();
    let c = sup.snapshot("c").unwrap();
    assert!(a.started_at.unwrap() <= b.started_at.unwrap());
    assert!(a.started_at.unwrap() <= c.started_at.unwrap());
    assert_ne!(b.pid, c.pid);

    let stop = sup.stop_all().await;
    let order: Vec<&str> = stop.stopped.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order, vec!["c", "b", "a"]);
    assert!(stop.is_clean());
    assert!(sup.state_of("a").is_none());
}

#[tokio::test]
async fn test_start_one_is_idempotent_while_running() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[])]);
    let def = sup.registry().get("a").unwrap().clone();

    sup.start_one(&def).await.unwrap();
    let pid = sup.snapshot("a").unwrap().pid;
    sup.start_one(&def).await.unwrap();
    assert_eq!(sup.snapshot("a").unwrap().pid, pid);

    sup.stop_all().await;
}

#[tokio::test]
async fn test_dependency_must_be_running() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[]), svc("b", "sleep 60", &["a"])]);
    let b = sup.registry().get("b").unwrap().clone();

    let err = sup.start_one(&b).await.unwrap_err();
    assert!(matches!(
        err,
        KanshiError::DependencyNotRunning { ref dependency, .. } if dependency == "a"
    ));
    assert!(sup.state_of("b").is_none());
}

#[tokio::test]
async fn test_spawn_failure_rolls_back() {
    let sup = supervisor(vec![
        svc("a", "sleep 60", &[]),
        svc("b", "/nonexistent/kanshi-test-binary", &[]),
        svc("c", "sleep 60", &[]),
    ]);

    let err = sup.start_all(false).await.unwrap_err();
    match err {
        KanshiError::StartFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].service, "b");
            assert!(failures[0].cause.contains("spawn"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Rolled back, and c was never attempted.
    assert!(sup.with_table(|table| table.is_empty()));
}

#[tokio::test]
async fn test_best_effort_reports_partial_success() {
    let sup = supervisor(vec![
        svc("a", "sleep 60", &[]),
        svc("b", "/nonexistent/kanshi-test-binary", &[]),
        svc("c", "sleep 60", &["b"]),
    ]);

    let report = sup.start_all(true).await.unwrap();
    assert_eq!(report.started, vec!["a"]);
    let failed: Vec<&str> = report.failures.iter().map(|f| f.service.as_str()).collect();
    assert_eq!(failed, vec!["b", "c"]);
    assert!(report.failures[1].cause.contains("dependency 'b'"));

    assert_eq!(sup.state_of("a"), Some(ProcessState::Running));
    assert_eq!(sup.state_of("b"), Some(ProcessState::Failed));
    assert!(sup.state_of("c").is_none());

    sup.stop_all().await;
}

#[tokio::test]
async fn test_exit_during_readiness_captures_output() {
    let sup = supervisor(vec![svc(
        "worker",
        "/bin/sh -c 'echo boom >&2; exit 3'",
        &[],
    )]);
    let def = sup.registry().get("worker").unwrap().clone();

    let err = sup.start_one(&def).await.unwrap_err();
    assert!(matches!(err, KanshiError::ServiceExited { .. }));
    assert!(err.to_string().contains("exit status: 3"));
    assert_eq!(err.output(), &["boom".to_string()]);

    let snapshot = sup.snapshot("worker").unwrap();
    assert_eq!(snapshot.state, ProcessState::Failed);
    assert!(snapshot.last_error.unwrap().contains("worker"));
}

#[tokio::test]
async fn test_readiness_timeout_kills_process() {
    let port = free_port().await;
    let mut def = svc("api", "sleep 60", &[]);
    def.start_timeout_seconds = 1;
    def.readiness = Some(tcp_readiness(port));
    let sup = supervisor(vec![def.clone()]);

    let err = sup.start_one(&def).await.unwrap_err();
    assert!(matches!(err, KanshiError::ReadinessTimeout { seconds: 1, .. }));

    assert_eq!(sup.state_of("api"), Some(ProcessState::Failed));
    let alive = sup.with_entry("api", |e| e.child.as_ref().map(ChildProcess::is_alive));
    assert_eq!(alive, Some(Some(false)));
}

#[tokio::test]
async fn test_tcp_readiness_succeeds() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut def = svc("api", "sleep 60", &[]);
    def.readiness = Some(tcp_readiness(port));
    let sup = supervisor(vec![def.clone()]);

    sup.start_one(&def).await.unwrap();
    assert_eq!(sup.state_of("api"), Some(ProcessState::Running));

    sup.stop_all().await;
}

#[tokio::test]
async fn test_stop_one_twice_is_noop() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[]), svc("b", "sleep 60", &["a"])]);
    sup.start_all(false).await.unwrap();

    assert_eq!(sup.stop_one("b", None).await, StopOutcome::Graceful);
    assert_eq!(sup.stop_one("b", None).await, StopOutcome::AlreadyStopped);
    assert!(sup.state_of("b").is_none());
    assert_eq!(sup.snapshot("b").unwrap().state, ProcessState::Stopped);

    assert_eq!(sup.stop_one("ghost", None).await, StopOutcome::AlreadyStopped);
    assert_eq!(sup.state_of("a"), Some(ProcessState::Running));

    sup.stop_all().await;
}

#[tokio::test]
async fn test_ignored_sigterm_escalates_to_kill() {
    let sup = supervisor(vec![svc(
        "stubborn",
        "/bin/sh -c 'trap \"\" TERM; while true; do sleep 0.05; done'",
        &[],
    )]);
    sup.start_all(false).await.unwrap();

    let outcome = sup
        .stop_one("stubborn", Some(Duration::from_millis(300)))
        .await;
    assert_eq!(outcome, StopOutcome::Forced);
    assert!(sup.state_of("stubborn").is_none());
}

#[tokio::test]
async fn test_concurrent_stop_all_single_teardown() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[]), svc("b", "sleep 60", &["a"])]);
    sup.start_all(false).await.unwrap();

    let (first, second) = tokio::join!(sup.stop_all(), sup.stop_all());
    let total: Vec<_> = first.stopped.iter().chain(second.stopped.iter()).collect();
    assert_eq!(total.len(), 2);
    assert!(total.iter().all(|(_, outcome)| *outcome == StopOutcome::Graceful));
}

#[tokio::test]
async fn test_shutdown_blocks_new_starts() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[])]);
    let def = sup.registry().get("a").unwrap().clone();

    sup.begin_shutdown();
    assert!(sup.is_shutting_down());
    let err = sup.start_one(&def).await.unwrap_err();
    assert!(matches!(err, KanshiError::ShuttingDown));
    assert!(sup.state_of("a").is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_pending_readiness() {
    let port = free_port().await;
    let mut def = svc("api", "sleep 60", &[]);
    def.start_timeout_seconds = 30;
    def.readiness = Some(tcp_readiness(port));
    let sup = supervisor(vec![def.clone()]);

    let task = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.start_one(&def).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    sup.begin_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(KanshiError::Cancelled { .. })));
    assert!(sup.state_of("api").is_none());
}

#[tokio::test]
async fn test_restart_keeps_accounting() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[])]);
    sup.start_all(false).await.unwrap();
    let before = sup.snapshot("a").unwrap();

    sup.with_entry("a", |entry| {
        entry.restart_count = 1;
        entry.consecutive_failures = 2;
    });
    sup.restart_one("a").await.unwrap();

    let after = sup.snapshot("a").unwrap();
    assert_eq!(after.state, ProcessState::Running);
    assert_ne!(after.pid, before.pid);
    assert_eq!(after.restart_count, 1);
    assert_eq!(after.consecutive_failures, 0);

    sup.stop_all().await;
}

#[tokio::test]
async fn test_health_restart_after_stop_does_not_revive() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[])]);
    let (handle, control_loop) = control::channel(sup.clone());
    let task = tokio::spawn(control_loop.run());
    sup.start_all(false).await.unwrap();

    sup.with_entry("a", |entry| entry.transition(ProcessState::Restarting));
    // The operator's stop is queued ahead of the health restart.
    let stop = handle.stop("a");
    let recover = handle.recover("a");
    let (stopped, recovered) = tokio::join!(stop, recover);

    assert_eq!(stopped.unwrap(), StopOutcome::Graceful);
    assert!(!recovered.unwrap());
    assert!(sup.state_of("a").is_none());
    assert_eq!(sup.snapshot("a").unwrap().state, ProcessState::Stopped);

    // An operator restart still starts a stopped service.
    handle.restart("a").await.unwrap();
    assert_eq!(sup.state_of("a"), Some(ProcessState::Running));

    // A Running service is left alone by a stale health restart.
    let pid = sup.snapshot("a").unwrap().pid;
    assert!(!sup.recover_one("a").await.unwrap());
    assert_eq!(sup.snapshot("a").unwrap().pid, pid);

    sup.begin_shutdown();
    sup.stop_all().await;
    let _ = task.await;
}

#[tokio::test]
async fn test_snapshots_cover_every_service() {
    let mut disabled = svc("batch", "sleep 60", &[]);
    disabled.enabled = false;
    let sup = supervisor(vec![svc("a", "sleep 60", &[]), disabled]);
    sup.start_all(false).await.unwrap();

    let snapshots = sup.snapshots();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].state, ProcessState::Running);
    assert!(snapshots[0].pid.is_some());
    assert_eq!(snapshots[1].state, ProcessState::Stopped);
    assert!(sup.snapshot("ghost").is_none());

    sup.stop_all().await;
}

#[tokio::test]
async fn test_control_loop_commands() {
    let sup = supervisor(vec![svc("a", "sleep 60", &[])]);
    let (handle, control_loop) = control::channel(sup.clone());
    let task = tokio::spawn(control_loop.run());

    handle.start("a").await.unwrap();
    assert_eq!(sup.state_of("a"), Some(ProcessState::Running));

    handle.restart("a").await.unwrap();
    assert_eq!(sup.state_of("a"), Some(ProcessState::Running));

    assert_eq!(handle.stop("a").await.unwrap(), StopOutcome::Graceful);
    assert_eq!(handle.stop("a").await.unwrap(), StopOutcome::AlreadyStopped);

    let err = handle.start("ghost").await.unwrap_err();
    assert!(matches!(err, KanshiError::ServiceNotFound { .. }));

    sup.begin_shutdown();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        handle.start("a").await,
        Err(KanshiError::ShuttingDown)
    ));
}
