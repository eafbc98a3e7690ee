//! Runtime tests against the in-memory engine and live upstream servers.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use dockapi_core::{
    CommandSpec, Config, CoreError, ExecInvoker, ExecRequest, LogRequest, RunSpec, Runtime,
};
use dockapi_engine::{
    ContainerEngine, ContainerId, ContainerSnapshot, ContainerStatus, EngineError, FakeEngine,
    ManagedLabels, PortBinding, RestartPolicy,
};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn runtime(engine: &Arc<FakeEngine>) -> Runtime {
    let mut config = Config::default();
    config.readiness.interval_ms = 50;
    config.readiness.attempt_timeout_ms = 500;
    Runtime::new(config, engine.clone()).unwrap()
}

fn web(container_port: i64) -> RunSpec {
    RunSpec {
        image: "echo-server".to_string(),
        container_port,
        ..Default::default()
    }
}

async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(ToString::to_string).collect()
}

// =============================================================================
// Run
// =============================================================================

#[tokio::test]
async fn run_allocates_port_and_reports_running() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);

    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    assert_eq!(container.status, ContainerStatus::Running);
    assert_eq!(container.image, "echo-server:latest");
    assert_eq!(container.container_port, 80);
    assert_ne!(container.host_port, 0);
    assert_eq!(
        rt.registry().binding(&container.id),
        Some(PortBinding {
            host_port: container.host_port,
            container_port: 80
        })
    );
    assert_eq!(container.labels.container_port, 80);
}

#[tokio::test]
async fn run_uses_requested_port_exactly() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);

    let spec = RunSpec {
        host_port: Some(41234),
        ..web(8080)
    };
    let container = rt.run(spec, &CancellationToken::new()).await.unwrap();
    assert_eq!(container.host_port, 41234);
}

#[tokio::test]
async fn run_validates_parameters() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let cancel = CancellationToken::new();

    let out_of_range = RunSpec {
        host_port: Some(70000),
        ..web(80)
    };
    assert!(matches!(
        rt.run(out_of_range, &cancel).await,
        Err(CoreError::PortUnavailable(_))
    ));

    for bad in [
        web(0),
        web(65536),
        RunSpec {
            image: "  ".to_string(),
            ..web(80)
        },
        RunSpec {
            volumes: vec!["/only-one-side".to_string()],
            ..web(80)
        },
        RunSpec {
            auto_remove: true,
            restart_policy: RestartPolicy::UnlessStopped,
            ..web(80)
        },
        RunSpec {
            wait_ready: true,
            wait_timeout: Duration::ZERO,
            ..web(80)
        },
        RunSpec {
            command: Some(CommandSpec::from("sh -c 'unbalanced")),
            ..web(80)
        },
    ] {
        assert!(matches!(
            rt.run(bad, &cancel).await,
            Err(CoreError::BadRequest(_))
        ));
    }

    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn run_rejects_port_recorded_for_another_container() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let cancel = CancellationToken::new();

    let first = rt.run(web(80), &cancel).await.unwrap();
    let clash = RunSpec {
        host_port: Some(i64::from(first.host_port)),
        ..web(80)
    };
    assert!(matches!(
        rt.run(clash, &cancel).await,
        Err(CoreError::Conflict(_))
    ));
    assert_eq!(engine.container_count(), 1);
}

#[tokio::test]
async fn run_rejects_duplicate_name() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let cancel = CancellationToken::new();

    let named = || RunSpec {
        name: Some("api".to_string()),
        ..web(80)
    };
    rt.run(named(), &cancel).await.unwrap();
    assert!(matches!(
        rt.run(named(), &cancel).await,
        Err(CoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn failed_start_removes_created_container() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);

    engine.fail_next_start(EngineError::PortConflict(
        "Bind for 127.0.0.1:40000 failed: port is already allocated".to_string(),
    ));
    let err = rt.run(web(80), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(engine.container_count(), 0);
    assert!(rt.registry().is_empty());
}

// =============================================================================
// Readiness
// =============================================================================

#[tokio::test]
async fn readiness_succeeds_after_failures() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let upstream = spawn_upstream(Router::new().route(
        "/healthz",
        get(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }
        }),
    ))
    .await;

    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let spec = RunSpec {
        host_port: Some(i64::from(upstream.port())),
        wait_ready: true,
        health_path: Some("/healthz".to_string()),
        wait_timeout: Duration::from_secs(5),
        ..web(80)
    };

    let container = rt.run(spec, &CancellationToken::new()).await.unwrap();
    assert_eq!(container.status, ContainerStatus::Running);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn readiness_times_out_and_leaves_container() {
    let upstream = spawn_upstream(Router::new().route(
        "/healthz",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    ))
    .await;

    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let spec = RunSpec {
        host_port: Some(i64::from(upstream.port())),
        wait_ready: true,
        health_path: Some("/healthz".to_string()),
        wait_timeout: Duration::from_secs(1),
        ..web(80)
    };

    let started = Instant::now();
    let err = rt.run(spec, &CancellationToken::new()).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        CoreError::ReadinessTimeout { attempts, .. } => assert!(attempts > 1),
        other => panic!("expected readiness timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(950), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");

    // Not implicitly removed.
    assert_eq!(engine.container_count(), 1);
    let listed = rt.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, ContainerStatus::Running);
}

#[tokio::test]
async fn readiness_against_closed_port_times_out() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    // Nothing listens on a freshly probed port.
    let spec = RunSpec {
        wait_ready: true,
        wait_timeout: Duration::from_millis(300),
        ..web(80)
    };
    assert!(matches!(
        rt.run(spec, &CancellationToken::new()).await,
        Err(CoreError::ReadinessTimeout { .. })
    ));
}

#[tokio::test]
async fn readiness_observes_cancellation() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let spec = RunSpec {
        wait_ready: true,
        wait_timeout: Duration::from_secs(30),
        ..web(80)
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = rt.run(spec, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

// =============================================================================
// Resolution and lifecycle
// =============================================================================

#[tokio::test]
async fn removed_container_is_not_found() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    rt.remove(&container.id, true).await.unwrap();

    assert!(rt.upstream(&container.id).await.unwrap_err().is_not_found());
    assert!(rt.registry().binding(&container.id).is_none());
    let request = ExecRequest::new(&CommandSpec::from("true"), None, BTreeMap::new(), false)
        .unwrap();
    assert!(rt
        .exec(&container.id, &request, &CancellationToken::new())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn remove_running_without_force_conflicts() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    assert!(matches!(
        rt.remove(&container.id, false).await,
        Err(CoreError::Conflict(_))
    ));
    rt.stop(&container.id).await.unwrap();
    rt.remove(&container.id, false).await.unwrap();
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn unmanaged_container_is_not_found() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    engine.insert_snapshot(ContainerSnapshot {
        id: "feedbeef0000".to_string(),
        image: "postgres:16".to_string(),
        state: "running".to_string(),
        ports: vec![PortBinding {
            host_port: 45432,
            container_port: 5432,
        }],
        ..Default::default()
    });

    let id = ContainerId::from("feedbeef0000");
    assert!(rt.inspect(&id).await.unwrap_err().is_not_found());
    assert!(rt.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn resolve_accepts_names() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let spec = RunSpec {
        name: Some("named".to_string()),
        ..web(80)
    };
    let container = rt.run(spec, &CancellationToken::new()).await.unwrap();

    let upstream = rt.upstream(&ContainerId::from("named")).await.unwrap();
    assert_eq!(upstream.container.id, container.id);
    assert_eq!(
        upstream.base_url(),
        format!("http://127.0.0.1:{}", container.host_port)
    );
}

#[tokio::test]
async fn restart_keeps_host_port() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    rt.stop(&container.id).await.unwrap();
    let stopped = rt.inspect(&container.id).await.unwrap();
    assert_eq!(stopped.status, ContainerStatus::Stopped);
    assert_eq!(stopped.host_port, container.host_port);

    let restarted = rt.start(&container.id).await.unwrap();
    assert_eq!(restarted.status, ContainerStatus::Running);
    assert_eq!(restarted.host_port, container.host_port);
}

#[tokio::test]
async fn auto_removed_container_frees_its_port() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let cancel = CancellationToken::new();
    let spec = || RunSpec {
        host_port: Some(18555),
        auto_remove: true,
        ..web(80)
    };

    let first = rt.run(spec(), &cancel).await.unwrap();
    rt.stop(&first.id).await.unwrap();
    assert_eq!(engine.container_count(), 0);
    assert!(rt.registry().binding(&first.id).is_none());

    let second = rt.run(spec(), &cancel).await.unwrap();
    assert_eq!(second.host_port, 18555);
    assert_eq!(rt.registry().owner_of(18555), Some(second.id));
}

#[tokio::test]
async fn externally_removed_container_frees_its_port() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let cancel = CancellationToken::new();

    let pinned = || RunSpec {
        host_port: Some(18556),
        ..web(80)
    };
    let first = rt.run(pinned(), &cancel).await.unwrap();
    engine.remove(&first.id, true).await.unwrap();
    assert_eq!(rt.registry().len(), 1);

    // Automatic allocation sweeps the stale record.
    let auto = rt.run(web(80), &cancel).await.unwrap();
    assert!(rt.registry().binding(&first.id).is_none());
    assert_eq!(rt.registry().len(), 1);

    // The freed port can be requested again.
    let again = rt.run(pinned(), &cancel).await.unwrap();
    assert_eq!(again.host_port, 18556);
    assert_eq!(rt.registry().len(), 2);
    assert!(rt.registry().binding(&auto.id).is_some());
}

#[tokio::test]
async fn release_vanished_keeps_live_bindings() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let cancel = CancellationToken::new();

    let kept = rt.run(web(80), &cancel).await.unwrap();
    let dropped = rt.run(web(81), &cancel).await.unwrap();
    engine.remove(&dropped.id, true).await.unwrap();

    assert_eq!(rt.release_vanished().await.unwrap(), 1);
    assert!(rt.registry().binding(&kept.id).is_some());
    assert!(rt.registry().binding(&dropped.id).is_none());
    assert_eq!(rt.release_vanished().await.unwrap(), 0);
}

#[tokio::test]
async fn reconcile_rebuilds_bindings_from_engine() {
    let engine = Arc::new(FakeEngine::new());
    let labels = ManagedLabels {
        name: Some("survivor".to_string()),
        container_port: 8080,
    };
    engine.insert_snapshot(ContainerSnapshot {
        id: "0123456789abcdef".to_string(),
        image: "app:1".to_string(),
        state: "exited".to_string(),
        labels: labels.to_map(),
        ports: vec![PortBinding {
            host_port: 47000,
            container_port: 8080,
        }],
        ..Default::default()
    });
    engine.insert_snapshot(ContainerSnapshot {
        id: "unrelated".to_string(),
        state: "running".to_string(),
        ..Default::default()
    });

    let rt = runtime(&engine);
    assert_eq!(rt.reconcile().await.unwrap(), 1);
    assert_eq!(
        rt.registry().owner_of(47000),
        Some(ContainerId::from("0123456789abcdef"))
    );

    // The rebuilt binding blocks reuse of the port.
    let clash = RunSpec {
        host_port: Some(47000),
        ..web(80)
    };
    assert!(matches!(
        rt.run(clash, &CancellationToken::new()).await,
        Err(CoreError::Conflict(_))
    ));
}

// =============================================================================
// Exec
// =============================================================================

#[tokio::test]
async fn exec_reports_nonzero_exit_without_failing() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    let request = ExecRequest::new(
        &CommandSpec::Argv(argv(&["false"])),
        None,
        BTreeMap::new(),
        false,
    )
    .unwrap();
    let result = rt
        .exec(&container.id, &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.stderr.as_deref(), Some(""));
}

#[tokio::test]
async fn exec_forms_produce_identical_argv() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();
    let cancel = CancellationToken::new();

    for command in [
        CommandSpec::from("ls -la /"),
        CommandSpec::Argv(argv(&["ls", "-la", "/"])),
    ] {
        let request = ExecRequest::new(&command, None, BTreeMap::new(), false).unwrap();
        rt.exec(&container.id, &request, &cancel).await.unwrap();
    }

    let calls = engine.exec_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    assert_eq!(calls[0], argv(&["ls", "-la", "/"]));
}

#[tokio::test]
async fn exec_in_stopped_container_conflicts() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();
    rt.stop(&container.id).await.unwrap();

    let request =
        ExecRequest::new(&CommandSpec::from("true"), None, BTreeMap::new(), false).unwrap();
    assert!(matches!(
        rt.exec(&container.id, &request, &CancellationToken::new())
            .await,
        Err(CoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn exec_tty_merges_stderr() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    let request =
        ExecRequest::new(&CommandSpec::from("missing-binary"), None, BTreeMap::new(), true)
            .unwrap();
    let result = rt
        .exec(&container.id, &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 127);
    assert!(result.stderr.is_none());
    assert!(result.stdout.contains("executable file not found"));
}

#[tokio::test]
async fn exec_mechanism_failure_is_exec_failed() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    let invoker = ExecInvoker::new(engine.clone());
    engine.set_unavailable(true);
    let request =
        ExecRequest::new(&CommandSpec::from("true"), None, BTreeMap::new(), false).unwrap();
    assert!(matches!(
        invoker.exec(&container, &request).await,
        Err(CoreError::ExecFailed(_))
    ));
}

#[tokio::test]
async fn exec_observes_cancellation() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    let cancel = rt.request_token();
    let request =
        ExecRequest::new(&CommandSpec::from("sleep 30"), None, BTreeMap::new(), false).unwrap();
    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        rt.shutdown();
    };
    let (result, ()) = tokio::join!(rt.exec(&container.id, &request, &cancel), shutdown);
    assert!(matches!(result, Err(CoreError::Cancelled(_))));
}

// =============================================================================
// Logs
// =============================================================================

#[tokio::test]
async fn logs_tail_is_finite() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();
    for line in ["a\n", "b\n", "c\n"] {
        engine.push_log(&container.id, line);
    }

    let feed = rt
        .logs(
            &container.id,
            LogRequest {
                tail: Some(2),
                follow: false,
            },
        )
        .await
        .unwrap();
    let chunks: Vec<Bytes> = feed.map(Result::unwrap).collect().await;
    assert_eq!(chunks, vec![Bytes::from("b\n"), Bytes::from("c\n")]);
}

#[tokio::test]
async fn follow_ends_when_container_stops() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    let container = rt.run(web(80), &CancellationToken::new()).await.unwrap();

    let mut feed = rt
        .logs(
            &container.id,
            LogRequest {
                tail: None,
                follow: true,
            },
        )
        .await
        .unwrap();
    assert!(feed.is_follow());

    engine.push_log(&container.id, "live\n");
    assert_eq!(feed.next().await.unwrap().unwrap(), Bytes::from("live\n"));

    rt.stop(&container.id).await.unwrap();
    assert!(feed.next().await.is_none());
}

#[tokio::test]
async fn logs_for_unknown_container_is_not_found() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    assert!(rt
        .logs(&ContainerId::from("nope"), LogRequest::default())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn engine_outage_surfaces_as_engine_error() {
    let engine = Arc::new(FakeEngine::new());
    let rt = runtime(&engine);
    engine.set_unavailable(true);
    assert!(matches!(rt.ping().await, Err(CoreError::Engine(_))));
    assert!(matches!(rt.list().await, Err(CoreError::Engine(_))));
    engine.set_unavailable(false);
    rt.ping().await.unwrap();
    assert!(engine.list_images().await.unwrap().is_empty());
}
