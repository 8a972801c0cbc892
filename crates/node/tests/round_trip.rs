//! Main and auxiliary nodes talking over loopback

use std::time::Duration;

use gateway_core::protocol::{GatewayRole, GatewayStatus, TaskOutcome, TaskResultBody};
use gateway_core::{GatewayConfig, GatewayErrorCode, GatewayEvent, GatewayFilter, TaskState};
use gateway_node::{GatewayRuntime, TaskRequest};
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn main_config(management_port: u16) -> GatewayConfig {
    let mut config = GatewayConfig::main("gw-main");
    config.port = 0;
    config.management_port = Some(management_port);
    config
}

fn auxiliary_config(gateway_id: &str, management_port: u16) -> GatewayConfig {
    let mut config = GatewayConfig::auxiliary(
        gateway_id,
        format!("ws://127.0.0.1:{}/ws", management_port),
    );
    config.main_gateway_token = Some("test-token".to_string());
    config.reconnect_delay = Duration::from_millis(100);
    config
}

async fn start_main(management_port: u16) -> (GatewayRuntime, broadcast::Receiver<GatewayEvent>, u16) {
    let runtime = GatewayRuntime::new(main_config(management_port)).unwrap();
    let events = runtime.subscribe();
    runtime.start().await.unwrap();
    let port = runtime.management_addr().await.unwrap().port();
    (runtime, events, port)
}

async fn start_auxiliary(
    gateway_id: &str,
    management_port: u16,
) -> (GatewayRuntime, broadcast::Receiver<GatewayEvent>) {
    let runtime = GatewayRuntime::new(auxiliary_config(gateway_id, management_port)).unwrap();
    let events = runtime.subscribe();
    runtime.start().await.unwrap();
    (runtime, events)
}

/// Wait for the next event matching `pred`, skipping everything else
async fn wait_for<F>(events: &mut broadcast::Receiver<GatewayEvent>, mut pred: F) -> GatewayEvent
where
    F: FnMut(&GatewayEvent) -> bool,
{
    loop {
        match timeout(EVENT_TIMEOUT, events.recv()).await {
            Ok(Ok(event)) if pred(&event) => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => panic!("Event channel failed: {e}"),
            Err(_) => panic!("Timeout waiting for event"),
        }
    }
}

async fn wait_for_name(events: &mut broadcast::Receiver<GatewayEvent>, name: &str) -> GatewayEvent {
    wait_for(events, |event| event.name() == name).await
}

async fn wait_for_status(events: &mut broadcast::Receiver<GatewayEvent>, status: GatewayStatus) {
    wait_for(events, |event| {
        matches!(event, GatewayEvent::StatusChange { to, .. } if *to == status)
    })
    .await;
}

#[tokio::test]
async fn dispatched_task_completes_round_trip() {
    let (main, mut main_events, port) = start_main(0).await;
    let (aux, mut aux_events) = start_auxiliary("gw-aux-1", port).await;

    wait_for_name(&mut main_events, "gateway:register").await;
    wait_for_name(&mut aux_events, "gateway:registered").await;

    let gateways = main
        .connected_gateways(&GatewayFilter::role(GatewayRole::Auxiliary))
        .await
        .unwrap();
    assert_eq!(gateways.len(), 1);
    assert_eq!(gateways[0].gateway_id, "gw-aux-1");

    main.dispatch_task(
        "gw-aux-1",
        &TaskRequest::new("task-1", "dev", "code-review")
            .with_params(serde_json::json!({ "repo": "migration" })),
    )
    .await
    .unwrap();

    match wait_for_name(&mut aux_events, "task:received").await {
        GatewayEvent::TaskReceived {
            task_id,
            agent_id,
            command,
            params,
        } => {
            assert_eq!(task_id, "task-1");
            assert_eq!(agent_id, "dev");
            assert_eq!(command, "code-review");
            assert_eq!(params, Some(serde_json::json!({ "repo": "migration" })));
        }
        other => panic!("Expected TaskReceived, got {other:?}"),
    }
    wait_for_name(&mut main_events, "task:ack").await;

    let result = TaskResultBody {
        output: Some("Review complete".to_string()),
        duration: Some(1200),
        ..Default::default()
    };
    aux.send_task_result("task-1", TaskOutcome::Success, result.clone())
        .await
        .unwrap();

    wait_for_name(&mut main_events, "task:result").await;
    wait_for_name(&mut aux_events, "task:result:ack").await;

    let record = main.task("task-1").await.unwrap().unwrap();
    assert_eq!(record.status, TaskState::Completed);
    assert_eq!(record.result, Some(result));
    assert!(record.completed_at.is_some());
    assert_eq!(main.status().await.pending_tasks, 0);

    aux.stop().await;
    main.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_every_auxiliary() {
    let (main, mut main_events, port) = start_main(0).await;
    let (aux_a, mut events_a) = start_auxiliary("gw-aux-a", port).await;
    let (aux_b, mut events_b) = start_auxiliary("gw-aux-b", port).await;
    wait_for_name(&mut events_a, "gateway:registered").await;
    wait_for_name(&mut events_b, "gateway:registered").await;
    wait_for_name(&mut main_events, "gateway:register").await;
    wait_for_name(&mut main_events, "gateway:register").await;

    let outcomes = main
        .broadcast_task(&TaskRequest::new("report", "main", "status-report"))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    match wait_for_name(&mut events_a, "task:received").await {
        GatewayEvent::TaskReceived { task_id, .. } => assert_eq!(task_id, "report:gw-aux-a"),
        other => panic!("Expected TaskReceived, got {other:?}"),
    }
    match wait_for_name(&mut events_b, "task:received").await {
        GatewayEvent::TaskReceived { task_id, .. } => assert_eq!(task_id, "report:gw-aux-b"),
        other => panic!("Expected TaskReceived, got {other:?}"),
    }

    aux_a.stop().await;
    aux_b.stop().await;
    main.stop().await;
}

#[tokio::test]
async fn stopping_auxiliary_emits_one_disconnect() {
    let (main, mut main_events, port) = start_main(0).await;
    let (aux, mut aux_events) = start_auxiliary("gw-aux-1", port).await;
    wait_for_name(&mut aux_events, "gateway:registered").await;
    wait_for_name(&mut main_events, "gateway:register").await;

    aux.stop().await;

    match wait_for_name(&mut main_events, "gateway:disconnect").await {
        GatewayEvent::GatewayDisconnect { gateway_id } => assert_eq!(gateway_id, "gw-aux-1"),
        other => panic!("Expected GatewayDisconnect, got {other:?}"),
    }
    assert!(main
        .connected_gateways(&GatewayFilter::default())
        .await
        .unwrap()
        .is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = main_events.try_recv() {
        assert_ne!(event.name(), "gateway:disconnect");
    }

    main.stop().await;
}

#[tokio::test]
async fn auxiliary_retries_until_stopped() {
    let (main, _main_events, port) = start_main(0).await;
    let (aux, mut aux_events) = start_auxiliary("gw-aux-1", port).await;
    wait_for_name(&mut aux_events, "gateway:registered").await;

    main.stop().await;

    let delay = auxiliary_config("gw-aux-1", port).reconnect_delay;
    wait_for_status(&mut aux_events, GatewayStatus::Offline).await;
    let mut offline_at = Instant::now();
    for _ in 0..3 {
        wait_for_status(&mut aux_events, GatewayStatus::Connecting).await;
        assert!(
            offline_at.elapsed() >= delay,
            "Reconnect attempted {:?} after going offline",
            offline_at.elapsed()
        );
        wait_for_status(&mut aux_events, GatewayStatus::Offline).await;
        offline_at = Instant::now();
    }

    aux.stop().await;
    assert_eq!(aux.current_status(), GatewayStatus::Offline);

    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = aux_events.try_recv() {
        assert!(
            !matches!(
                event,
                GatewayEvent::StatusChange {
                    to: GatewayStatus::Connecting,
                    ..
                }
            ),
            "Reconnect attempted after stop"
        );
    }
}

#[tokio::test]
async fn auxiliary_reregisters_after_main_restarts() {
    let (main, _main_events, port) = start_main(0).await;
    let (aux, mut aux_events) = start_auxiliary("gw-aux-1", port).await;
    wait_for_name(&mut aux_events, "gateway:registered").await;

    main.stop().await;
    wait_for_status(&mut aux_events, GatewayStatus::Offline).await;

    let (restarted, mut restarted_events, _) = start_main(port).await;
    wait_for_name(&mut aux_events, "gateway:registered").await;
    wait_for_name(&mut restarted_events, "gateway:register").await;
    assert_eq!(restarted.status().await.connected_gateways, 1);

    aux.stop().await;
    restarted.stop().await;
}

#[tokio::test]
async fn registration_outside_allowlist_is_refused() {
    let mut config = main_config(0);
    config.allowed_gateway_ips = vec!["10.9.9.9".to_string()];
    let main = GatewayRuntime::new(config).unwrap();
    let mut main_events = main.subscribe();
    main.start().await.unwrap();
    let port = main.management_addr().await.unwrap().port();

    let (aux, mut aux_events) = start_auxiliary("gw-aux-1", port).await;

    match wait_for_name(&mut aux_events, "error").await {
        GatewayEvent::Error { code, .. } => assert_eq!(code, GatewayErrorCode::RegisterFailed),
        other => panic!("Expected Error, got {other:?}"),
    }
    match wait_for_name(&mut main_events, "error").await {
        GatewayEvent::Error { code, .. } => assert_eq!(code, GatewayErrorCode::Unauthorized),
        other => panic!("Expected Error, got {other:?}"),
    }
    wait_for_status(&mut aux_events, GatewayStatus::Offline).await;
    assert_eq!(main.status().await.connected_gateways, 0);

    aux.stop().await;
    main.stop().await;
}
