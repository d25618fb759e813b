//! Task-status WebSocket monitor against in-process servers.

mod support;

use futures::{SinkExt, StreamExt};
use notes_stream::config::WebSocketConfig;
use notes_stream::ws::{watch_task, ConnectionState, MonitorEvent, MonitorEvents, TaskMonitor};
use notes_stream::Error;
use serde_json::json;
use std::time::Duration;
use support::{await_close, recv_json, send_json, ws_server};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

fn fast_config(attempts: u32) -> WebSocketConfig {
    WebSocketConfig {
        reconnect_attempts: attempts,
        reconnect_delay_ms: 10,
        max_reconnect_delay_ms: 40,
        heartbeat_interval_ms: 0,
        message_queue_size: 2,
    }
}

fn monitor_at(addr: std::net::SocketAddr, config: WebSocketConfig) -> (TaskMonitor, MonitorEvents) {
    let url = Url::parse(&format!("ws://{}/api/v1/ws/task_status/t1", addr)).unwrap();
    TaskMonitor::new("t1", url, config)
}

async fn next_event(events: &mut MonitorEvents) -> MonitorEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a monitor event")
        .expect("monitor event channel closed")
}

async fn closed_port() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_success_closes_normally() {
    let (codes_tx, mut codes) = mpsc::unbounded_channel();
    let server = ws_server(move |_, mut ws| {
        let codes_tx = codes_tx.clone();
        async move {
            let progress = json!({
                "state": "PROGRESS",
                "current": 1,
                "total": 4,
                "status": "Drafting"
            });
            let success = json!({"state": "SUCCESS", "result": {"quiz_id": 5, "questions": []}});
            send_json(&mut ws, json!({"state": "STARTED"})).await;
            send_json(&mut ws, progress).await;
            send_json(&mut ws, success).await;
            let _ = codes_tx.send(await_close(&mut ws).await);
        }
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    let mut progress = Vec::new();
    let result = watch_task(&monitor, &mut events, |msg| progress.push(msg.progress()))
        .await
        .unwrap();

    assert_eq!(result["quiz_id"], 5);
    assert_eq!(progress, vec![Some(10), Some(25), Some(100)]);
    assert_eq!(codes.recv().await.unwrap(), Some(1000));
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_task_failure_closes_with_4000_without_reconnect() {
    let (codes_tx, mut codes) = mpsc::unbounded_channel();
    let server = ws_server(move |_, mut ws| {
        let codes_tx = codes_tx.clone();
        async move {
            let progress = json!({"state": "PROGRESS", "current": 1, "total": 2});
            let failure = json!({"state": "FAILURE", "status": "model unavailable"});
            send_json(&mut ws, progress).await;
            send_json(&mut ws, failure).await;
            let _ = codes_tx.send(await_close(&mut ws).await);
        }
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    let mut progress = Vec::new();
    let err = watch_task(&monitor, &mut events, |msg| progress.push(msg.progress()))
        .await
        .unwrap_err();

    match err {
        Error::TaskFailed(message) => assert_eq!(message, "model unavailable"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(progress, vec![Some(50), None]);
    assert_eq!(codes.recv().await.unwrap(), Some(4000));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);
    assert_eq!(monitor.state(), ConnectionState::Closed);
    assert!(!monitor.reconnection_info().is_reconnecting);
}

#[tokio::test]
async fn test_success_with_result_error_is_a_failure() {
    let server = ws_server(|_, mut ws| async move {
        let success = json!({"state": "SUCCESS", "result": {"error": "empty note"}});
        send_json(&mut ws, success).await;
        let _ = await_close(&mut ws).await;
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    let err = watch_task(&monitor, &mut events, |_| {}).await.unwrap_err();
    assert!(matches!(err, Error::TaskFailed(ref m) if m == "Generation failed: empty note"));
}

#[tokio::test]
async fn test_ping_is_answered_and_not_forwarded() {
    let server = ws_server(|_, mut ws| async move {
        send_json(&mut ws, json!({"type": "ping"})).await;
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply, json!({"type": "pong"}));
        send_json(&mut ws, json!({"type": "pong"})).await;
        send_json(&mut ws, json!({"state": "PENDING"})).await;
        let _ = await_close(&mut ws).await;
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    monitor.connect();
    assert_eq!(next_event(&mut events).await, MonitorEvent::Open);
    assert_eq!(
        next_event(&mut events).await,
        MonitorEvent::Message(json!({"state": "PENDING"}))
    );
    monitor.close(1000, "done");
}

#[tokio::test]
async fn test_binary_frames_take_the_text_path() {
    let server = ws_server(|_, mut ws| async move {
        ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
        let ping = json!({"type": "ping"}).to_string().into_bytes();
        ws.send(Message::Binary(ping)).await.unwrap();
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply, json!({"type": "pong"}));
        ws.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
        let pending = json!({"state": "PENDING"}).to_string().into_bytes();
        ws.send(Message::Binary(pending)).await.unwrap();
        let _ = await_close(&mut ws).await;
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    monitor.connect();
    assert_eq!(next_event(&mut events).await, MonitorEvent::Open);
    assert_eq!(
        next_event(&mut events).await,
        MonitorEvent::Message(json!({"state": "PENDING"}))
    );
    assert_eq!(monitor.state(), ConnectionState::Open);
    monitor.close(1000, "done");
}

#[tokio::test]
async fn test_heartbeat_sends_ping() {
    let (tx, mut pings) = mpsc::unbounded_channel();
    let server = ws_server(move |_, mut ws| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(recv_json(&mut ws).await);
            let _ = await_close(&mut ws).await;
        }
    })
    .await;

    let config = WebSocketConfig {
        heartbeat_interval_ms: 20,
        ..fast_config(3)
    };
    let (monitor, mut events) = monitor_at(server.addr, config);
    monitor.connect();
    assert_eq!(next_event(&mut events).await, MonitorEvent::Open);
    let ping = tokio::time::timeout(Duration::from_secs(2), pings.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ping, json!({"type": "ping"}));
    monitor.close(1000, "done");
}

#[tokio::test]
async fn test_queued_messages_flush_on_open() {
    let (tx, mut received) = mpsc::unbounded_channel();
    let server = ws_server(move |_, mut ws| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(recv_json(&mut ws).await);
            let _ = tx.send(recv_json(&mut ws).await);
            let _ = await_close(&mut ws).await;
        }
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    assert!(!monitor.send(&json!({"n": 1})));
    assert!(!monitor.send(&json!({"n": 2})));
    assert!(!monitor.send(&json!({"n": 3})));
    // Capacity 2: the oldest message was dropped.
    assert_eq!(monitor.queued(), 2);

    monitor.connect();
    assert_eq!(next_event(&mut events).await, MonitorEvent::Open);
    assert_eq!(received.recv().await.unwrap(), json!({"n": 2}));
    assert_eq!(received.recv().await.unwrap(), json!({"n": 3}));
    assert_eq!(monitor.queued(), 0);
    monitor.close(1000, "done");
}

#[tokio::test]
async fn test_abnormal_drop_reconnects() {
    let server = ws_server(|idx, mut ws| async move {
        if idx == 0 {
            // Drop the socket without a close handshake.
            drop(ws);
            return;
        }
        send_json(&mut ws, json!({"state": "SUCCESS", "result": {"ok": true}})).await;
        let _ = await_close(&mut ws).await;
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    monitor.connect();

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let done = matches!(event, MonitorEvent::Message(_));
        seen.push(event);
        if done {
            break;
        }
    }

    assert_eq!(seen[0], MonitorEvent::Open);
    let dropped = seen
        .iter()
        .any(|e| matches!(e, MonitorEvent::Closed { code: 1006, .. }));
    assert!(dropped);
    let first_retry = MonitorEvent::Reconnecting {
        attempt: 1,
        delay: Duration::from_millis(10),
    };
    assert!(seen.contains(&first_retry));
    assert_eq!(seen.iter().filter(|e| **e == MonitorEvent::Open).count(), 2);
    assert_eq!(server.connection_count(), 2);
    // A successful open resets the counter.
    assert_eq!(monitor.reconnection_info().count, 0);
    monitor.close(1000, "done");
}

#[tokio::test]
async fn test_normal_server_close_does_not_reconnect() {
    let server = ws_server(|_, mut ws| async move {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        let _ = ws.close(Some(frame)).await;
        while ws.next().await.is_some() {}
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    monitor.connect();
    assert_eq!(next_event(&mut events).await, MonitorEvent::Open);
    assert_eq!(
        next_event(&mut events).await,
        MonitorEvent::Closed {
            code: 1000,
            reason: "bye".into(),
        }
    );
    let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(quiet.is_err());
    assert_eq!(server.connection_count(), 1);
    assert_eq!(monitor.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_reconnect_budget_then_permanent_failure() {
    let addr = closed_port().await;
    let (monitor, mut events) = monitor_at(addr, fast_config(3));
    monitor.connect();

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let done = matches!(event, MonitorEvent::PermanentFailure { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Reconnecting { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(40),
        ]
    );
    let errors = seen
        .iter()
        .filter(|e| matches!(e, MonitorEvent::Error(_)))
        .count();
    assert_eq!(errors, 4);
    assert_eq!(
        seen.last(),
        Some(&MonitorEvent::PermanentFailure { attempts: 3 })
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    let info = monitor.reconnection_info();
    assert_eq!(info.count, 3);
    assert_eq!(info.max_attempts, 3);
    assert!(!info.is_reconnecting);
    assert_eq!(monitor.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_watch_task_reports_exhausted_reconnects() {
    let addr = closed_port().await;
    let (monitor, mut events) = monitor_at(addr, fast_config(2));
    let err = watch_task(&monitor, &mut events, |_| {}).await.unwrap_err();
    assert!(matches!(err, Error::ReconnectExhausted { attempts: 2 }));
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    let addr = closed_port().await;
    let config = WebSocketConfig {
        reconnect_delay_ms: 300,
        max_reconnect_delay_ms: 1000,
        ..fast_config(3)
    };
    let (monitor, mut events) = monitor_at(addr, config);
    monitor.connect();

    loop {
        if let MonitorEvent::Reconnecting { attempt, .. } = next_event(&mut events).await {
            assert_eq!(attempt, 1);
            break;
        }
    }
    monitor.close(1000, "user left");

    let quiet = tokio::time::timeout(Duration::from_millis(500), events.recv()).await;
    assert!(quiet.is_err());
    assert_eq!(monitor.state(), ConnectionState::Closed);
    assert!(!monitor.reconnection_info().is_reconnecting);
}

#[tokio::test]
async fn test_manual_reconnect_opens_fresh_connection() {
    let (codes_tx, mut codes) = mpsc::unbounded_channel();
    let server = ws_server(move |idx, mut ws| {
        let codes_tx = codes_tx.clone();
        async move {
            if idx == 0 {
                let _ = codes_tx.send(await_close(&mut ws).await);
                return;
            }
            let pending = Message::Text(json!({"state": "PENDING"}).to_string());
            let _ = ws.send(pending).await;
            let _ = await_close(&mut ws).await;
        }
    })
    .await;

    let (monitor, mut events) = monitor_at(server.addr, fast_config(3));
    monitor.connect();
    monitor.connect();
    assert_eq!(next_event(&mut events).await, MonitorEvent::Open);
    assert_eq!(server.connection_count(), 1);

    monitor.reconnect();
    assert_eq!(next_event(&mut events).await, MonitorEvent::Open);
    assert_eq!(
        next_event(&mut events).await,
        MonitorEvent::Message(json!({"state": "PENDING"}))
    );
    assert_eq!(codes.recv().await.unwrap(), Some(1000));
    assert_eq!(server.connection_count(), 2);
    monitor.close(1000, "done");
}
