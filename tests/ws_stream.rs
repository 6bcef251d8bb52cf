//! Viewer sockets served by the real router over TCP
#![cfg(feature = "server")]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use portfolio_flow::api::{router, AppState};
use portfolio_flow::broadcast::Broadcaster;
use portfolio_flow::store::VisualizationStore;
use portfolio_flow::upstream::{ConnectionCheck, FlowData, FlowSource};
use portfolio_flow::{CreateVisualization, UpstreamError, VisualizationService};

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct FakeSource {
    result: Mutex<Result<FlowData, UpstreamError>>,
}

#[async_trait]
impl FlowSource for FakeSource {
    async fn flow_data(&self) -> Result<FlowData, UpstreamError> {
        self.result.lock().unwrap().clone()
    }

    async fn check_connection(&self) -> ConnectionCheck {
        ConnectionCheck::ok()
    }
}

fn sample() -> FlowData {
    serde_json::from_value(json!({
        "portfolios": [{"Id": 1, "Name": "Cloud"}],
        "epics": [{"Id": 10, "Name": "Migration", "Portfolio": {"Id": 1}}],
        "userStories": [{"Id": 100, "Epic": {"Id": 10}, "Team": {"Id": 50}, "StoryPoints": 20}],
        "teams": [{"Id": 50, "Name": "Alpha", "HourlyRate": 250}]
    }))
    .unwrap()
}

struct Running {
    addr: SocketAddr,
    service: Arc<VisualizationService>,
    broadcaster: Arc<Broadcaster>,
}

async fn spawn_server() -> Running {
    let broadcaster = Arc::new(Broadcaster::default());
    let service = Arc::new(VisualizationService::new(
        Arc::new(FakeSource {
            result: Mutex::new(Ok(sample())),
        }),
        VisualizationStore::default(),
        broadcaster.clone(),
    ));
    let app = router(
        AppState::new(service.clone()),
        &["http://localhost:3000".to_string()],
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Running {
        addr,
        service,
        broadcaster,
    }
}

async fn connect(addr: SocketAddr) -> Viewer {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

/// Next text frame as JSON, skipping control frames
async fn next_json(ws: &mut Viewer) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Poll until `check` holds or a few seconds pass
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_subscriber_receives_refresh_and_close_clears_indices() {
    let server = spawn_server().await;
    let created = server
        .service
        .create(CreateVisualization::new("Portfolio Flow"))
        .await
        .unwrap();
    let id = created.id.clone();

    let mut ws = connect(server.addr).await;
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "connected");
    assert!(welcome["clientId"].as_str().unwrap().starts_with("client_"));

    ws.send(Message::Text(
        json!({"type": "subscribe", "visualizationId": id}).to_string(),
    ))
    .await
    .unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(ack["visualizationId"], id.as_str());
    assert_eq!(server.broadcaster.subscriber_count(&id).await, 1);

    let response = reqwest::Client::new()
        .put(format!("http://{}/api/visualizations/{id}", server.addr))
        .json(&json!({"subtitle": "Q4"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let update = next_json(&mut ws).await;
    assert_eq!(update["type"], "visualization_update");
    assert_eq!(update["visualizationId"], id.as_str());
    assert_eq!(update["data"]["metadata"]["subtitle"], "Q4");

    // an unsolicited pong is accepted without a reply
    ws.send(Message::Pong(Vec::new())).await.unwrap();
    ws.close(None).await.unwrap();

    let broadcaster = server.broadcaster.clone();
    eventually(|| {
        let broadcaster = broadcaster.clone();
        let id = id.clone();
        async move {
            broadcaster.subscriber_count(&id).await == 0
                && broadcaster.public_stats().await.active_connections == 0
        }
    })
    .await;
    assert_eq!(server.broadcaster.stats().await.total_subscriptions, 0);
}

#[tokio::test]
async fn test_updates_reach_only_subscribers_of_that_visualization() {
    let server = spawn_server().await;
    let first = server
        .service
        .create(CreateVisualization::new("First"))
        .await
        .unwrap();
    let second = server
        .service
        .create(CreateVisualization::new("Second"))
        .await
        .unwrap();

    let mut watcher = connect(server.addr).await;
    let mut bystander = connect(server.addr).await;
    next_json(&mut watcher).await;
    next_json(&mut bystander).await;
    for (ws, id) in [(&mut watcher, &first.id), (&mut bystander, &second.id)] {
        ws.send(Message::Text(
            json!({"type": "subscribe", "visualizationId": id}).to_string(),
        ))
        .await
        .unwrap();
        assert_eq!(next_json(ws).await["type"], "subscribed");
    }

    let response = reqwest::Client::new()
        .put(format!("http://{}/api/visualizations/{}", server.addr, first.id))
        .json(&json!({"title": "First, renamed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let update = next_json(&mut watcher).await;
    assert_eq!(update["visualizationId"], first.id.as_str());

    // the bystander's next frame is the reply to its own ping, not an update
    bystander
        .send(Message::Text(json!({"type": "ping"}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut bystander).await["type"], "pong");
}

#[tokio::test]
async fn test_shutdown_sends_notice_then_close_and_forgets_viewer() {
    let server = spawn_server().await;
    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "connected");
    eventually(|| {
        let broadcaster = server.broadcaster.clone();
        async move { broadcaster.public_stats().await.active_connections == 1 }
    })
    .await;

    server.broadcaster.shutdown().await;

    assert_eq!(next_json(&mut ws).await["type"], "server_shutdown");
    let close = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match close {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason, "Server shutdown");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    // the writer finishing after Close ends the connection server-side
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    assert!(ended.is_ok());
    assert_eq!(server.broadcaster.public_stats().await.active_connections, 0);
}
