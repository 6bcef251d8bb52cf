//! Live viewer connections and visualization fan-out
//!
//! Every connection owns an unbounded outbound queue drained by its own writer
//! task, so queueing a frame never waits on a socket. All connection and
//! subscription state sits behind one lock; broadcast serializes the update
//! once and queues the same text for every subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::hub::{ClientId, SubscriptionIndex};
use super::protocol::{ClientMessage, PublicStats, ServerMessage};
use crate::sankey::GraphDocument;

/// Default ping cadence (30 seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Close { code: u16, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered, welcome not yet sent
    Connecting,
    Open,
    /// Close frame queued, waiting for the socket to go away
    Closing,
    Closed,
}

#[derive(Debug)]
struct Connection {
    tx: mpsc::UnboundedSender<Outbound>,
    state: ConnectionState,
    last_pong: Instant,
}

#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<ClientId, Connection>,
    subscriptions: SubscriptionIndex,
}

#[derive(Debug, Default)]
struct Counters {
    total_connections: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    errors: AtomicU64,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Operator-facing counters and gauges
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub errors: u64,
    pub active_subscriptions: usize,
    pub total_subscriptions: usize,
    pub heartbeat_interval_ms: u64,
}

/// Subscription broadcaster shared by every viewer connection
#[derive(Debug)]
pub struct Broadcaster {
    state: RwLock<HubState>,
    counters: Counters,
    heartbeat_interval: Duration,
    started: Instant,
}

impl Broadcaster {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            counters: Counters::default(),
            heartbeat_interval,
            started: Instant::now(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Register a new connection in `Connecting` state. The receiver feeds the
    /// connection's writer task.
    pub async fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ClientId::generate();
        self.state.write().await.connections.insert(
            client.clone(),
            Connection {
                tx,
                state: ConnectionState::Connecting,
                last_pong: Instant::now(),
            },
        );
        (client, rx)
    }

    /// Mark the connection open and send the welcome frame
    pub async fn open(&self, client: &ClientId) -> bool {
        let mut state = self.state.write().await;
        let Some(connection) = state.connections.get_mut(client) else {
            return false;
        };
        connection.state = ConnectionState::Open;
        connection.last_pong = Instant::now();

        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
        info!(
            "Viewer connected: {} ({} active)",
            client,
            state.connections.len()
        );

        let welcome = ServerMessage::Connected {
            client_id: client.as_str(),
            server_time: Utc::now(),
            heartbeat_interval: self.heartbeat_interval.as_millis() as u64,
        };
        self.send_locked(&state, client, &welcome)
    }

    pub async fn connection_state(&self, client: &ClientId) -> ConnectionState {
        self.state
            .read()
            .await
            .connections
            .get(client)
            .map_or(ConnectionState::Closed, |c| c.state)
    }

    /// Handle one inbound text frame; protocol errors are answered, not returned
    pub async fn handle_text(&self, client: &ClientId, text: &str) {
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);

        match ClientMessage::parse(text) {
            Ok(ClientMessage::Subscribe { visualization_id }) => {
                self.subscribe(client, &visualization_id).await;
            }
            Ok(ClientMessage::Unsubscribe { visualization_id }) => {
                self.unsubscribe(client, visualization_id.as_deref()).await;
            }
            Ok(ClientMessage::Ping) => {
                self.send(client, &ServerMessage::Pong { timestamp: Utc::now() })
                    .await;
            }
            Ok(ClientMessage::GetStats) => {
                let stats = self.public_stats().await;
                self.send(client, &ServerMessage::Stats { stats }).await;
            }
            Err(e) => {
                debug!("Rejected frame from {}: {:?}", client, e);
                self.send(client, &ServerMessage::error(e.to_string())).await;
            }
        }
    }

    /// Any pong (or other sign of life) resets the heartbeat deadline
    pub async fn record_pong(&self, client: &ClientId) {
        if let Some(connection) = self.state.write().await.connections.get_mut(client) {
            connection.last_pong = Instant::now();
        }
    }

    pub async fn subscribe(&self, client: &ClientId, visualization_id: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.connections.contains_key(client) {
            return false;
        }
        state.subscriptions.insert(client, visualization_id);
        info!("{} subscribed to visualization {}", client, visualization_id);

        self.send_locked(
            &state,
            client,
            &ServerMessage::Subscribed {
                visualization_id,
                timestamp: Utc::now(),
            },
        );
        true
    }

    pub async fn unsubscribe(&self, client: &ClientId, visualization_id: Option<&str>) -> bool {
        let mut state = self.state.write().await;
        if !state.connections.contains_key(client) {
            return false;
        }
        if let Some(visualization_id) = visualization_id {
            state.subscriptions.remove(client, visualization_id);
            info!(
                "{} unsubscribed from visualization {}",
                client, visualization_id
            );
        }

        self.send_locked(
            &state,
            client,
            &ServerMessage::Unsubscribed {
                visualization_id,
                timestamp: Utc::now(),
            },
        );
        true
    }

    /// Count a transport failure reported by a connection task
    pub fn record_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Forget a connection and all of its subscriptions
    pub async fn disconnect(&self, client: &ClientId) {
        let mut state = self.state.write().await;
        if state.connections.remove(client).is_none() {
            return;
        }
        let left = state.subscriptions.remove_client(client);
        info!(
            "Viewer disconnected: {} ({} subscriptions dropped, {} active)",
            client,
            left.len(),
            state.connections.len()
        );
    }

    /// Queue a `visualization_update` for every subscriber of `visualization_id`
    ///
    /// The document is encoded with no lock held; the lock is taken only to
    /// snapshot subscribers and to queue the frames.
    pub async fn broadcast(
        &self,
        visualization_id: &str,
        document: &GraphDocument,
    ) -> DeliveryReport {
        let subscribers = self.state.read().await.subscriptions.subscribers(visualization_id);
        if subscribers.is_empty() {
            debug!("No subscribers for visualization {}", visualization_id);
            return DeliveryReport::default();
        }

        let update = ServerMessage::VisualizationUpdate {
            visualization_id,
            data: document,
            timestamp: Utc::now(),
        };
        let text = match update.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode update for {}: {}", visualization_id, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return DeliveryReport {
                    sent: 0,
                    failed: subscribers.len(),
                };
            }
        };

        let state = self.state.read().await;
        let mut report = DeliveryReport::default();
        for client in &subscribers {
            if self.deliver(&state, client, Outbound::Text(text.clone())) {
                report.sent += 1;
            } else {
                warn!("Failed to queue update for {}", client);
                report.failed += 1;
            }
        }

        info!(
            "Broadcast update for visualization {}: {} sent, {} failed",
            visualization_id, report.sent, report.failed
        );
        report
    }

    /// One heartbeat pass: ping open connections, close the ones that missed
    /// two intervals, drop the ones whose writer has gone away
    pub async fn sweep(&self, now: Instant) {
        let deadline = self.heartbeat_interval * 2;
        let mut state = self.state.write().await;

        let mut dead = Vec::new();
        for (client, connection) in state.connections.iter_mut() {
            if connection.tx.is_closed() {
                dead.push(client.clone());
                continue;
            }
            if connection.state != ConnectionState::Open {
                continue;
            }
            if now.saturating_duration_since(connection.last_pong) > deadline {
                info!("{} missed its heartbeat, closing", client);
                connection.state = ConnectionState::Closing;
                let _ = connection.tx.send(Outbound::Close {
                    code: CLOSE_NORMAL,
                    reason: "Heartbeat timeout",
                });
            } else if connection.tx.send(Outbound::Ping).is_err() {
                dead.push(client.clone());
            }
        }

        for client in dead {
            state.connections.remove(&client);
            state.subscriptions.remove_client(&client);
            debug!("Removed dead connection {}", client);
        }
    }

    /// Run [`sweep`](Self::sweep) every heartbeat interval until aborted
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(broadcaster.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately
            ticker.tick().await;
            loop {
                let now = ticker.tick().await;
                broadcaster.sweep(now).await;
            }
        })
    }

    /// Notify every viewer, close their sockets and clear all state
    pub async fn shutdown(&self) {
        info!("Shutting down viewer connections...");
        let mut state = self.state.write().await;

        let notice = ServerMessage::ServerShutdown {
            message: "Server is shutting down",
            timestamp: Utc::now(),
        };
        match notice.to_text() {
            Ok(text) => {
                let clients: Vec<ClientId> = state.connections.keys().cloned().collect();
                for client in &clients {
                    self.deliver(&state, client, Outbound::Text(text.clone()));
                }
            }
            Err(e) => warn!("Failed to encode shutdown notice: {}", e),
        }

        for connection in state.connections.values_mut() {
            connection.state = ConnectionState::Closing;
            let _ = connection.tx.send(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "Server shutdown",
            });
        }
        state.connections.clear();
        state.subscriptions.clear();
    }

    pub async fn subscriber_count(&self, visualization_id: &str) -> usize {
        self.state
            .read()
            .await
            .subscriptions
            .subscribers(visualization_id)
            .len()
    }

    pub async fn public_stats(&self) -> PublicStats {
        let state = self.state.read().await;
        PublicStats {
            active_connections: state.connections.len(),
            active_subscriptions: state.subscriptions.visualization_count(),
            total_subscriptions: state.subscriptions.pair_count(),
            uptime: self.started.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    pub async fn stats(&self) -> BroadcasterStats {
        let state = self.state.read().await;
        BroadcasterStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: state.connections.len(),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            active_subscriptions: state.subscriptions.visualization_count(),
            total_subscriptions: state.subscriptions.pair_count(),
            heartbeat_interval_ms: self.heartbeat_interval.as_millis() as u64,
        }
    }

    async fn send(&self, client: &ClientId, message: &ServerMessage<'_>) -> bool {
        let state = self.state.read().await;
        self.send_locked(&state, client, message)
    }

    fn send_locked(
        &self,
        state: &HubState,
        client: &ClientId,
        message: &ServerMessage<'_>,
    ) -> bool {
        match message.to_text() {
            Ok(text) => self.deliver(state, client, Outbound::Text(text)),
            Err(e) => {
                warn!("Failed to encode frame for {}: {}", client, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Queue a frame for an open connection
    fn deliver(&self, state: &HubState, client: &ClientId, frame: Outbound) -> bool {
        let Some(connection) = state.connections.get(client) else {
            return false;
        };
        if connection.state != ConnectionState::Open {
            return false;
        }
        if connection.tx.send(frame).is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sankey::{transform, TransformOptions};
    use crate::upstream::FlowData;
    use serde_json::Value;

    async fn open_client(b: &Broadcaster) -> (ClientId, mpsc::UnboundedReceiver<Outbound>) {
        let (client, mut rx) = b.connect().await;
        assert!(b.open(&client).await);
        // welcome frame
        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(_))));
        (client, rx)
    }

    fn frame_type(frame: Outbound) -> String {
        match frame {
            Outbound::Text(text) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                value["type"].as_str().unwrap().to_string()
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn document() -> GraphDocument {
        transform(&FlowData::default(), &TransformOptions::default())
    }

    #[tokio::test]
    async fn test_welcome_frame_announces_client_id() {
        let b = Broadcaster::default();
        let (client, mut rx) = b.connect().await;
        assert_eq!(b.connection_state(&client).await, ConnectionState::Connecting);
        b.open(&client).await;
        assert_eq!(b.connection_state(&client).await, ConnectionState::Open);

        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("no welcome frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["clientId"], client.as_str());
        assert_eq!(value["heartbeatInterval"], 30_000);
    }

    #[tokio::test]
    async fn test_subscribe_then_broadcast_delivers_once() {
        let b = Broadcaster::default();
        let (client, mut rx) = open_client(&b).await;

        b.handle_text(&client, r#"{"type":"subscribe","visualizationId":"v1"}"#)
            .await;
        assert_eq!(frame_type(rx.try_recv().unwrap()), "subscribed");

        let report = b.broadcast("v1", &document()).await;
        assert_eq!(report, DeliveryReport { sent: 1, failed: 0 });
        assert_eq!(frame_type(rx.try_recv().unwrap()), "visualization_update");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let b = Broadcaster::default();
        let (client, mut rx) = open_client(&b).await;
        b.subscribe(&client, "v1").await;
        b.unsubscribe(&client, Some("v1")).await;
        assert_eq!(frame_type(rx.try_recv().unwrap()), "subscribed");
        assert_eq!(frame_type(rx.try_recv().unwrap()), "unsubscribed");

        let report = b.broadcast("v1", &document()).await;
        assert_eq!(report, DeliveryReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_counts_failed_subscribers_without_aborting() {
        let b = Broadcaster::default();
        let (alive, mut alive_rx) = open_client(&b).await;
        let (gone, gone_rx) = open_client(&b).await;
        b.subscribe(&alive, "v1").await;
        b.subscribe(&gone, "v1").await;
        drop(gone_rx);
        let _ = alive_rx.try_recv();

        let report = b.broadcast("v1", &document()).await;
        assert_eq!(report, DeliveryReport { sent: 1, failed: 1 });
        assert_eq!(frame_type(alive_rx.try_recv().unwrap()), "visualization_update");
        assert_eq!(b.stats().await.errors, 1);
    }

    #[tokio::test]
    async fn test_protocol_errors_are_answered() {
        let b = Broadcaster::default();
        let (client, mut rx) = open_client(&b).await;

        for (frame, expected) in [
            ("nonsense", "Invalid message format"),
            (r#"{"type":"launch"}"#, "Unknown message type"),
            (r#"{"type":"subscribe"}"#, "Visualization ID is required"),
        ] {
            b.handle_text(&client, frame).await;
            let Ok(Outbound::Text(text)) = rx.try_recv() else {
                panic!("no reply to {frame}");
            };
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "error");
            assert_eq!(value["message"], expected);
        }
        assert_eq!(b.stats().await.messages_received, 3);
    }

    #[tokio::test]
    async fn test_ping_and_stats_replies() {
        let b = Broadcaster::default();
        let (client, mut rx) = open_client(&b).await;
        b.subscribe(&client, "v1").await;
        b.subscribe(&client, "v2").await;
        let _ = rx.try_recv();
        let _ = rx.try_recv();

        b.handle_text(&client, r#"{"type":"ping"}"#).await;
        assert_eq!(frame_type(rx.try_recv().unwrap()), "pong");

        b.handle_text(&client, r#"{"type":"get_stats"}"#).await;
        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("no stats frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["stats"]["activeConnections"], 1);
        assert_eq!(value["stats"]["activeSubscriptions"], 2);
        assert_eq!(value["stats"]["totalSubscriptions"], 2);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_subscriptions() {
        let b = Broadcaster::default();
        let (client, _rx) = open_client(&b).await;
        b.subscribe(&client, "v1").await;
        assert_eq!(b.subscriber_count("v1").await, 1);

        b.disconnect(&client).await;
        assert_eq!(b.subscriber_count("v1").await, 0);
        assert_eq!(b.connection_state(&client).await, ConnectionState::Closed);
        assert!(!b.subscribe(&client, "v1").await);

        let stats = b.stats().await;
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_pings_then_closes_silent_connections() {
        let b = Broadcaster::new(Duration::from_secs(30));
        let (client, mut rx) = open_client(&b).await;

        b.sweep(Instant::now() + Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);

        b.sweep(Instant::now() + Duration::from_secs(61)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "Heartbeat timeout"
            }
        );
        assert_eq!(b.connection_state(&client).await, ConnectionState::Closing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_resets_heartbeat_deadline() {
        let b = Broadcaster::new(Duration::from_secs(30));
        let (client, mut rx) = open_client(&b).await;

        tokio::time::advance(Duration::from_secs(50)).await;
        b.record_pong(&client).await;
        b.sweep(Instant::now() + Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
        assert_eq!(b.connection_state(&client).await, ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_sweep_drops_connections_without_a_writer() {
        let b = Broadcaster::default();
        let (client, rx) = open_client(&b).await;
        b.subscribe(&client, "v1").await;
        drop(rx);

        b.sweep(Instant::now()).await;
        assert_eq!(b.connection_state(&client).await, ConnectionState::Closed);
        assert_eq!(b.subscriber_count("v1").await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_and_closes() {
        let b = Broadcaster::default();
        let (client, mut rx) = open_client(&b).await;
        b.subscribe(&client, "v1").await;
        let _ = rx.try_recv();

        b.shutdown().await;
        assert_eq!(frame_type(rx.try_recv().unwrap()), "server_shutdown");
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "Server shutdown"
            }
        );
        let stats = b.stats().await;
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_broadcast_runs_alongside_subscription_changes() {
        let b = Arc::new(Broadcaster::default());
        let (watcher, mut watcher_rx) = open_client(&b).await;
        b.subscribe(&watcher, "v1").await;
        let _ = watcher_rx.try_recv();
        let (leaver, _leaver_rx) = open_client(&b).await;
        b.subscribe(&leaver, "v2").await;
        let doc = document();

        let (report, (), joined) = tokio::join!(
            b.broadcast("v1", &doc),
            b.disconnect(&leaver),
            async {
                let (late, _rx) = b.connect().await;
                b.open(&late).await;
                b.subscribe(&late, "v2").await
            }
        );

        assert_eq!(report, DeliveryReport { sent: 1, failed: 0 });
        assert!(joined);
        assert_eq!(frame_type(watcher_rx.try_recv().unwrap()), "visualization_update");
        assert_eq!(b.subscriber_count("v2").await, 1);
    }
}
