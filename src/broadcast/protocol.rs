//! Viewer wire protocol
//!
//! JSON text frames tagged by `type`. Inbound frames are parsed leniently
//! (unknown fields ignored); outbound frames use camelCase field names.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::sankey::GraphDocument;

/// A frame sent by a viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe { visualization_id: String },
    Unsubscribe { visualization_id: Option<String> },
    Ping,
    GetStats,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidFormat)?;
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();

        match kind {
            "subscribe" => visualization_id(&value)
                .map(|visualization_id| ClientMessage::Subscribe { visualization_id })
                .ok_or(ProtocolError::MissingVisualizationId),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe {
                visualization_id: visualization_id(&value),
            }),
            "ping" => Ok(ClientMessage::Ping),
            "get_stats" => Ok(ClientMessage::GetStats),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Ids arrive as strings; numeric ids are accepted and stringified
fn visualization_id(value: &Value) -> Option<String> {
    match value.get("visualizationId")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A frame sent to a viewer
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    #[serde(rename_all = "camelCase")]
    Connected {
        client_id: &'a str,
        server_time: DateTime<Utc>,
        /// Milliseconds
        heartbeat_interval: u64,
    },
    #[serde(rename_all = "camelCase")]
    Subscribed {
        visualization_id: &'a str,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        visualization_id: Option<&'a str>,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Stats {
        stats: PublicStats,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    VisualizationUpdate {
        visualization_id: &'a str,
        data: &'a GraphDocument,
        timestamp: DateTime<Utc>,
    },
    ServerShutdown {
        message: &'a str,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage<'_> {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize once; the text is shared by every recipient
    pub fn to_text(&self) -> Result<Arc<str>, ProtocolError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(ProtocolError::Encode)
    }
}

/// Snapshot returned to viewers asking for `get_stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicStats {
    pub active_connections: usize,
    /// Visualizations with at least one subscriber
    pub active_subscriptions: usize,
    /// Connection/visualization pairs
    pub total_subscriptions: usize,
    /// Seconds since the broadcaster started
    pub uptime: f64,
    pub timestamp: DateTime<Utc>,
}
