//! Live visualization updates for connected viewers
//!
//! - `hub` - bidirectional connection ↔ visualization index
//! - `protocol` - inbound/outbound JSON frames
//! - `broadcaster` - connection registry, fan-out, heartbeat
//! - `socket` - axum WebSocket driver (server feature)

pub mod broadcaster;
pub mod hub;
pub mod protocol;
#[cfg(feature = "server")]
pub mod socket;

pub use broadcaster::{
    Broadcaster, BroadcasterStats, ConnectionState, DeliveryReport, Outbound,
    DEFAULT_HEARTBEAT_INTERVAL,
};
pub use hub::{ClientId, SubscriptionIndex};
pub use protocol::{ClientMessage, PublicStats, ServerMessage};
