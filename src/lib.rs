//! Portfolio Flow - TargetProcess portfolio data as a live Sankey graph
//!
//! Pulls portfolios, epics, work items and teams from TargetProcess, projects
//! them into a four-level flow graph and keeps viewers current over WebSocket.
//!
//! ## Pipeline
//! TargetProcess REST -> FlowData -> Sankey transform -> TTL store -> broadcast
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use portfolio_flow::sankey::{transform, TransformOptions};
//! use portfolio_flow::upstream::FlowData;
//!
//! let document = transform(&FlowData::default(), &TransformOptions::default());
//! assert_eq!(document.node_count(), 0);
//! ```

// Core error handling
pub mod error;

// TargetProcess client, query building, retry
pub mod upstream;

// Pure graph projection
pub mod sankey;

// Visualization records with TTL eviction
pub mod store;

// Viewer connections and fan-out
pub mod broadcast;

// Lifecycle orchestration
pub mod service;

pub mod config;

// REST + WebSocket surface
#[cfg(feature = "server")]
pub mod api;

pub use config::AppConfig;
pub use error::{ConfigError, ProtocolError, ServiceError, TransformError, UpstreamError};
pub use service::{CreateVisualization, UpdateVisualization, VisualizationService};
