//! TargetProcess upstream integration
//!
//! - `query` - where/include/orderBy fragments and literal escaping
//! - `retry` - reusable exponential backoff policy
//! - `types` - typed entity records with default-filling accessors
//! - `client` - reqwest client implementing [`FlowSource`]

pub mod client;
pub mod query;
pub mod retry;
pub mod types;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::UpstreamError;

pub use client::{ClientConfig, Credentials, TargetProcessClient, CLIENT_USER_AGENT};
pub use query::{Filter, FilterValue, SearchQuery};
pub use retry::{RetryError, RetryPolicy};
pub use types::{EntityRef, EntityState, Epic, FlowData, Portfolio, Team, WorkItem};

/// Outcome of a connectivity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionCheck {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Where visualization data comes from
///
/// Implemented by [`TargetProcessClient`]; the service only depends on this
/// trait so it can be driven by an in-memory source.
#[async_trait]
pub trait FlowSource: Send + Sync {
    /// Portfolios, epics, work items and teams
    async fn flow_data(&self) -> Result<FlowData, UpstreamError>;

    /// Check the upstream; never fails, reports the problem instead
    async fn check_connection(&self) -> ConnectionCheck;
}
