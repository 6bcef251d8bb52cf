//! TargetProcess REST API client
//!
//! Thin reqwest wrapper: builds collection/entity URLs, attaches the auth and
//! product headers, classifies non-2xx responses and retries transient failures
//! through a [`RetryPolicy`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::query::{include_clause, SearchQuery};
use super::retry::{RetryError, RetryPolicy};
use super::types::{decode_records, Collection, Epic, FlowData, Portfolio, Team, WorkItem};
use super::{ConnectionCheck, FlowSource};
use crate::error::UpstreamError;

/// Product identifier sent on every request
pub const CLIENT_USER_AGENT: &str = "TargetProcess-D3-Visualization-Server/1.0.0";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How the client authenticates, fixed at construction
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Access token sent as `Authorization: Bearer <token>`
    ApiToken(String),
    /// Username/password sent as `Authorization: Basic base64(user:pass)`
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn authorization(&self) -> String {
        match self {
            Credentials::ApiToken(token) => format!("Bearer {token}"),
            Credentials::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiToken(_) => f.write_str("ApiToken(***)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: *** }}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `https://acme.tpondemand.com/api/v1`
    pub base_url: String,
    pub credentials: Credentials,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn for_domain(domain: &str, credentials: Credentials) -> Self {
        Self::with_base_url(format!("https://{domain}/api/v1"), credentials)
    }

    pub fn with_base_url(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// TargetProcess API client
pub struct TargetProcessClient {
    http: Client,
    headers: HeaderMap,
    config: ClientConfig,
}

impl TargetProcessClient {
    pub fn new(config: ClientConfig) -> Result<Self, UpstreamError> {
        let headers = request_headers(&config.credentials)?;
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            headers,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Search a collection; returns the raw items whichever envelope the API used
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Value>, UpstreamError> {
        let entity_type = &query.entity_type;
        let url = format!(
            "{}/{}{}",
            self.config.base_url,
            entity_type,
            query.to_query_string()
        );
        debug!("GET {}", url);

        let body = self
            .execute(
                Method::GET,
                &url,
                None,
                &format!("Search {entity_type} entities"),
                &format!("search {entity_type} entities"),
            )
            .await?;

        Collection::from_value(body).ok_or_else(|| {
            UpstreamError::transport(format!(
                "Search {entity_type} entities returned neither an Items envelope nor an array"
            ))
        })
    }

    /// Fetch a single entity by id
    pub async fn get_by_id(
        &self,
        entity_type: &str,
        id: i64,
        include: &[String],
    ) -> Result<Value, UpstreamError> {
        let mut params: Vec<String> = include_clause(include).into_iter().collect();
        params.push("format=json".to_string());
        let url = format!(
            "{}/{}/{}?{}",
            self.config.base_url,
            entity_type,
            id,
            params.join("&")
        );

        self.execute(
            Method::GET,
            &url,
            None,
            &format!("Get {entity_type} entity"),
            &format!("get {entity_type} entity"),
        )
        .await
    }

    pub async fn create(&self, entity_type: &str, payload: &Value) -> Result<Value, UpstreamError> {
        let url = format!("{}/{}", self.config.base_url, entity_type);
        self.execute(
            Method::POST,
            &url,
            Some(payload),
            &format!("Create {entity_type} entity"),
            &format!("create {entity_type} entity"),
        )
        .await
    }

    pub async fn update(
        &self,
        entity_type: &str,
        id: i64,
        payload: &Value,
    ) -> Result<Value, UpstreamError> {
        let url = format!("{}/{}/{}", self.config.base_url, entity_type, id);
        self.execute(
            Method::POST,
            &url,
            Some(payload),
            &format!("Update {entity_type} entity"),
            &format!("update {entity_type} entity"),
        )
        .await
    }

    /// Fetch the four flow collections. An entity type the instance does not
    /// expose (or that fails outright) is logged and left empty. Rejected
    /// credentials fail the fetch at once, and so does every type failing.
    pub async fn fetch_flow_data(&self) -> Result<FlowData, UpstreamError> {
        info!("Fetching portfolio flow data...");
        let mut fetch = PartialFetch::default();

        let portfolios: Vec<Portfolio> = fetch.absorb(
            self.fetch_records(
                SearchQuery::new("Portfolio")
                    .include(["Epics", "Project"])
                    .take(50),
            )
            .await,
        )?;
        let epics: Vec<Epic> = fetch.absorb(
            self.fetch_records(
                SearchQuery::new("Epic")
                    .include(["Portfolio", "UserStories", "Features"])
                    .take(100),
            )
            .await,
        )?;
        let work_items: Vec<WorkItem> = fetch.absorb(
            self.fetch_records(
                SearchQuery::new("UserStory")
                    .include(["Epic", "Team", "Project", "AssignedUser"])
                    .take(500),
            )
            .await,
        )?;
        let teams: Vec<Team> = fetch.absorb(
            self.fetch_records(SearchQuery::new("Team").include(["Members"]).take(50))
                .await,
        )?;

        fetch.finish(FlowData {
            portfolios,
            epics,
            work_items,
            teams,
        })
    }

    /// Small sample of each collection, fetched concurrently
    pub async fn sample_data(&self) -> Result<FlowData, UpstreamError> {
        let portfolio_query = SearchQuery::new("Portfolio").take(3);
        let epic_query = SearchQuery::new("Epic").take(5);
        let story_query = SearchQuery::new("UserStory").take(10);
        let team_query = SearchQuery::new("Team").take(5);

        let (portfolios, epics, work_items, teams) = tokio::try_join!(
            self.search(&portfolio_query),
            self.search(&epic_query),
            self.search(&story_query),
            self.search(&team_query),
        )?;

        Ok(FlowData {
            portfolios: decode_records("Portfolio", portfolios),
            epics: decode_records("Epic", epics),
            work_items: decode_records("UserStory", work_items),
            teams: decode_records("Team", teams),
        })
    }

    /// Minimal search used as a connectivity check; never fails
    pub async fn test_connection(&self) -> ConnectionCheck {
        match self.search(&SearchQuery::new("Project").take(1)).await {
            Ok(_) => ConnectionCheck::ok(),
            Err(e) => {
                warn!("TargetProcess connection test failed: {}", e);
                ConnectionCheck::failed(e.message)
            }
        }
    }

    async fn fetch_records<T: DeserializeOwned>(
        &self,
        query: SearchQuery,
    ) -> (String, Result<Vec<T>, UpstreamError>) {
        let result = self.search(&query).await.map(|items| {
            let records = decode_records(&query.entity_type, items);
            info!("Found {} {} records", records.len(), query.entity_type);
            records
        });
        (query.entity_type, result)
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        context: &str,
        operation: &str,
    ) -> Result<Value, UpstreamError> {
        let result = self
            .config
            .retry
            .run(UpstreamError::is_retryable, move || {
                self.send(method.clone(), url, body, context)
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(RetryError::Fatal(err)) => Err(err),
            Err(RetryError::Exhausted { attempts, last }) => Err(UpstreamError::new(
                last.status_code.unwrap_or(500),
                format!(
                    "Failed to {operation} after {attempts} attempts: {}",
                    last.message
                ),
            )),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        context: &str,
    ) -> Result<Value, UpstreamError> {
        let mut request = self.http.request(method, url).headers(self.headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::transport(format!("{context} failed: {e}")))?;

        handle_response(response, context).await
    }
}

#[async_trait]
impl FlowSource for TargetProcessClient {
    async fn flow_data(&self) -> Result<FlowData, UpstreamError> {
        self.fetch_flow_data().await
    }

    async fn check_connection(&self) -> ConnectionCheck {
        self.test_connection().await
    }
}

/// Per-type outcomes of one flow fetch
#[derive(Debug, Default)]
struct PartialFetch {
    gathered: usize,
    last_error: Option<UpstreamError>,
}

impl PartialFetch {
    /// Keep the records, or log the failure and carry on with none.
    /// Auth failures are returned immediately.
    fn absorb<T>(
        &mut self,
        (entity_type, result): (String, Result<Vec<T>, UpstreamError>),
    ) -> Result<Vec<T>, UpstreamError> {
        match result {
            Ok(records) => {
                self.gathered += 1;
                Ok(records)
            }
            Err(e) if e.is_auth_failure() => {
                warn!("{} rejected the credentials: {}", entity_type, e);
                Err(e)
            }
            Err(e) => {
                warn!("{} unavailable, continuing without it: {}", entity_type, e);
                self.last_error = Some(e);
                Ok(Vec::new())
            }
        }
    }

    /// Nothing gathered at all surfaces the last failure
    fn finish(self, data: FlowData) -> Result<FlowData, UpstreamError> {
        match (self.gathered, self.last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(data),
        }
    }
}

fn request_headers(credentials: &Credentials) -> Result<HeaderMap, UpstreamError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    let mut auth = HeaderValue::from_str(&credentials.authorization()).map_err(|_| {
        UpstreamError::transport("Credentials contain characters not allowed in a header")
    })?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    Ok(headers)
}

async fn handle_response(response: Response, context: &str) -> Result<Value, UpstreamError> {
    let status = response.status();
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("Unknown Status").to_string();
        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body).unwrap_or(reason);
        return Err(UpstreamError::new(
            status.as_u16(),
            format!("{context} failed: {} - {detail}", status.as_u16()),
        ));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| UpstreamError::transport(format!("{context} returned invalid JSON: {e}")))
}

/// Pull a human-readable message out of a TargetProcess error body
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["Message", "ErrorMessage", "Description"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}
