//! HTTP client for the Helix EventSub subscription control plane.
//!
//! Covers the three subscription operations: create (POST, success is 202),
//! delete (DELETE by id, success is 204), and the paginated list (GET). The
//! client performs no retries of its own; callers decide their retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// Production Helix API base URL.
pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
const SUBSCRIPTIONS_PATH: &str = "/eventsub/subscriptions";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HelixDefaults;

impl HelixDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Timeouts applied to every control-plane request.
#[derive(Clone, Debug)]
pub struct HelixClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HelixClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: HelixDefaults::CONNECT_TIMEOUT,
            request_timeout: HelixDefaults::REQUEST_TIMEOUT,
        }
    }
}

/// Authenticated Helix API client.
///
/// Every request carries the bearer token, the application client id, and a
/// JSON content type. Credentials are supplied by the caller; the client
/// never reads the process environment.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    token: SecretString,
    client_id: String,
    request_timeout: Duration,
    base_url_override: Option<String>,
}

impl HelixClient {
    pub fn new(token: SecretString, client_id: impl Into<String>) -> Result<Self, HelixError> {
        Self::with_options(token, client_id, HelixClientOptions::default())
    }

    pub fn with_options(
        token: SecretString,
        client_id: impl Into<String>,
        options: HelixClientOptions,
    ) -> Result<Self, HelixError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(HelixError::Transport)?;

        Ok(Self {
            http,
            token,
            client_id: client_id.into(),
            request_timeout: options.request_timeout,
            base_url_override: None,
        })
    }

    /// Sets an explicit API base URL override.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url_override = Some(base_url.trim().trim_end_matches('/').to_string());
        self
    }

    fn base_url(&self) -> &str {
        self.base_url_override.as_deref().unwrap_or(HELIX_BASE_URL)
    }

    fn subscriptions_endpoint(&self) -> String {
        format!("{}{}", self.base_url(), SUBSCRIPTIONS_PATH)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .timeout(self.request_timeout)
            .bearer_auth(self.token.expose_secret())
            .header("Client-Id", &self.client_id)
    }

    /// Creates a subscription. Success is exactly HTTP 202.
    pub async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<CreateSubscriptionResponse, HelixError> {
        let response = self
            .authorized(self.http.post(self.subscriptions_endpoint()))
            .json(request)
            .send()
            .await
            .map_err(HelixError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(HelixError::Transport)?;
        if status != StatusCode::ACCEPTED {
            return Err(status_error(status, &body));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Deletes a subscription by id. Success is exactly HTTP 204.
    pub async fn delete_subscription(&self, id: &str) -> Result<(), HelixError> {
        let response = self
            .authorized(self.http.delete(self.subscriptions_endpoint()))
            .query(&[("id", id)])
            .send()
            .await
            .map_err(HelixError::Transport)?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let body = response.text().await.map_err(HelixError::Transport)?;
        Err(status_error(status, &body))
    }

    /// Lists subscriptions matching `filter`, following the pagination
    /// cursor until the server reports no further pages.
    pub async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>, HelixError> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .authorized(self.http.get(self.subscriptions_endpoint()))
                .query(filter);
            if let Some(after) = cursor.as_deref() {
                request = request.query(&[("after", after)]);
            }

            let response = request.send().await.map_err(HelixError::Transport)?;
            let status = response.status();
            let body = response.text().await.map_err(HelixError::Transport)?;
            if status != StatusCode::OK {
                return Err(status_error(status, &body));
            }

            let page: ListSubscriptionsResponse = serde_json::from_str(&body)?;
            subscriptions.extend(page.data);

            match page.pagination.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(subscriptions),
            }
        }
    }
}

/// Body of a subscription creation request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CreateSubscriptionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub condition: Value,
    pub transport: TransportRequest,
}

/// Delivery transport descriptor sent with a creation request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: String,
    pub session_id: String,
}

impl TransportRequest {
    /// Websocket delivery bound to the given session.
    pub fn websocket(session_id: impl Into<String>) -> Self {
        Self {
            method: "websocket".to_string(),
            session_id: session_id.into(),
        }
    }
}

/// Successful (202) creation response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CreateSubscriptionResponse {
    pub data: Vec<Subscription>,
    pub total: u64,
    pub total_cost: u64,
    pub max_total_cost: u64,
}

/// One page of the subscription list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ListSubscriptionsResponse {
    pub data: Vec<Subscription>,
    pub total: u64,
    pub total_cost: u64,
    pub max_total_cost: u64,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// A registered interest in a category of events.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionStatus,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub condition: Value,
    pub cost: u64,
    pub created_at: DateTime<Utc>,
    pub transport: TransportInfo,
}

/// Transport details reported for an existing subscription.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportInfo {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a subscription as reported by the control plane.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Enabled,
    WebhookCallbackVerificationPending,
    AuthorizationRevoked,
    UserRemoved,
    VersionRemoved,
    /// Statuses added by the service after this crate was published.
    #[serde(other)]
    Unknown,
}

/// Optional filters for the subscription list.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SubscriptionFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SubscriptionFilter {
    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Errors produced by control-plane requests.
#[derive(Debug, Error)]
pub enum HelixError {
    /// Network-level failure before a status could be read.
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    /// The request was rejected as invalid (HTTP 400).
    #[error("helix rejected the request: {reason}")]
    InvalidRequest { reason: String },

    /// The token or client id was not accepted (HTTP 401).
    #[error("helix authorization failed: {reason}")]
    Unauthorized { reason: String },

    /// The referenced subscription does not exist (HTTP 404).
    #[error("subscription not found: {reason}")]
    NotFound { reason: String },

    /// Any status outside the documented contract.
    #[error("unexpected status {status}: {reason}")]
    UnexpectedStatus { status: StatusCode, reason: String },

    /// A success response carried a body this crate could not parse.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl HelixError {
    /// Status and reason for the status-mapped variants, `None` for
    /// transport and parse failures.
    pub fn status_and_reason(&self) -> Option<(StatusCode, &str)> {
        match self {
            Self::InvalidRequest { reason } => Some((StatusCode::BAD_REQUEST, reason)),
            Self::Unauthorized { reason } => Some((StatusCode::UNAUTHORIZED, reason)),
            Self::NotFound { reason } => Some((StatusCode::NOT_FOUND, reason)),
            Self::UnexpectedStatus { status, reason } => Some((*status, reason)),
            Self::Transport(_) | Self::Parse(_) => None,
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> HelixError {
    let reason = summarize_error_body(body);
    match status {
        StatusCode::BAD_REQUEST => HelixError::InvalidRequest { reason },
        StatusCode::UNAUTHORIZED => HelixError::Unauthorized { reason },
        StatusCode::NOT_FOUND => HelixError::NotFound { reason },
        _ => HelixError::UnexpectedStatus { status, reason },
    }
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message.filter(|m| !m.is_empty()).or(parsed.error) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use secrecy::SecretString;
    use serde_json::json;

    use super::{
        status_error, summarize_error_body, CreateSubscriptionRequest, HelixClient, HelixError,
        ListSubscriptionsResponse, Subscription, SubscriptionFilter, SubscriptionStatus,
        TransportRequest, HELIX_BASE_URL,
    };

    fn sample_subscription_json() -> serde_json::Value {
        json!({
            "id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
            "status": "enabled",
            "type": "channel.chat.message",
            "version": "1",
            "condition": { "broadcaster_user_id": "1337", "user_id": "9001" },
            "created_at": "2023-07-19T14:56:51.616329898Z",
            "cost": 1,
            "transport": {
                "method": "websocket",
                "session_id": "AQoQILE98gtqShGmLD7AM6yJThAB"
            }
        })
    }

    #[test]
    fn client_uses_production_base_url_by_default() {
        let client = HelixClient::new(
            SecretString::new("test-token".to_string()),
            "test-client-id",
        )
        .expect("build client");
        assert_eq!(client.base_url(), HELIX_BASE_URL);
    }

    #[test]
    fn base_url_override_is_normalized() {
        let client = HelixClient::new(
            SecretString::new("test-token".to_string()),
            "test-client-id",
        )
        .expect("build client")
        .with_base_url("http://localhost:9090/ \n");
        assert_eq!(client.base_url(), "http://localhost:9090");
    }

    #[test]
    fn create_request_serializes_type_tag() {
        let request = CreateSubscriptionRequest {
            kind: "channel.chat.message".to_string(),
            version: "1".to_string(),
            condition: json!({ "broadcaster_user_id": "1337" }),
            transport: TransportRequest::websocket("abc"),
        };

        let value = serde_json::to_value(request).expect("serialize request");
        assert_eq!(
            value.get("type").and_then(|v| v.as_str()),
            Some("channel.chat.message")
        );
        assert!(value.get("kind").is_none());
        assert_eq!(
            value.pointer("/transport/method").and_then(|v| v.as_str()),
            Some("websocket")
        );
        assert_eq!(
            value.pointer("/transport/session_id").and_then(|v| v.as_str()),
            Some("abc")
        );
    }

    #[test]
    fn subscription_deserializes_documented_shape() {
        let subscription: Subscription =
            serde_json::from_value(sample_subscription_json()).expect("deserialize subscription");
        assert_eq!(subscription.kind, "channel.chat.message");
        assert_eq!(subscription.status, SubscriptionStatus::Enabled);
        assert_eq!(subscription.cost, 1);
        assert_eq!(
            subscription.transport.session_id.as_deref(),
            Some("AQoQILE98gtqShGmLD7AM6yJThAB")
        );
    }

    #[test]
    fn unrecognized_status_maps_to_unknown() {
        let status: SubscriptionStatus =
            serde_json::from_value(json!("moderator_removed")).expect("deserialize status");
        assert_eq!(status, SubscriptionStatus::Unknown);
    }

    #[test]
    fn list_response_defaults_missing_pagination() {
        let page: ListSubscriptionsResponse = serde_json::from_value(json!({
            "data": [sample_subscription_json()],
            "total": 1,
            "total_cost": 1,
            "max_total_cost": 10
        }))
        .expect("deserialize page");
        assert_eq!(page.data.len(), 1);
        assert!(page.pagination.cursor.is_none());
    }

    #[test]
    fn filter_serializes_only_set_fields() {
        let filter = SubscriptionFilter::default()
            .with_status(SubscriptionStatus::Enabled)
            .for_user("9001");
        let value = serde_json::to_value(filter).expect("serialize filter");
        assert_eq!(value.get("status").and_then(|v| v.as_str()), Some("enabled"));
        assert_eq!(value.get("user_id").and_then(|v| v.as_str()), Some("9001"));
        assert!(value.get("type").is_none());
    }

    #[test]
    fn delete_failure_statuses_map_to_distinct_errors() {
        let body = r#"{"error":"Not Found","status":404,"message":"subscription not found"}"#;
        match status_error(StatusCode::NOT_FOUND, body) {
            HelixError::NotFound { reason } => assert_eq!(reason, "subscription not found"),
            other => panic!("unexpected error variant: {other:?}"),
        }

        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "{}"),
            HelixError::InvalidRequest { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "{}"),
            HelixError::Unauthorized { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "{}"),
            HelixError::UnexpectedStatus { .. }
        ));
    }

    #[test]
    fn error_body_summary_prefers_message_field() {
        assert_eq!(
            summarize_error_body(r#"{"error":"Unauthorized","message":"invalid token"}"#),
            "invalid token"
        );
        assert_eq!(summarize_error_body("plain text body"), "plain text body");
    }
}
