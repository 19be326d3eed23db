//! Subscription registration against the control plane, with cost tracking.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::helix::{
    CreateSubscriptionRequest, HelixClient, HelixError, Subscription, SubscriptionFilter,
    TransportRequest,
};

/// Server-declared cost ceiling versus what the account has consumed.
///
/// The accounting is advisory: the service enforces the hard limit, so a
/// breach here is logged and reported but never blocks a registration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Quota {
    pub max_total_cost: u64,
    pub consumed_cost: u64,
}

impl Quota {
    /// True once consumed cost has reached the server-declared ceiling.
    pub fn is_exhausted(&self) -> bool {
        self.max_total_cost > 0 && self.consumed_cost >= self.max_total_cost
    }
}

/// Errors produced by register/unregister/list calls.
///
/// None of these are fatal to the websocket connection, and none are retried
/// here; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("control plane call failed: {0}")]
    Helix(#[from] HelixError),

    #[error("control plane accepted the subscription but returned no record")]
    EmptyResponse,

    #[error("unregistering `{id}` failed with status {status}: {reason}")]
    UnregisterFailed {
        id: String,
        status: reqwest::StatusCode,
        reason: String,
    },
}

/// Issues subscribe/unsubscribe/list calls and tracks subscription cost.
///
/// The quota is replaced wholesale from every creation response; the server
/// is authoritative for both the ceiling and the consumed total.
pub struct SubscriptionRegistrar {
    helix: HelixClient,
    quota: Quota,
}

impl SubscriptionRegistrar {
    pub fn new(helix: HelixClient) -> Self {
        Self {
            helix,
            quota: Quota::default(),
        }
    }

    /// Current cost accounting, as of the last creation response.
    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Registers a subscription delivered over the websocket session
    /// identified by `session_id`.
    ///
    /// Does not consult `list` first; callers that want to avoid duplicate
    /// registrations can pre-check with [`SubscriptionRegistrar::list`].
    pub async fn register(
        &mut self,
        kind: &str,
        version: &str,
        condition: Value,
        session_id: &str,
    ) -> Result<Subscription, RegistrationError> {
        let request = CreateSubscriptionRequest {
            kind: kind.to_string(),
            version: version.to_string(),
            condition,
            transport: TransportRequest::websocket(session_id),
        };

        let response = self.helix.create_subscription(&request).await?;
        self.quota = Quota {
            max_total_cost: response.max_total_cost,
            consumed_cost: response.total_cost,
        };

        let subscription = response
            .data
            .into_iter()
            .next()
            .ok_or(RegistrationError::EmptyResponse)?;

        debug!(
            event = "subscription_registered",
            id = %subscription.id,
            kind,
            cost = subscription.cost,
        );

        if self.quota.is_exhausted() {
            warn!(
                event = "subscription_quota_exhausted",
                consumed_cost = self.quota.consumed_cost,
                max_total_cost = self.quota.max_total_cost,
            );
        }

        Ok(subscription)
    }

    /// Deletes a subscription by id. Success is exactly HTTP 204; any other
    /// status surfaces as [`RegistrationError::UnregisterFailed`].
    pub async fn unregister(&mut self, id: &str) -> Result<(), RegistrationError> {
        match self.helix.delete_subscription(id).await {
            Ok(()) => {
                debug!(event = "subscription_unregistered", id);
                Ok(())
            }
            Err(err) => match err.status_and_reason() {
                Some((status, reason)) => Err(RegistrationError::UnregisterFailed {
                    id: id.to_string(),
                    status,
                    reason: reason.to_string(),
                }),
                None => Err(RegistrationError::Helix(err)),
            },
        }
    }

    /// Lists existing subscriptions matching `filter`, all pages.
    pub async fn list(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>, RegistrationError> {
        Ok(self.helix.list_subscriptions(filter).await?)
    }
}
