//! Payment Adapter — Hosted Redirect (spec §4.6).
//!
//! Per-process caches for the access token (proactively refreshed 30s
//! before expiry) and the notification-endpoint id (registered lazily on
//! first use, then memoized). Both are best-effort: a new process re-earns
//! them, and concurrent first-use racing to populate them is acceptable —
//! one wasted refresh is harmless (spec §5, §4.6).

use super::{HostedAdapter, TransactionStatus};
use crate::config::HostedConfig;
use crate::domain::Money;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(30) > now
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct EndpointResponse {
    notification_endpoint_id: String,
}

#[derive(Deserialize)]
struct OrderResponse {
    redirect_url: String,
    order_tracking_id: String,
}

#[derive(Deserialize, Default)]
struct StatusResponse {
    #[serde(default)]
    payment_status_description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    order_merchant_reference: Option<String>,
    #[serde(default)]
    merchant_reference: Option<String>,
    #[serde(default)]
    confirmation_code: Option<String>,
    #[serde(default)]
    order_tracking_id: Option<String>,
    #[serde(default)]
    payer_phone: Option<String>,
}

/// HTTP-backed hosted-redirect adapter.
pub struct HttpHostedAdapter {
    client: reqwest::Client,
    config: HostedConfig,
    token: Arc<RwLock<Option<CachedToken>>>,
    notification_endpoint_id: Arc<RwLock<Option<String>>>,
    /// `order_tracking_id -> booking_id`, so a later redirect callback can
    /// recover which booking an order belongs to even if the provider
    /// omits the merchant-reference alias.
    order_bookings: Arc<RwLock<std::collections::HashMap<String, String>>>,
}

impl HttpHostedAdapter {
    #[must_use]
    pub fn new(client: reqwest::Client, config: HostedConfig) -> Self {
        Self {
            client,
            config,
            token: Arc::new(RwLock::new(None)),
            notification_endpoint_id: Arc::new(RwLock::new(None)),
            order_bookings: Arc::new(RwLock::new(std::collections::HashMap::new())),
        }
    }

    async fn fetch_token(&self) -> Result<String, AppError> {
        {
            let cached = self.token.read().await;
            if let Some(cached) = cached.as_ref() {
                if cached.is_fresh(Utc::now()) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let (base_url, consumer_key, consumer_secret) = self.config.require_credentials()?;
        let url = format!("{base_url}/api/auth/oauth/token");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("consumer_key", consumer_key),
                ("consumer_secret", consumer_secret),
            ])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::PaymentError {
                provider: "hosted",
                code: format!("token request failed: {}", response.status()),
            });
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| AppError::PaymentError {
            provider: "hosted",
            code: format!("malformed token response: {e}"),
        })?;

        let cached = CachedToken {
            token: parsed.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(parsed.expires_in),
        };
        *self.token.write().await = Some(cached);
        Ok(parsed.access_token)
    }

    async fn fetch_notification_endpoint_id(&self, token: &str) -> Result<String, AppError> {
        {
            let cached = self.notification_endpoint_id.read().await;
            if let Some(id) = cached.as_ref() {
                return Ok(id.clone());
            }
        }

        let (base_url, _, _) = self.config.require_credentials()?;
        let callback_url = self
            .config
            .callback_url
            .as_ref()
            .ok_or_else(|| AppError::ConfigError("HOSTED_CALLBACK_URL not set".to_string()))?;

        let url = format!("{base_url}/api/URLSetup/RegisterIPN");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "url": callback_url,
                "ipn_notification_type": "GET",
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::PaymentError {
                provider: "hosted",
                code: format!("IPN registration failed: {}", response.status()),
            });
        }

        let parsed: EndpointResponse = response.json().await.map_err(|e| AppError::PaymentError {
            provider: "hosted",
            code: format!("malformed IPN response: {e}"),
        })?;

        *self.notification_endpoint_id.write().await = Some(parsed.notification_endpoint_id.clone());
        Ok(parsed.notification_endpoint_id)
    }

    fn status_is_success(status: &StatusResponse) -> bool {
        let description = status
            .payment_status_description
            .as_deref()
            .or(status.status.as_deref())
            .unwrap_or_default();
        description.eq_ignore_ascii_case("completed")
    }
}

#[async_trait]
impl HostedAdapter for HttpHostedAdapter {
    async fn get_payment_link(
        &self,
        booking_id: &str,
        amount: Money,
        description: &str,
    ) -> Result<String, AppError> {
        let (base_url, _, _) = self.config.require_credentials()?;
        let mut token = self.fetch_token().await?;
        let mut endpoint_id = self.fetch_notification_endpoint_id(&token).await?;

        let url = format!("{base_url}/api/Transactions/SubmitOrderRequest");
        let submit = |token: String, endpoint_id: String| {
            let body = serde_json::json!({
                "id": booking_id,
                "currency": "KES",
                "amount": amount.cents() as f64 / 100.0,
                "description": description,
                "notification_id": endpoint_id,
            });
            let client = self.client.clone();
            let url = url.clone();
            async move {
                client
                    .post(&url)
                    .bearer_auth(token)
                    .json(&body)
                    .timeout(Duration::from_secs(30))
                    .send()
                    .await
                    .map_err(|e| AppError::ProviderUnavailable(e.to_string()))
            }
        };

        let mut response = submit(token.clone(), endpoint_id.clone()).await?;

        // Transparent re-auth on 401 (spec §4.6).
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            *self.token.write().await = None;
            token = self.fetch_token().await?;
            *self.notification_endpoint_id.write().await = None;
            endpoint_id = self.fetch_notification_endpoint_id(&token).await?;
            response = submit(token, endpoint_id).await?;
        }

        if !response.status().is_success() {
            return Err(AppError::PaymentError {
                provider: "hosted",
                code: format!("order submission failed: {}", response.status()),
            });
        }

        let parsed: OrderResponse = response.json().await.map_err(|e| AppError::PaymentError {
            provider: "hosted",
            code: format!("malformed order response: {e}"),
        })?;

        self.order_bookings
            .write()
            .await
            .insert(parsed.order_tracking_id, booking_id.to_string());

        Ok(parsed.redirect_url)
    }

    async fn get_transaction_status(
        &self,
        order_tracking_id: &str,
    ) -> Result<TransactionStatus, AppError> {
        let (base_url, _, _) = self.config.require_credentials()?;
        let mut token = self.fetch_token().await?;

        let url = format!("{base_url}/api/Transactions/GetStatus");
        let mut response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("orderTrackingId", order_tracking_id)])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            *self.token.write().await = None;
            token = self.fetch_token().await?;
            response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("orderTrackingId", order_tracking_id)])
                .timeout(Duration::from_secs(30))
                .send()
                .await
                .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;
        }

        if !response.status().is_success() {
            return Err(AppError::PaymentError {
                provider: "hosted",
                code: format!("status query failed: {}", response.status()),
            });
        }

        let parsed: StatusResponse = response.json().await.map_err(|e| AppError::PaymentError {
            provider: "hosted",
            code: format!("malformed status response: {e}"),
        })?;

        let fallback_booking = self
            .order_bookings
            .read()
            .await
            .get(order_tracking_id)
            .cloned();

        Ok(TransactionStatus {
            completed: Self::status_is_success(&parsed),
            // spec §4.6: order_merchant_reference | merchant_reference |
            // confirmation_code, in that order; the correlation cache is an
            // extra safety net beneath the three provider-documented legs.
            merchant_reference: parsed
                .order_merchant_reference
                .or(parsed.merchant_reference)
                .or_else(|| parsed.confirmation_code.clone())
                .or(fallback_booking),
            confirmation_code: parsed.confirmation_code.or(parsed.order_tracking_id),
            payer_phone: parsed.payer_phone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_completed_is_case_insensitive() {
        let status = StatusResponse {
            status: Some("COMPLETED".to_string()),
            ..StatusResponse::default()
        };
        assert!(HttpHostedAdapter::status_is_success(&status));
    }

    #[test]
    fn status_pending_is_not_success() {
        let status = StatusResponse {
            status: Some("PENDING".to_string()),
            ..StatusResponse::default()
        };
        assert!(!HttpHostedAdapter::status_is_success(&status));
    }
}
