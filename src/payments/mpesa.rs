//! Payment Adapter — Mobile STK (spec §4.5).

use super::{retry_with_backoff, RetryPolicy, StkAdapter, StkInitiation};
use crate::config::StkConfig;
use crate::domain::Money;
use crate::domain::phone;
use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Provider error code surfaced distinctly per spec §4.5.
const BUSINESS_NOT_ELIGIBLE: &str = "BusinessNotEligible";

#[derive(Deserialize)]
struct StkResponseBody {
    #[serde(default)]
    invoice_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// HTTP-backed STK push adapter.
pub struct HttpStkAdapter {
    client: reqwest::Client,
    base_url: String,
    config: StkConfig,
}

impl HttpStkAdapter {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: String, config: StkConfig) -> Self {
        Self {
            client,
            base_url,
            config,
        }
    }
}

#[async_trait]
impl StkAdapter for HttpStkAdapter {
    async fn initiate(
        &self,
        phone: &str,
        amount: Money,
        api_ref: &str,
    ) -> Result<StkInitiation, AppError> {
        if !phone::validate(phone) {
            return Err(AppError::InvalidPhone);
        }
        let (publishable_key, secret_key) = self.config.require_credentials()?;
        let normalized = phone::normalize(phone)?;

        let url = format!("{}/stkpush", self.base_url);
        let body = serde_json::json!({
            "phone_number": normalized,
            "amount": amount.cents() as f64 / 100.0,
            "api_ref": api_ref,
            "test_mode": self.config.is_test,
        });

        let response = retry_with_backoff(RetryPolicy::default(), || async {
            self.client
                .post(&url)
                .basic_auth(publishable_key, Some(secret_key))
                .json(&body)
                .timeout(Duration::from_secs(30))
                .send()
                .await
                .map_err(|e| AppError::ProviderUnavailable(e.to_string()))
        })
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let parsed: StkResponseBody = response.json().await.unwrap_or(StkResponseBody {
                invoice_id: None,
                status: None,
                error_code: None,
                error_message: None,
            });
            let code = parsed
                .error_code
                .or(parsed.error_message)
                .unwrap_or_else(|| status.to_string());
            let code = if code.contains("not eligible") || code == BUSINESS_NOT_ELIGIBLE {
                BUSINESS_NOT_ELIGIBLE.to_string()
            } else {
                code
            };
            return Err(AppError::PaymentError {
                provider: "mpesa",
                code,
            });
        }

        let parsed: StkResponseBody = response
            .json()
            .await
            .map_err(|e| AppError::PaymentError {
                provider: "mpesa",
                code: format!("malformed response: {e}"),
            })?;

        Ok(StkInitiation {
            invoice_id: parsed.invoice_id.ok_or_else(|| AppError::PaymentError {
                provider: "mpesa",
                code: "missing invoice_id".to_string(),
            })?,
            status: parsed.status.unwrap_or_else(|| "PENDING".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_not_eligible_is_distinguished() {
        assert_eq!(BUSINESS_NOT_ELIGIBLE, "BusinessNotEligible");
    }
}
