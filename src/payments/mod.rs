//! Payment adapters (spec §4.5, §4.6): two providers with divergent flows
//! behind a common outward error shape.
//!
//! `retry` is grounded in the teacher's `composable_rust_runtime::retry`
//! module: exponential backoff with a cap, used here for the handful of
//! transient-failure-prone HTTP calls each adapter makes (token fetch,
//! order submission, status polling).

pub mod hosted;
pub mod mpesa;
mod retry;

pub use hosted::HttpHostedAdapter;
pub use mpesa::HttpStkAdapter;
pub use retry::{retry_with_backoff, RetryPolicy};

use crate::domain::Money;
use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of the mobile STK push initiation (spec §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StkInitiation {
    pub invoice_id: String,
    pub status: String,
}

/// Mobile-STK adapter contract.
#[async_trait]
pub trait StkAdapter: Send + Sync {
    /// Pushes a payment prompt to `phone` for `amount`. `api_ref` is the
    /// booking id, echoed by the provider's webhook as the correlation key.
    async fn initiate(
        &self,
        phone: &str,
        amount: Money,
        api_ref: &str,
    ) -> Result<StkInitiation, AppError>;
}

/// Transaction status as reported by the hosted-redirect provider (spec §4.6).
#[derive(Clone, Debug)]
pub struct TransactionStatus {
    pub completed: bool,
    /// The booking id, echoed back under one of several field name aliases
    /// depending on provider response-shape variant.
    pub merchant_reference: Option<String>,
    /// The payment reference, likewise aliased across variants.
    pub confirmation_code: Option<String>,
    pub payer_phone: Option<String>,
}

/// Hosted-redirect adapter contract.
#[async_trait]
pub trait HostedAdapter: Send + Sync {
    /// Mints a hosted-payment URL for `booking`.
    async fn get_payment_link(
        &self,
        booking_id: &str,
        amount: Money,
        description: &str,
    ) -> Result<String, AppError>;

    /// Queries transaction status for a previously-minted order.
    async fn get_transaction_status(
        &self,
        order_tracking_id: &str,
    ) -> Result<TransactionStatus, AppError>;
}
