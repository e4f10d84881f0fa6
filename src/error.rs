//! The closed error set shared by every component.
//!
//! Mirrors the teacher's `composable_rust_web::error::AppError` shape: one
//! type, one place (the webhook edge) that knows how to turn it into a
//! wire-level response. Every other component returns `Result<T, AppError>`
//! and never panics.

/// Errors produced anywhere in the concierge. Deliberately a closed set —
/// see spec §7. New variants should not be added casually; most failures
/// the provider adapters see collapse into `PaymentError` or
/// `ProviderUnavailable`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A phone string didn't normalize or didn't pass the operator-prefix check.
    #[error("invalid phone number")]
    InvalidPhone,

    /// User-supplied input was syntactically or semantically wrong (bad
    /// quantity, unknown category, malformed webhook body).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced entity doesn't exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity exists but isn't in a state the requested operation allows.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An optimistic-lock conditional update affected zero rows because
    /// another writer got there first, in a context where that's a real
    /// conflict rather than an idempotent no-op (e.g. `cancelBooking`).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A conditional update lost the race to another writer in a context
    /// where the caller should simply re-read and return the winner's
    /// result (the `completeBooking` idempotency path, spec §4.7 step 4(a)).
    #[error("already processed")]
    AlreadyProcessed,

    /// The unique-code generator exhausted its collision-retry budget.
    #[error("ticket code generation exhausted")]
    CodeGenerationExhausted,

    /// A payment provider rejected or failed a request.
    #[error("payment error ({provider}): {code}")]
    PaymentError {
        /// Which provider raised it (`mpesa` or `hosted`).
        provider: &'static str,
        /// Provider-supplied or locally-classified error code.
        code: String,
    },

    /// A provider (or our own backing store) could not be reached at all.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Anything else — database errors, serialization errors, bugs.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// True for the two kinds that the Conversation Controller shows the
    /// user a corrective message for and otherwise tolerates (spec §7).
    #[must_use]
    pub const fn is_corrective(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::InvalidState(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::ProviderUnavailable(err.to_string())
    }
}

/// Masks a normalized phone number for logging, keeping the last 4 digits.
///
/// `254712345678` -> `2547********5678`... kept simple: everything but the
/// last 4 characters is replaced with `*`.
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let len = phone.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }
    let tail: String = phone.chars().skip(len - 4).collect();
    format!("{}{tail}", "*".repeat(len - 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_all_but_last_four() {
        assert_eq!(mask_phone("254712345678"), "********5678");
    }

    #[test]
    fn short_strings_mask_entirely() {
        assert_eq!(mask_phone("123"), "***");
    }
}
