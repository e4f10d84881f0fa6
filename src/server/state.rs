//! Shared application state threaded through axum handlers (spec §6, §9:
//! "each is a value constructed at program start... threaded as a
//! dependency — no process-wide mutable globals").

use crate::webhooks::WebhookIngress;
use sqlx::PgPool;
use std::sync::Arc;

/// Everything a route handler needs.
#[derive(Clone)]
pub struct AppState {
    pub webhooks: Arc<WebhookIngress>,
    pub pool: PgPool,
    pub messaging_verify_token: Arc<str>,
}
