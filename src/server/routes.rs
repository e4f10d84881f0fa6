//! HTTP routes (SPEC_FULL §E.3): thin axum handlers that parse wire
//! payloads and delegate to [`crate::webhooks::WebhookIngress`]. Routing
//! itself is deliberately minimal plumbing — every decision of substance
//! lives in the Webhook Ingress and Conversation Controller.

use super::state::AppState;
use crate::messaging::{InboundKind, InboundMessage};
use crate::webhooks::StkWebhookPayload;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

/// Builds the full router (spec §6, SPEC_FULL §E.3).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(verify_messaging_webhook).post(receive_user_message))
        .route("/webhooks/:stk", post(receive_stk_webhook))
        .route("/webhooks/:hosted", get(verify_hosted_webhook).post(receive_hosted_webhook))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.verify_token")]
    verify_token: String,
    #[serde(rename = "hub.challenge")]
    challenge: String,
}

async fn verify_messaging_webhook(State(state): State<AppState>, Query(query): Query<VerifyQuery>) -> Response {
    match state
        .webhooks
        .verify_subscription(&query.mode, &query.verify_token, &query.challenge, &state.messaging_verify_token)
    {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => StatusCode::FORBIDDEN.into_response(),
    }
}

#[derive(Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Deserialize)]
struct ReplyBody {
    id: String,
}

#[derive(Deserialize)]
struct InteractiveBody {
    button_reply: Option<ReplyBody>,
    list_reply: Option<ReplyBody>,
}

#[derive(Deserialize)]
struct InboundMessageBody {
    from: String,
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    text: Option<TextBody>,
    interactive: Option<InteractiveBody>,
}

impl From<InboundMessageBody> for InboundMessage {
    fn from(wire: InboundMessageBody) -> Self {
        if wire.kind == "text" {
            return Self {
                phone: wire.from,
                kind: InboundKind::Text,
                body: wire.text.map(|t| t.body).unwrap_or_default(),
                id: wire.id,
            };
        }

        let reply = wire
            .interactive
            .and_then(|i| i.button_reply.or(i.list_reply));
        Self {
            phone: wire.from,
            kind: InboundKind::Interactive,
            body: reply.as_ref().map_or_else(String::new, |r| r.id.clone()),
            id: reply.map(|r| r.id),
        }
    }
}

/// Always replies 200 regardless of processing outcome (spec §4.10).
async fn receive_user_message(State(state): State<AppState>, Json(body): Json<InboundMessageBody>) -> StatusCode {
    state.webhooks.handle_user_message(body.into()).await;
    StatusCode::OK
}

#[derive(Deserialize)]
struct StkWebhookBody {
    challenge: String,
    state: String,
    api_ref: String,
    invoice_id: String,
    account: Option<String>,
}

async fn receive_stk_webhook(State(state): State<AppState>, Json(body): Json<StkWebhookBody>) -> &'static str {
    let payload = StkWebhookPayload {
        challenge: body.challenge,
        state: body.state,
        api_ref: body.api_ref,
        invoice_id: body.invoice_id,
        account: body.account,
    };
    state.webhooks.handle_stk_webhook(payload).await
}

/// Same two fields, all optional — used to pull `OrderTrackingId`/
/// `OrderNotificationType` out of either the query string or a JSON body
/// (spec.md line 180: the POST leg accepts them "via query or body").
#[derive(Deserialize, Default)]
struct HostedWebhookFields {
    #[serde(rename = "OrderTrackingId", default)]
    order_tracking_id: Option<String>,
    #[serde(rename = "OrderNotificationType", default)]
    order_notification_type: Option<String>,
}

impl HostedWebhookFields {
    fn merge(self, other: Self) -> Self {
        Self {
            order_tracking_id: self.order_tracking_id.or(other.order_tracking_id),
            order_notification_type: self.order_notification_type.or(other.order_notification_type),
        }
    }
}

/// Both the GET and POST legs accept `OrderTrackingId`/`OrderNotificationType`
/// via query or body (spec.md line 180); query is tried first, body is the
/// fallback.
async fn verify_hosted_webhook(
    State(state): State<AppState>,
    Query(from_query): Query<HostedWebhookFields>,
    body: Bytes,
) -> Response {
    let from_body: HostedWebhookFields = serde_json::from_slice(&body).unwrap_or_default();
    let fields = from_query.merge(from_body);

    let Some(order_tracking_id) = fields.order_tracking_id else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let order_notification_type = fields.order_notification_type.unwrap_or_default();

    let echo = state
        .webhooks
        .handle_hosted_verification(&order_tracking_id, &order_notification_type);
    Json(echo).into_response()
}

async fn receive_hosted_webhook(
    State(state): State<AppState>,
    Query(from_query): Query<HostedWebhookFields>,
    body: Bytes,
) -> Response {
    let from_body: HostedWebhookFields = serde_json::from_slice(&body).unwrap_or_default();
    let fields = from_query.merge(from_body);

    let Some(order_tracking_id) = fields.order_tracking_id else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let order_notification_type = fields.order_notification_type.unwrap_or_default();

    let echo = state
        .webhooks
        .handle_hosted_webhook(&order_tracking_id, &order_notification_type)
        .await;
    Json(echo).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => StatusCode::OK,
        Err(error) => {
            tracing::error!(%error, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test code
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = Router::new().route("/healthz", get(super::healthz));
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
