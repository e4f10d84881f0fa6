//! Messaging-platform client (spec §6): outbound message construction and
//! inbound normalization, kept deliberately thin — the wire protocol of
//! the concrete messaging platform is out of core scope, but SOMETHING has
//! to send the bytes, so this is the ambient HTTP client for it, grounded
//! in the teacher's `reqwest`-based provider-adapter style (same shape as
//! `payments::mpesa`/`payments::hosted`).

use crate::domain::phone;
use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BUTTON_TITLE_LIMIT: usize = 20;
const BUTTON_ID_LIMIT: usize = 256;
const LIST_ROW_TITLE_LIMIT: usize = 24;
const LIST_ROW_DESCRIPTION_LIMIT: usize = 72;
const LIST_ROW_ID_LIMIT: usize = 200;
const LIST_SECTION_TITLE_LIMIT: usize = 24;
const LIST_ACTION_TEXT_LIMIT: usize = 20;
const MAX_LIST_ROWS: usize = 10;
const MAX_BUTTONS: usize = 3;

/// Truncates `s` to `limit` characters, appending `...` when it was cut
/// (spec §6: "truncate to (limit−3) and append `...`").
#[must_use]
pub fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let keep = limit.saturating_sub(3);
    let truncated: String = s.chars().take(keep).collect();
    format!("{truncated}...")
}

/// One row of an interactive list message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: String,
}

impl ListRow {
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: truncate(&id.into(), LIST_ROW_ID_LIMIT),
            title: truncate(&title.into(), LIST_ROW_TITLE_LIMIT),
            description: truncate(&description.into(), LIST_ROW_DESCRIPTION_LIMIT),
        }
    }
}

/// One button of an interactive button message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: truncate(&id.into(), BUTTON_ID_LIMIT),
            title: truncate(&title.into(), BUTTON_TITLE_LIMIT),
        }
    }
}

/// Outbound message kinds the concierge sends (spec §6).
#[derive(Clone, Debug)]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<Button>,
    },
    List {
        body: String,
        section_title: String,
        action_text: String,
        rows: Vec<ListRow>,
    },
    Image {
        media_id: String,
        caption: Option<String>,
    },
}

impl OutboundMessage {
    /// A plain text message.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// An interactive button message; `buttons` is capped to
    /// [`MAX_BUTTONS`] (spec §6: "1-3 buttons").
    #[must_use]
    pub fn buttons(body: impl Into<String>, mut buttons: Vec<Button>) -> Self {
        buttons.truncate(MAX_BUTTONS);
        Self::Buttons {
            body: body.into(),
            buttons,
        }
    }

    /// An interactive list message; `rows` is capped to [`MAX_LIST_ROWS`]
    /// (spec §6: "1-10 rows total").
    #[must_use]
    pub fn list(
        body: impl Into<String>,
        section_title: impl Into<String>,
        action_text: impl Into<String>,
        mut rows: Vec<ListRow>,
    ) -> Self {
        rows.truncate(MAX_LIST_ROWS);
        Self::List {
            body: body.into(),
            section_title: truncate(&section_title.into(), LIST_SECTION_TITLE_LIMIT),
            action_text: truncate(&action_text.into(), LIST_ACTION_TEXT_LIMIT),
            rows,
        }
    }
}

/// Kind of an inbound message, per the §6 normalization table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundKind {
    Text,
    Interactive,
}

/// A normalized inbound message: `(phone, type, body, id?)` (spec §6).
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub phone: String,
    pub kind: InboundKind,
    pub body: String,
    pub id: Option<String>,
}

impl InboundMessage {
    /// Resolves the payload the controller should act on: the interactive
    /// id if present, else the body (spec §4.9: "resolve inputs as id,
    /// falling back to body").
    #[must_use]
    pub fn payload(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.body)
    }
}

/// Messaging-platform client contract.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Sends `message` to `phone` (normalized before transmission).
    async fn send(&self, phone: &str, message: OutboundMessage) -> Result<(), AppError>;

    /// Uploads `bytes` (a PNG, in this system's only caller) and returns a
    /// media id usable in a subsequent [`OutboundMessage::Image`] send.
    async fn upload_media(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, AppError>;

    /// Marks `message_id` as read. Best-effort; the Webhook Ingress sends
    /// this fire-and-forget (spec §4.10).
    async fn mark_read(&self, message_id: &str) -> Result<(), AppError>;
}

#[derive(Serialize)]
struct SendEnvelope<'a> {
    messaging_product: &'a str,
    to: &'a str,
    #[serde(flatten)]
    payload: serde_json::Value,
}

/// HTTP-backed messaging client.
pub struct HttpMessagingClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    phone_number_id: String,
}

impl HttpMessagingClient {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: String, access_token: String, phone_number_id: String) -> Self {
        Self {
            client,
            base_url,
            access_token,
            phone_number_id,
        }
    }

    fn to_payload(message: &OutboundMessage) -> serde_json::Value {
        match message {
            OutboundMessage::Text { body } => serde_json::json!({
                "type": "text",
                "text": { "body": body },
            }),
            OutboundMessage::Buttons { body, buttons } => serde_json::json!({
                "type": "interactive",
                "interactive": {
                    "type": "button",
                    "body": { "text": body },
                    "action": {
                        "buttons": buttons.iter().map(|b| serde_json::json!({
                            "type": "reply",
                            "reply": { "id": b.id, "title": b.title },
                        })).collect::<Vec<_>>(),
                    },
                },
            }),
            OutboundMessage::List {
                body,
                section_title,
                action_text,
                rows,
            } => serde_json::json!({
                "type": "interactive",
                "interactive": {
                    "type": "list",
                    "body": { "text": body },
                    "action": {
                        "button": action_text,
                        "sections": [{
                            "title": section_title,
                            "rows": rows.iter().map(|r| serde_json::json!({
                                "id": r.id, "title": r.title, "description": r.description,
                            })).collect::<Vec<_>>(),
                        }],
                    },
                },
            }),
            OutboundMessage::Image { media_id, caption } => serde_json::json!({
                "type": "image",
                "image": { "id": media_id, "caption": caption },
            }),
        }
    }
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn send(&self, phone: &str, message: OutboundMessage) -> Result<(), AppError> {
        let normalized = phone::normalize(phone)?;
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let envelope = SendEnvelope {
            messaging_product: "whatsapp",
            to: &normalized,
            payload: Self::to_payload(&message),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&envelope)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::ProviderUnavailable(format!(
                "messaging send failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn upload_media(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, AppError> {
        let url = format!("{}/{}/media", self.base_url, self.phone_number_id);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("ticket.png")
            .mime_str(content_type)
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .multipart(form)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::ProviderUnavailable(format!(
                "media upload failed: {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct MediaResponse {
            id: String,
        }
        let parsed: MediaResponse = response
            .json()
            .await
            .map_err(|e| AppError::InternalError(format!("malformed media response: {e}")))?;
        Ok(parsed.id)
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), AppError> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "messaging_product": "whatsapp",
                "status": "read",
                "message_id": message_id,
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::ProviderUnavailable(format!(
                "mark-read failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_strings_alone() {
        assert_eq!(truncate("hi", 20), "hi");
    }

    #[test]
    fn truncate_cuts_and_appends_ellipsis() {
        let long = "a".repeat(30);
        let truncated = truncate(&long, 20);
        assert_eq!(truncated.chars().count(), 20);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn button_list_caps_at_three() {
        let buttons = (0..5).map(|i| Button::new(format!("b{i}"), format!("B{i}"))).collect();
        match OutboundMessage::buttons("pick one", buttons) {
            OutboundMessage::Buttons { buttons, .. } => assert_eq!(buttons.len(), 3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn list_caps_at_ten_rows() {
        let rows = (0..15).map(|i| ListRow::new(format!("r{i}"), format!("R{i}"), "desc")).collect();
        match OutboundMessage::list("choose", "Section", "Open", rows) {
            OutboundMessage::List { rows, .. } => assert_eq!(rows.len(), 10),
            _ => unreachable!(),
        }
    }

    #[test]
    fn payload_prefers_id_over_body() {
        let msg = InboundMessage {
            phone: "254712345678".to_string(),
            kind: InboundKind::Interactive,
            body: "University".to_string(),
            id: Some("UNIVERSITY".to_string()),
        };
        assert_eq!(msg.payload(), "UNIVERSITY");
    }

    #[test]
    fn payload_falls_back_to_body_for_text() {
        let msg = InboundMessage {
            phone: "254712345678".to_string(),
            kind: InboundKind::Text,
            body: "hi".to_string(),
            id: None,
        };
        assert_eq!(msg.payload(), "hi");
    }
}
