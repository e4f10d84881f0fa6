//! Webhook Ingress (spec §4.10): turns the three inbound HTTP surfaces
//! into calls on the Conversation Controller and Booking Engine, keeping
//! the provider-specific acknowledgement shapes exactly as spec §6/§7
//! requires. HTTP routing itself lives in [`crate::server`]; this module
//! is the transport-agnostic core those routes call into.

use crate::booking::BookingEngine;
use crate::catalog::CatalogQuery;
use crate::conversation::ConversationController;
use crate::domain::BookingId;
use crate::messaging::{InboundMessage, MessagingClient};
use crate::payments::HostedAdapter;
use crate::tickets;
use crate::users::UserDirectory;
use std::sync::Arc;

/// STK provider webhook fields (spec §6).
#[derive(Clone, Debug)]
pub struct StkWebhookPayload {
    pub challenge: String,
    pub state: String,
    pub api_ref: String,
    pub invoice_id: String,
    pub account: Option<String>,
}

/// Echo-shape response every hosted-redirect webhook call returns (spec §6/§4.10).
#[derive(Clone, Debug, serde::Serialize)]
pub struct HostedEchoResponse {
    #[serde(rename = "orderNotificationType")]
    pub order_notification_type: String,
    #[serde(rename = "orderTrackingId")]
    pub order_tracking_id: String,
    pub status: u16,
}

pub struct WebhookIngress {
    controller: Arc<ConversationController>,
    booking: Arc<BookingEngine>,
    catalog: Arc<dyn CatalogQuery>,
    users: Arc<dyn UserDirectory>,
    hosted: Arc<dyn HostedAdapter>,
    messaging: Arc<dyn MessagingClient>,
}

impl WebhookIngress {
    #[must_use]
    pub fn new(
        controller: Arc<ConversationController>,
        booking: Arc<BookingEngine>,
        catalog: Arc<dyn CatalogQuery>,
        users: Arc<dyn UserDirectory>,
        hosted: Arc<dyn HostedAdapter>,
        messaging: Arc<dyn MessagingClient>,
    ) -> Self {
        Self {
            controller,
            booking,
            catalog,
            users,
            hosted,
            messaging,
        }
    }

    /// Verification handshake for `GET /webhook` (spec §6): echoes the
    /// challenge on a matching mode/token pair, else signals rejection.
    #[must_use]
    pub fn verify_subscription(&self, mode: &str, token: &str, challenge: &str, expected_token: &str) -> Option<String> {
        if mode == "subscribe" && token == expected_token {
            Some(challenge.to_string())
        } else {
            None
        }
    }

    /// Handles one inbound user message. Always succeeds from the caller's
    /// perspective — any internal error is logged, never propagated (spec
    /// §4.10, §7). The read-receipt send is fire-and-forget.
    pub async fn handle_user_message(&self, inbound: InboundMessage) {
        let message_id = inbound.id.clone();

        if let Err(error) = self.controller.handle_inbound(inbound).await {
            tracing::error!(%error, "conversation controller failed to process inbound message");
        }

        if let Some(message_id) = message_id {
            let messaging = Arc::clone(&self.messaging);
            tokio::spawn(async move {
                if let Err(error) = messaging.mark_read(&message_id).await {
                    tracing::warn!(%error, "read-receipt send failed");
                }
            });
        }
    }

    /// Handles the STK provider's payment webhook. Always returns `"OK"`
    /// (spec §6/§7: the provider would retry and multiply confusion
    /// otherwise; the spec's chosen policy is "always acknowledge success").
    pub async fn handle_stk_webhook(&self, payload: StkWebhookPayload) -> &'static str {
        if payload.challenge != "complete" || payload.state != "COMPLETE" {
            return "OK";
        }

        let Ok(booking_uuid) = payload.api_ref.parse::<uuid::Uuid>() else {
            tracing::error!(api_ref = %payload.api_ref, "STK webhook api_ref is not a booking id");
            return "OK";
        };
        let booking_id = BookingId::from_uuid(booking_uuid);

        match self
            .booking
            .complete_booking(booking_id, &payload.invoice_id, payload.account.as_deref())
            .await
        {
            Ok((booking, tickets, is_new)) if is_new => {
                self.fire_confirmation(booking, tickets).await;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(%error, booking_id = %booking_id, "STK webhook completeBooking failed");
            }
        }

        "OK"
    }

    /// Handles a `GET` validation ping on the hosted-redirect webhook (spec
    /// §4.10 S6): echoes the order info, no booking touched.
    #[must_use]
    pub fn handle_hosted_verification(&self, order_tracking_id: &str, order_notification_type: &str) -> HostedEchoResponse {
        HostedEchoResponse {
            order_notification_type: order_notification_type.to_string(),
            order_tracking_id: order_tracking_id.to_string(),
            status: 200,
        }
    }

    /// Handles a `POST` on the hosted-redirect webhook: fetches transaction
    /// status and, if completed, invokes `completeBooking` (spec §4.10).
    pub async fn handle_hosted_webhook(&self, order_tracking_id: &str, order_notification_type: &str) -> HostedEchoResponse {
        let status = match self.hosted.get_transaction_status(order_tracking_id).await {
            Ok(status) => status,
            Err(error) => {
                tracing::error!(%error, order_tracking_id, "hosted status query failed");
                return HostedEchoResponse {
                    order_notification_type: order_notification_type.to_string(),
                    order_tracking_id: order_tracking_id.to_string(),
                    status: 500,
                };
            }
        };

        if !status.completed {
            return HostedEchoResponse {
                order_notification_type: order_notification_type.to_string(),
                order_tracking_id: order_tracking_id.to_string(),
                status: 200,
            };
        }

        let Some(merchant_reference) = status.merchant_reference else {
            tracing::error!(order_tracking_id, "hosted completion missing merchant reference");
            return HostedEchoResponse {
                order_notification_type: order_notification_type.to_string(),
                order_tracking_id: order_tracking_id.to_string(),
                status: 500,
            };
        };

        let Ok(booking_uuid) = merchant_reference.parse::<uuid::Uuid>() else {
            tracing::error!(merchant_reference, "hosted merchant reference is not a booking id");
            return HostedEchoResponse {
                order_notification_type: order_notification_type.to_string(),
                order_tracking_id: order_tracking_id.to_string(),
                status: 500,
            };
        };
        let booking_id = BookingId::from_uuid(booking_uuid);

        let payment_ref = status.confirmation_code.unwrap_or_else(|| order_tracking_id.to_string());
        let response_status = match self
            .booking
            .complete_booking(booking_id, &payment_ref, status.payer_phone.as_deref())
            .await
        {
            Ok((booking, tickets, is_new)) => {
                if is_new {
                    self.fire_confirmation(booking, tickets).await;
                }
                200
            }
            Err(error) => {
                tracing::error!(%error, booking_id = %booking_id, "hosted webhook completeBooking failed");
                500
            }
        };

        HostedEchoResponse {
            order_notification_type: order_notification_type.to_string(),
            order_tracking_id: order_tracking_id.to_string(),
            status: response_status,
        }
    }

    /// Fires the confirmation text and ticket-image fan-out asynchronously,
    /// never blocking or failing the webhook response on delivery errors
    /// (spec §4.10: "fire confirmation message asynchronously").
    async fn fire_confirmation(&self, booking: crate::domain::Booking, tickets: Vec<crate::domain::Ticket>) {
        let Some((tier, event)) = (match self.catalog.tier_with_event(booking.tier_id).await {
            Ok(found) => found,
            Err(error) => {
                tracing::error!(%error, booking_id = %booking.id, "failed to load tier/event for confirmation");
                None
            }
        }) else {
            return;
        };

        let phone = match self.users.phone_for(booking.user_id).await {
            Ok(Some(phone)) => phone,
            Ok(None) => {
                tracing::error!(booking_id = %booking.id, "no phone on file for booking's user");
                return;
            }
            Err(error) => {
                tracing::error!(%error, booking_id = %booking.id, "failed to resolve user phone for confirmation");
                return;
            }
        };

        let messaging = Arc::clone(&self.messaging);
        tokio::spawn(async move {
            tickets::deliver_tickets(messaging, &phone, &event, &tier, booking.quantity, booking.total_amount, &tickets).await;
        });
    }
}
