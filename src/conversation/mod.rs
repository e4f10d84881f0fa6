//! Conversation Controller (spec §4.9): the state-machine core that turns
//! one normalized inbound message into session transitions, outbound
//! messages, and (at the boundary) booking/payment side effects.
//!
//! Grounded in the teacher's `ticketing` saga style for "one component
//! owns a transition table, side effects are explicit calls out to
//! collaborators" — but implemented as plain match arms over
//! [`ConvState`], not a reducer/event type, since the state here is
//! session data rather than a persisted aggregate.

use crate::booking::BookingEngine;
use crate::catalog::CatalogQuery;
use crate::config::Config;
use crate::domain::{Category, ConvState, EventId, PaymentMethod, Session, SessionDataPatch, TierId};
use crate::domain::phone;
use crate::error::AppError;
use crate::locking::LockRegistry;
use crate::messaging::{Button, InboundMessage, ListRow, MessagingClient, OutboundMessage};
use crate::payments::{HostedAdapter, StkAdapter};
use crate::session::SessionStore;
use crate::users::UserDirectory;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const RESET_KEYWORDS: &[&str] = &["hi", "menu", "start", "restart", "reset", "cancel"];
const BACK_TO_CATEGORIES: &str = "BACK_TO_CATEGORIES";
const ANTI_LOOP_WINDOW: Duration = Duration::from_secs(5);
const SELECTING_QUANTITY_LOCK_TTL: Duration = Duration::from_secs(600);

/// Everything the controller needs to act on one inbound message.
pub struct ConversationController {
    sessions: Arc<dyn SessionStore>,
    locks: Arc<dyn LockRegistry>,
    catalog: Arc<dyn CatalogQuery>,
    users: Arc<dyn UserDirectory>,
    booking: Arc<BookingEngine>,
    stk: Arc<dyn StkAdapter>,
    hosted: Arc<dyn HostedAdapter>,
    messaging: Arc<dyn MessagingClient>,
    config: Config,
    last_menu_sent: Mutex<HashMap<String, Instant>>,
}

impl ConversationController {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        locks: Arc<dyn LockRegistry>,
        catalog: Arc<dyn CatalogQuery>,
        users: Arc<dyn UserDirectory>,
        booking: Arc<BookingEngine>,
        stk: Arc<dyn StkAdapter>,
        hosted: Arc<dyn HostedAdapter>,
        messaging: Arc<dyn MessagingClient>,
        config: Config,
    ) -> Self {
        Self {
            sessions,
            locks,
            catalog,
            users,
            booking,
            stk,
            hosted,
            messaging,
            config,
            last_menu_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one inbound message end to end. Per spec §4.10/§7, the
    /// webhook edge must reply 200 regardless of outcome here — any error
    /// this returns is for logging only, never surfaced to the sender.
    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<(), AppError> {
        let phone = phone::normalize(&inbound.phone)?;
        let payload = inbound.payload().trim();

        let session = self.sessions.get(&phone).await;

        if is_reset_keyword(payload) {
            self.sessions.clear(&phone).await;
            self.send_category_list(&phone).await;
            return Ok(());
        }

        let result = match session.state {
            ConvState::Idle => self.on_idle(&phone).await,
            ConvState::SelectingCategory => self.on_selecting_category(&phone, payload).await,
            ConvState::BrowsingEvents => self.on_browsing_events(&phone, payload, &session).await,
            ConvState::SelectingTier => self.on_selecting_tier(&phone, payload, &session).await,
            ConvState::SelectingQuantity => self.on_selecting_quantity(&phone, payload, &session).await,
            ConvState::AwaitingPaymentMethod => self.on_awaiting_payment_method(&phone, payload, &session).await,
            ConvState::AwaitingPaymentPhone => self.on_awaiting_payment_phone(&phone, payload, &session).await,
            ConvState::AwaitingStkPush => self.on_awaiting_stk_push(&phone).await,
        };

        // Spec §7's controller-level propagation policy: most bad-input
        // cases above already short-circuit with their own specific
        // message before ever constructing an error; this is the fallback
        // for whatever does bubble up (store/catalog failures, a booking
        // call rejecting the current state).
        if let Err(error) = &result {
            self.send_error_feedback(&phone, error).await;
        }
        result
    }

    async fn send_error_feedback(&self, phone: &str, error: &AppError) {
        if error.is_corrective() {
            let message = match error {
                AppError::InvalidInput(message) => message.clone(),
                _ => "Sorry, that didn't work. Please check your input and try again.".to_string(),
            };
            self.messaging.send(phone, OutboundMessage::text(message)).await.ok();
        } else {
            self.messaging
                .send(phone, OutboundMessage::text("Something went wrong, type 'menu' to start over."))
                .await
                .ok();
            self.sessions.update(phone, ConvState::Idle, SessionDataPatch::default()).await;
        }
    }

    async fn on_idle(&self, phone: &str) -> Result<(), AppError> {
        self.send_category_list(phone).await;
        self.sessions.update(phone, ConvState::SelectingCategory, SessionDataPatch::default()).await;
        Ok(())
    }

    async fn on_selecting_category(&self, phone: &str, payload: &str) -> Result<(), AppError> {
        let Some(category) = Category::parse(payload) else {
            self.send_category_list(phone).await;
            return Ok(());
        };

        let events = self.catalog.events_by_category(category).await?;
        let mut rows: Vec<ListRow> = events
            .iter()
            .map(|e| ListRow::new(e.id.to_string(), e.title.clone(), e.venue.clone()))
            .collect();
        rows.push(ListRow::new(BACK_TO_CATEGORIES, "Back", "Return to categories"));

        self.messaging
            .send(
                phone,
                OutboundMessage::list(format!("Events in {}", category.title()), "Events", "View events", rows),
            )
            .await
            .ok();

        self.sessions
            .update(
                phone,
                ConvState::BrowsingEvents,
                SessionDataPatch::default().selected_category(category),
            )
            .await;
        Ok(())
    }

    async fn on_browsing_events(&self, phone: &str, payload: &str, _session: &Session) -> Result<(), AppError> {
        if payload == BACK_TO_CATEGORIES {
            self.send_category_list(phone).await;
            self.sessions.update(phone, ConvState::SelectingCategory, SessionDataPatch::default()).await;
            return Ok(());
        }

        let Ok(event_id) = payload.parse::<uuid::Uuid>() else {
            self.reject_to_categories(phone, "That event is no longer available.").await;
            return Ok(());
        };
        let event_id = EventId::from_uuid(event_id);

        match self.catalog.event_with_tiers(event_id).await? {
            Some((event, tiers)) if event.is_offered(chrono::Utc::now()) && tiers.iter().any(|t| t.available() > 0) => {
                self.send_tier_list(phone, &tiers).await;
                self.sessions
                    .update(phone, ConvState::SelectingTier, SessionDataPatch::default().event_id(event_id))
                    .await;
            }
            _ => {
                self.reject_to_categories(phone, "That event is inactive or sold out.").await;
            }
        }
        Ok(())
    }

    async fn on_selecting_tier(&self, phone: &str, payload: &str, session: &Session) -> Result<(), AppError> {
        if payload == BACK_TO_CATEGORIES {
            self.send_category_list(phone).await;
            self.sessions.update(phone, ConvState::SelectingCategory, SessionDataPatch::default()).await;
            return Ok(());
        }

        let Ok(candidate_id) = payload.parse::<uuid::Uuid>() else {
            self.reject_to_categories(phone, "I didn't recognize that selection.").await;
            return Ok(());
        };

        // Tier id belonging to the session's chosen event takes priority.
        if let Some((tier, event)) = self.catalog.tier_with_event(TierId::from_uuid(candidate_id)).await? {
            if Some(tier.event_id) == session.data.event_id && event.is_offered(chrono::Utc::now()) && tier.available() > 0 {
                self.messaging
                    .send(
                        phone,
                        OutboundMessage::text(format!(
                            "How many tickets of {} would you like? (1-{})",
                            tier.name, self.config.session.max_quantity
                        )),
                    )
                    .await
                    .ok();
                self.sessions
                    .update(
                        phone,
                        ConvState::SelectingQuantity,
                        SessionDataPatch::default().tier_id(tier.id),
                    )
                    .await;
                return Ok(());
            }
        }

        // Else: maybe the user tapped a stale row that's actually an event id
        // (spec §4.9 S4 — event switch mid-tier-selection).
        let event_id = EventId::from_uuid(candidate_id);
        if let Some((event, tiers)) = self.catalog.event_with_tiers(event_id).await? {
            if event.is_offered(chrono::Utc::now()) && tiers.iter().any(|t| t.available() > 0) {
                self.send_tier_list(phone, &tiers).await;
                self.sessions
                    .update(phone, ConvState::SelectingTier, SessionDataPatch::default().event_id(event_id))
                    .await;
                return Ok(());
            }
        }

        self.reject_to_categories(phone, "I didn't recognize that selection.").await;
        Ok(())
    }

    async fn on_selecting_quantity(&self, phone: &str, payload: &str, session: &Session) -> Result<(), AppError> {
        let quantity = payload
            .parse::<i32>()
            .ok()
            .filter(|q| *q >= 1 && *q <= self.config.session.max_quantity)
            .ok_or_else(|| AppError::InvalidInput(quantity_range_message(self.config.session.max_quantity)))?;

        let Some(tier_id) = session.data.tier_id else {
            self.reject_to_categories(phone, "Let's start over.").await;
            return Ok(());
        };
        let Some((tier, _event)) = self.catalog.tier_with_event(tier_id).await? else {
            self.reject_to_categories(phone, "That tier is no longer available.").await;
            return Ok(());
        };

        let resource = format!("tier:{tier_id}:user:{phone}");
        let acquired = self.locks.acquire(&resource, SELECTING_QUANTITY_LOCK_TTL, phone).await;
        if !acquired {
            self.messaging
                .send(phone, OutboundMessage::text("High demand right now, please try again shortly."))
                .await
                .ok();
            self.sessions.update(phone, ConvState::Idle, SessionDataPatch::default()).await;
            return Ok(());
        }

        let total = tier.unit_price.multiply(u32::try_from(quantity).unwrap_or(0));
        self.messaging
            .send(
                phone,
                OutboundMessage::buttons(
                    format!("Total: KES {total}. How would you like to pay?"),
                    vec![Button::new("mpesa", "M-Pesa"), Button::new("card", "Card")],
                ),
            )
            .await
            .ok();

        self.sessions
            .update(
                phone,
                ConvState::AwaitingPaymentMethod,
                SessionDataPatch::default().quantity(quantity).total_amount(total),
            )
            .await;
        Ok(())
    }

    async fn on_awaiting_payment_method(&self, phone: &str, payload: &str, session: &Session) -> Result<(), AppError> {
        let Some(method) = PaymentMethod::parse(payload) else {
            self.messaging
                .send(phone, OutboundMessage::text("Please choose M-Pesa or Card."))
                .await
                .ok();
            return Ok(());
        };

        match method {
            PaymentMethod::Mpesa => {
                self.messaging
                    .send(phone, OutboundMessage::text("Use this chat's phone number for M-Pesa? (yes/no)"))
                    .await
                    .ok();
                self.sessions
                    .update(
                        phone,
                        ConvState::AwaitingPaymentPhone,
                        SessionDataPatch::default().payment_method(PaymentMethod::Mpesa),
                    )
                    .await;
            }
            PaymentMethod::Card => {
                self.begin_card_booking(phone, session).await?;
            }
        }
        Ok(())
    }

    async fn begin_card_booking(&self, phone: &str, session: &Session) -> Result<(), AppError> {
        let (Some(tier_id), Some(quantity), Some(total)) =
            (session.data.tier_id, session.data.quantity, session.data.total_amount)
        else {
            self.reject_to_categories(phone, "Let's start over.").await;
            return Ok(());
        };

        let user_id = self.users.get_or_create(phone).await?;
        let booking = self
            .booking
            .create_pending(user_id, tier_id, quantity, total, PaymentMethod::Card, None)
            .await?;

        match self
            .hosted
            .get_payment_link(&booking.id.to_string(), total, "Ticket booking")
            .await
        {
            Ok(link) => {
                self.messaging
                    .send(phone, OutboundMessage::text(format!("Complete your payment here: {link}")))
                    .await
                    .ok();
            }
            Err(error) => {
                tracing::warn!(%error, "hosted payment link creation failed");
                self.messaging
                    .send(phone, OutboundMessage::text("Couldn't start the card payment, please try again."))
                    .await
                    .ok();
            }
        }

        self.sessions.clear(phone).await;
        Ok(())
    }

    async fn on_awaiting_payment_phone(&self, phone: &str, payload: &str, session: &Session) -> Result<(), AppError> {
        let payment_phone = if payload.eq_ignore_ascii_case("yes") {
            phone.to_string()
        } else if payload.eq_ignore_ascii_case("no") {
            self.messaging
                .send(phone, OutboundMessage::text("Please send the phone number to use for M-Pesa."))
                .await
                .ok();
            return Ok(());
        } else {
            match phone::normalize(payload) {
                Ok(normalized) => normalized,
                Err(_) => {
                    self.messaging
                        .send(phone, OutboundMessage::text("That doesn't look like a valid phone number. Please try again."))
                        .await
                        .ok();
                    return Ok(());
                }
            }
        };

        self.start_stk_push(phone, &payment_phone, session).await
    }

    async fn start_stk_push(&self, phone: &str, payment_phone: &str, session: &Session) -> Result<(), AppError> {
        let (Some(tier_id), Some(quantity), Some(total)) =
            (session.data.tier_id, session.data.quantity, session.data.total_amount)
        else {
            self.reject_to_categories(phone, "Let's start over.").await;
            return Ok(());
        };

        let user_id = self.users.get_or_create(phone).await?;
        let booking = self
            .booking
            .create_pending(
                user_id,
                tier_id,
                quantity,
                total,
                PaymentMethod::Mpesa,
                Some(payment_phone.to_string()),
            )
            .await?;

        match self.stk.initiate(payment_phone, total, &booking.id.to_string()).await {
            Ok(_) => {
                self.messaging
                    .send(phone, OutboundMessage::text("Check your phone to complete the M-Pesa payment."))
                    .await
                    .ok();
                self.sessions
                    .update(
                        phone,
                        ConvState::AwaitingStkPush,
                        SessionDataPatch::default().temp_booking_id(booking.id),
                    )
                    .await;
            }
            Err(error) => {
                tracing::warn!(%error, booking_id = %booking.id, "STK initiation failed");
                self.messaging
                    .send(phone, OutboundMessage::text("Couldn't reach M-Pesa, please try again."))
                    .await
                    .ok();
                self.sessions
                    .update(phone, ConvState::AwaitingPaymentMethod, SessionDataPatch::default())
                    .await;
            }
        }
        Ok(())
    }

    /// No documented inbound transition for this state (spec §9 open
    /// question). Treated as a polite status message rather than a reset,
    /// so a stray user message can't race the provider's pending webhook.
    async fn on_awaiting_stk_push(&self, phone: &str) -> Result<(), AppError> {
        self.messaging
            .send(phone, OutboundMessage::text("Your payment is being processed. We'll confirm shortly."))
            .await
            .ok();
        Ok(())
    }

    async fn reject_to_categories(&self, phone: &str, message: &str) {
        self.messaging.send(phone, OutboundMessage::text(message)).await.ok();
        self.send_category_list(phone).await;
        self.sessions.update(phone, ConvState::SelectingCategory, SessionDataPatch::default()).await;
    }

    /// Sends the category list, suppressing repeat sends within
    /// [`ANTI_LOOP_WINDOW`] for the same phone (spec §4.9 anti-loop guard).
    async fn send_category_list(&self, phone: &str) {
        {
            let mut last_sent = self.last_menu_sent.lock().await;
            if let Some(last) = last_sent.get(phone) {
                if last.elapsed() < ANTI_LOOP_WINDOW {
                    return;
                }
            }
            last_sent.insert(phone.to_string(), Instant::now());
        }

        let rows: Vec<ListRow> = Category::ALL
            .iter()
            .map(|c| ListRow::new(c.as_id(), c.title(), format!("Browse {} events", c.title())))
            .collect();
        self.messaging
            .send(phone, OutboundMessage::list("What would you like to browse?", "Categories", "Choose", rows))
            .await
            .ok();
    }

    async fn send_tier_list(&self, phone: &str, tiers: &[crate::domain::TicketTier]) {
        let mut rows: Vec<ListRow> = tiers
            .iter()
            .map(|t| {
                ListRow::new(
                    t.id.to_string(),
                    t.name.clone(),
                    format!("KES {} - {} left", t.unit_price, t.available()),
                )
            })
            .collect();
        rows.push(ListRow::new(BACK_TO_CATEGORIES, "Back", "Return to categories"));
        self.messaging
            .send(phone, OutboundMessage::list("Choose a ticket tier", "Tiers", "Choose", rows))
            .await
            .ok();
    }
}

fn is_reset_keyword(payload: &str) -> bool {
    let lower = payload.to_ascii_lowercase();
    RESET_KEYWORDS.contains(&lower.as_str())
}

fn quantity_range_message(max: i32) -> String {
    format!("Please type a number between 1 and {max}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keywords_are_case_insensitive() {
        assert!(is_reset_keyword("HI"));
        assert!(is_reset_keyword("Menu"));
        assert!(!is_reset_keyword("hello"));
    }

    #[test]
    fn quantity_message_mentions_bound() {
        assert_eq!(quantity_range_message(5), "Please type a number between 1 and 5");
    }
}
