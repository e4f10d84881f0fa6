//! Session value types: conversation state plus the typed data bag (spec §3/§4.9).

use super::ids::{BookingId, EventId, TierId};
use super::money::Money;
use super::types::{Category, PaymentMethod};
use serde::{Deserialize, Serialize};

/// States of the Conversation Controller's state machine (spec §4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvState {
    Idle,
    SelectingCategory,
    BrowsingEvents,
    SelectingTier,
    SelectingQuantity,
    AwaitingPaymentMethod,
    AwaitingPaymentPhone,
    AwaitingStkPush,
}

/// The recognized keys of the session data bag (spec §3).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionData {
    pub event_id: Option<EventId>,
    pub selected_category: Option<Category>,
    pub tier_id: Option<TierId>,
    pub quantity: Option<i32>,
    pub total_amount: Option<Money>,
    pub payment_method: Option<PaymentMethod>,
    pub temp_booking_id: Option<BookingId>,
}

impl SessionData {
    /// Right-biased shallow merge: a field present (`Some`) in `patch`
    /// overwrites the corresponding field in `self`; a field absent
    /// (`None`) in `patch` leaves `self`'s value untouched (spec §8
    /// property 5 — `D ⊕ P` over the *defined* keys of `P`, not a
    /// destructive overwrite of every field).
    pub fn merge(&mut self, patch: SessionDataPatch) {
        if let Some(v) = patch.event_id {
            self.event_id = v;
        }
        if let Some(v) = patch.selected_category {
            self.selected_category = v;
        }
        if let Some(v) = patch.tier_id {
            self.tier_id = v;
        }
        if let Some(v) = patch.quantity {
            self.quantity = v;
        }
        if let Some(v) = patch.total_amount {
            self.total_amount = v;
        }
        if let Some(v) = patch.payment_method {
            self.payment_method = v;
        }
        if let Some(v) = patch.temp_booking_id {
            self.temp_booking_id = v;
        }
    }
}

/// A patch applied via [`SessionData::merge`]. Each field is
/// `Option<Option<T>>`: the outer `Option` says whether this key is
/// "defined" in the patch at all; the inner `Option` carries the new
/// value (which may itself clear the field by setting it to `None`).
#[derive(Clone, Debug, Default)]
pub struct SessionDataPatch {
    pub event_id: Option<Option<EventId>>,
    pub selected_category: Option<Option<Category>>,
    pub tier_id: Option<Option<TierId>>,
    pub quantity: Option<Option<i32>>,
    pub total_amount: Option<Option<Money>>,
    pub payment_method: Option<Option<PaymentMethod>>,
    pub temp_booking_id: Option<Option<BookingId>>,
}

impl SessionDataPatch {
    #[must_use]
    pub fn event_id(mut self, v: EventId) -> Self {
        self.event_id = Some(Some(v));
        self
    }

    #[must_use]
    pub fn selected_category(mut self, v: Category) -> Self {
        self.selected_category = Some(Some(v));
        self
    }

    #[must_use]
    pub fn tier_id(mut self, v: TierId) -> Self {
        self.tier_id = Some(Some(v));
        self
    }

    #[must_use]
    pub fn quantity(mut self, v: i32) -> Self {
        self.quantity = Some(Some(v));
        self
    }

    #[must_use]
    pub fn total_amount(mut self, v: Money) -> Self {
        self.total_amount = Some(Some(v));
        self
    }

    #[must_use]
    pub fn payment_method(mut self, v: PaymentMethod) -> Self {
        self.payment_method = Some(Some(v));
        self
    }

    #[must_use]
    pub fn temp_booking_id(mut self, v: BookingId) -> Self {
        self.temp_booking_id = Some(Some(v));
        self
    }
}

/// A user's conversation session (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub state: ConvState,
    pub data: SessionData,
}

impl Session {
    /// A fresh, empty session — what `get` returns when none exists or the
    /// backing store is unreachable (spec §4.2).
    #[must_use]
    pub fn idle() -> Self {
        Self {
            state: ConvState::Idle,
            data: SessionData::default(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_only_overwrites_defined_keys() {
        let mut data = SessionData {
            quantity: Some(2),
            event_id: Some(EventId::new()),
            ..SessionData::default()
        };
        let original_event = data.event_id;

        data.merge(SessionDataPatch::default().quantity(5));

        assert_eq!(data.quantity, Some(5));
        assert_eq!(data.event_id, original_event);
    }

    #[test]
    fn merge_can_explicitly_clear_a_field() {
        let mut data = SessionData {
            tier_id: Some(TierId::new()),
            ..SessionData::default()
        };
        let mut patch = SessionDataPatch::default();
        patch.tier_id = Some(None);
        data.merge(patch);
        assert_eq!(data.tier_id, None);
    }
}
