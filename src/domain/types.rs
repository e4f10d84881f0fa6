//! Domain entities (spec §3), following the teacher's `ticketing::types`
//! module: plain data structs with derived `Serialize`/`Deserialize`,
//! newtype ids from [`super::ids`], and behavior kept on the owning
//! component rather than on these structs (the teacher keeps sagas/reducers
//! separate from the value types they carry; we keep the Booking Engine
//! separate from `Booking`).

use super::ids::{BookingId, EventId, TicketId, TierId, UserId};
use super::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of event categories (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    University,
    Concert,
    Club,
    Social,
    Holiday,
}

impl Category {
    /// All categories, in menu display order.
    pub const ALL: [Category; 5] = [
        Category::University,
        Category::Concert,
        Category::Club,
        Category::Social,
        Category::Holiday,
    ];

    /// Parses a category from a user-facing id (case-insensitive), as used
    /// by the interactive list rows in spec §4.9.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        match id.to_ascii_uppercase().as_str() {
            "UNIVERSITY" => Some(Self::University),
            "CONCERT" => Some(Self::Concert),
            "CLUB" => Some(Self::Club),
            "SOCIAL" => Some(Self::Social),
            "HOLIDAY" => Some(Self::Holiday),
            _ => None,
        }
    }

    /// Stable id used as the interactive row/button payload.
    #[must_use]
    pub const fn as_id(self) -> &'static str {
        match self {
            Self::University => "UNIVERSITY",
            Self::Concert => "CONCERT",
            Self::Club => "CLUB",
            Self::Social => "SOCIAL",
            Self::Holiday => "HOLIDAY",
        }
    }

    /// Human-readable title for the category-list message.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::University => "University",
            Self::Concert => "Concert",
            Self::Club => "Club",
            Self::Social => "Social",
            Self::Holiday => "Holiday",
        }
    }
}

/// An event offered for ticket sale (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub venue: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub active: bool,
    pub category: Category,
}

impl Event {
    /// An event is offered only while active and not yet started (spec §3 invariant).
    #[must_use]
    pub fn is_offered(&self, now: DateTime<Utc>) -> bool {
        self.active && self.start_time > now
    }
}

/// A priced ticket class within one event (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketTier {
    pub id: TierId,
    pub event_id: EventId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: i64,
    pub quantity_sold: i64,
}

impl TicketTier {
    /// Remaining unsold capacity.
    #[must_use]
    pub const fn available(&self) -> i64 {
        self.quantity - self.quantity_sold
    }
}

/// A user, identified solely by normalized phone number (spec §3; no auth).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone: String,
    pub display_name: Option<String>,
}

/// Payment method chosen for a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Mpesa,
    Card,
}

impl PaymentMethod {
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "mpesa" | "m-pesa" => Some(Self::Mpesa),
            "card" => Some(Self::Card),
            _ => None,
        }
    }
}

/// Booking lifecycle state (spec §3/§4.7/§9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    AwaitingPayment,
    Paid,
    Cancelled,
    Expired,
}

impl BookingStatus {
    /// The statuses `completeBooking`'s conditional update is allowed to
    /// transition out of (spec §4.7 step 4(a)). Includes `Expired`: a
    /// provider-confirmed webhook must still win even after the expiry
    /// sweep has given up on the booking client-side (spec §5).
    #[must_use]
    pub const fn is_completable(self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingPayment | Self::Expired)
    }
}

/// A commitment to purchase `quantity` tickets of one tier (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub tier_id: TierId,
    pub quantity: i32,
    pub total_amount: Money,
    pub status: BookingStatus,
    pub payment_method: PaymentMethod,
    pub payment_phone_number: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
}

/// An issued ticket (spec §3); created only when a booking transitions to `PAID`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub booking_id: BookingId,
    pub unique_code: String,
    pub is_redeemed: bool,
}
