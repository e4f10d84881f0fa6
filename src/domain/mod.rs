//! Domain value types and the Phone Normalizer (spec §3, §4.1).

pub mod ids;
pub mod money;
pub mod phone;
pub mod session;
pub mod types;

pub use ids::{BookingId, EventId, TicketId, TierId, UserId};
pub use money::Money;
pub use session::{ConvState, Session, SessionData, SessionDataPatch};
pub use types::{Booking, BookingStatus, Category, Event, PaymentMethod, Ticket, TicketTier, User};
