//! Chat-driven ticket-booking concierge.
//!
//! Module layout follows the component breakdown of the design this crate
//! implements: each top-level module is one named component (Phone
//! Normalizer, Session Store, Lock Registry, Catalog Query, the two
//! Payment Adapters, Booking Engine, Ticket Issuer, Conversation
//! Controller, Webhook Ingress), wired together in [`server`].

pub mod booking;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod error;
pub mod locking;
pub mod messaging;
pub mod payments;
pub mod server;
pub mod session;
pub mod tickets;
pub mod users;
pub mod webhooks;
