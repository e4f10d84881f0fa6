//! Catalog Query (spec §4.4): read-only queries over events and tiers.
//!
//! Grounded in the teacher's `projections::*_postgres` modules — plain
//! `sqlx::query_as` over a `PgPool`, no compile-time-checked `query!` macro
//! (this service isn't event-sourced, so there's no separate projection
//! database; events/tiers live in the same Postgres the Booking Engine
//! writes to).

use crate::domain::{Category, Event, EventId, TicketTier, TierId};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Row;

/// Contract for the Catalog Query component (spec §4.4). Every listing
/// operation returns an empty `Vec`, never an error for "nothing found".
#[async_trait]
pub trait CatalogQuery: Send + Sync {
    /// All categories with at least the closed enum's members — always the
    /// same five, spec §3.
    fn categories(&self) -> Vec<Category> {
        Category::ALL.to_vec()
    }

    /// Events in `category`, filtered to `active ∧ start > now`, sorted by
    /// `start ASC`.
    async fn events_by_category(&self, category: Category) -> Result<Vec<Event>, AppError>;

    /// One event with its tiers sorted by `price ASC`.
    async fn event_with_tiers(
        &self,
        event_id: EventId,
    ) -> Result<Option<(Event, Vec<TicketTier>)>, AppError>;

    /// One tier with its parent event.
    async fn tier_with_event(&self, tier_id: TierId) -> Result<Option<(TicketTier, Event)>, AppError>;
}

/// Postgres-backed implementation.
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, AppError> {
        let category_str: String = row.try_get("category").map_err(AppError::from)?;
        let category = Category::parse(&category_str)
            .ok_or_else(|| AppError::InternalError(format!("unknown category {category_str}")))?;
        Ok(Event {
            id: row.try_get::<uuid::Uuid, _>("id").map_err(AppError::from)?.into(),
            title: row.try_get("title").map_err(AppError::from)?,
            description: row.try_get("description").map_err(AppError::from)?,
            venue: row.try_get("venue").map_err(AppError::from)?,
            start_time: row.try_get("start_time").map_err(AppError::from)?,
            end_time: row.try_get("end_time").map_err(AppError::from)?,
            active: row.try_get("active").map_err(AppError::from)?,
            category,
        })
    }

    fn row_to_tier(row: &sqlx::postgres::PgRow) -> Result<TicketTier, AppError> {
        Ok(TicketTier {
            id: row.try_get::<uuid::Uuid, _>("id").map_err(AppError::from)?.into(),
            event_id: row
                .try_get::<uuid::Uuid, _>("event_id")
                .map_err(AppError::from)?
                .into(),
            name: row.try_get("name").map_err(AppError::from)?,
            unit_price: crate::domain::Money::from_cents(
                row.try_get::<i64, _>("unit_price_cents").map_err(AppError::from)?,
            ),
            quantity: row.try_get("quantity").map_err(AppError::from)?,
            quantity_sold: row.try_get("quantity_sold").map_err(AppError::from)?,
        })
    }
}

#[async_trait]
impl CatalogQuery for PostgresCatalog {
    async fn events_by_category(&self, category: Category) -> Result<Vec<Event>, AppError> {
        let now = Utc::now();
        let rows = sqlx::query(
            "SELECT id, title, description, venue, start_time, end_time, active, category
             FROM events
             WHERE category = $1 AND active = true AND start_time > $2
             ORDER BY start_time ASC",
        )
        .bind(category.as_id())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn event_with_tiers(
        &self,
        event_id: EventId,
    ) -> Result<Option<(Event, Vec<TicketTier>)>, AppError> {
        let event_row = sqlx::query(
            "SELECT id, title, description, venue, start_time, end_time, active, category
             FROM events WHERE id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        let Some(event_row) = event_row else {
            return Ok(None);
        };
        let event = Self::row_to_event(&event_row)?;

        let tier_rows = sqlx::query(
            "SELECT id, event_id, name, unit_price_cents, quantity, quantity_sold
             FROM ticket_tiers WHERE event_id = $1
             ORDER BY unit_price_cents ASC",
        )
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;

        let tiers = tier_rows.iter().map(Self::row_to_tier).collect::<Result<Vec<_>, _>>()?;
        Ok(Some((event, tiers)))
    }

    async fn tier_with_event(&self, tier_id: TierId) -> Result<Option<(TicketTier, Event)>, AppError> {
        let tier_row = sqlx::query(
            "SELECT id, event_id, name, unit_price_cents, quantity, quantity_sold
             FROM ticket_tiers WHERE id = $1",
        )
        .bind(tier_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        let Some(tier_row) = tier_row else {
            return Ok(None);
        };
        let tier = Self::row_to_tier(&tier_row)?;

        let event_row = sqlx::query(
            "SELECT id, title, description, venue, start_time, end_time, active, category
             FROM events WHERE id = $1",
        )
        .bind(tier.event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        let Some(event_row) = event_row else {
            return Ok(None);
        };
        Ok(Some((tier, Self::row_to_event(&event_row)?)))
    }
}
