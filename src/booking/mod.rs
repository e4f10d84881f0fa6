//! Booking Engine (spec §4.7) — the consistency heart of the system.
//!
//! Grounded in the teacher's `projections::reservations_postgres` for the
//! raw-`sqlx` style, but the control flow itself is deliberately NOT the
//! teacher's event-sourced reducer/saga pattern: spec §9 mandates the
//! first-webhook-wins guarantee be a literal conditional
//! `UPDATE ... WHERE status IN (...)` with an observed affected-row count,
//! inside one short transaction, not a read-then-write or a compensating
//! saga. That single conditional update is the sole serialization point;
//! everything else here is plumbing around it.

use crate::domain::{Booking, BookingId, BookingStatus, Money, PaymentMethod, Ticket, TicketId, TierId, UserId};
use crate::error::AppError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use sqlx::{PgPool, Postgres, Row, Transaction};

const CODE_GENERATION_ATTEMPTS: u32 = 10;
const BOOKING_EXPIRY_MINUTES: i64 = 10;

fn row_to_booking(row: &sqlx::postgres::PgRow) -> Result<Booking, AppError> {
    let status_str: String = row.try_get("status").map_err(AppError::from)?;
    let status = parse_status(&status_str)?;
    let method_str: String = row.try_get("payment_method").map_err(AppError::from)?;
    let payment_method = match method_str.as_str() {
        "MPESA" => PaymentMethod::Mpesa,
        "CARD" => PaymentMethod::Card,
        other => return Err(AppError::InternalError(format!("unknown payment method {other}"))),
    };
    Ok(Booking {
        id: row.try_get::<uuid::Uuid, _>("id").map_err(AppError::from)?.into(),
        user_id: row.try_get::<uuid::Uuid, _>("user_id").map_err(AppError::from)?.into(),
        tier_id: row.try_get::<uuid::Uuid, _>("tier_id").map_err(AppError::from)?.into(),
        quantity: row.try_get("quantity").map_err(AppError::from)?,
        total_amount: Money::from_cents(row.try_get::<i64, _>("total_amount_cents").map_err(AppError::from)?),
        status,
        payment_method,
        payment_phone_number: row.try_get("payment_phone_number").map_err(AppError::from)?,
        payment_reference: row.try_get("payment_reference").map_err(AppError::from)?,
        created_at: row.try_get("created_at").map_err(AppError::from)?,
        expiry_time: row.try_get("expiry_time").map_err(AppError::from)?,
    })
}

fn parse_status(raw: &str) -> Result<BookingStatus, AppError> {
    match raw {
        "PENDING" => Ok(BookingStatus::Pending),
        "AWAITING_PAYMENT" => Ok(BookingStatus::AwaitingPayment),
        "PAID" => Ok(BookingStatus::Paid),
        "CANCELLED" => Ok(BookingStatus::Cancelled),
        "EXPIRED" => Ok(BookingStatus::Expired),
        other => Err(AppError::InternalError(format!("unknown booking status {other}"))),
    }
}

const fn status_id(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "PENDING",
        BookingStatus::AwaitingPayment => "AWAITING_PAYMENT",
        BookingStatus::Paid => "PAID",
        BookingStatus::Cancelled => "CANCELLED",
        BookingStatus::Expired => "EXPIRED",
    }
}

const fn method_id(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Mpesa => "MPESA",
        PaymentMethod::Card => "CARD",
    }
}

/// Draws one candidate `XXXX-XXXX` unique code from 4 random bytes.
fn draw_code() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex = hex::encode_upper(bytes);
    format!("{}-{}", &hex[0..4], &hex[4..8])
}

/// Booking Engine: create-pending, complete-booking, cancel-booking (spec §4.7).
pub struct BookingEngine {
    pool: PgPool,
}

impl BookingEngine {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a `AWAITING_PAYMENT` booking row with a 10-minute expiry.
    /// Does not touch inventory — only [`Self::complete_booking`] does.
    pub async fn create_pending(
        &self,
        user_id: UserId,
        tier_id: TierId,
        quantity: i32,
        total_amount: Money,
        payment_method: PaymentMethod,
        payment_phone_number: Option<String>,
    ) -> Result<Booking, AppError> {
        let id = BookingId::new();
        let now = Utc::now();
        let expiry_time = now + ChronoDuration::minutes(BOOKING_EXPIRY_MINUTES);

        sqlx::query(
            "INSERT INTO bookings
                (id, user_id, tier_id, quantity, total_amount_cents, status, payment_method,
                 payment_phone_number, payment_reference, created_at, expiry_time)
             VALUES ($1, $2, $3, $4, $5, 'AWAITING_PAYMENT', $6, $7, NULL, $8, $9)",
        )
        .bind(id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(tier_id.as_uuid())
        .bind(quantity)
        .bind(total_amount.cents())
        .bind(method_id(payment_method))
        .bind(&payment_phone_number)
        .bind(now)
        .bind(expiry_time)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;

        Ok(Booking {
            id,
            user_id,
            tier_id,
            quantity,
            total_amount,
            status: BookingStatus::AwaitingPayment,
            payment_method,
            payment_phone_number,
            payment_reference: None,
            created_at: now,
            expiry_time,
        })
    }

    async fn fetch_booking(
        &self,
        booking_id: BookingId,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Option<Booking>, AppError> {
        let row = sqlx::query(
            "SELECT id, user_id, tier_id, quantity, total_amount_cents, status, payment_method,
                    payment_phone_number, payment_reference, created_at, expiry_time
             FROM bookings WHERE id = $1 FOR UPDATE",
        )
        .bind(booking_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(AppError::from)?;

        row.as_ref().map(row_to_booking).transpose()
    }

    async fn existing_tickets(
        &self,
        booking_id: BookingId,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Vec<Ticket>, AppError> {
        let rows = sqlx::query("SELECT id, booking_id, unique_code, is_redeemed FROM tickets WHERE booking_id = $1")
            .bind(booking_id.as_uuid())
            .fetch_all(&mut **tx)
            .await
            .map_err(AppError::from)?;

        rows.iter()
            .map(|row| {
                Ok(Ticket {
                    id: row.try_get::<uuid::Uuid, _>("id").map_err(AppError::from)?.into(),
                    booking_id: row.try_get::<uuid::Uuid, _>("booking_id").map_err(AppError::from)?.into(),
                    unique_code: row.try_get("unique_code").map_err(AppError::from)?,
                    is_redeemed: row.try_get("is_redeemed").map_err(AppError::from)?,
                })
            })
            .collect()
    }

    /// Generates `count` unique `XXXX-XXXX` codes, checking each candidate
    /// against the ticket table. Gives up after [`CODE_GENERATION_ATTEMPTS`]
    /// draws for a single slot (spec §4.7 step 3).
    async fn generate_unique_codes(&self, count: i32) -> Result<Vec<String>, AppError> {
        let mut codes = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let mut accepted = None;
            for _ in 0..CODE_GENERATION_ATTEMPTS {
                let candidate = draw_code();
                let taken: Option<(String,)> = sqlx::query_as("SELECT unique_code FROM tickets WHERE unique_code = $1")
                    .bind(&candidate)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(AppError::from)?;
                if taken.is_none() && !codes.contains(&candidate) {
                    accepted = Some(candidate);
                    break;
                }
            }
            codes.push(accepted.ok_or(AppError::CodeGenerationExhausted)?);
        }
        Ok(codes)
    }

    /// Completes a booking from a payment-provider webhook. Idempotent and
    /// safe under concurrent invocation from two providers (spec §4.7).
    ///
    /// Returns `(booking, tickets, is_new_transition)` — the webhook edge
    /// uses `is_new_transition` to decide whether to send a confirmation
    /// message (spec §4.7 step 1: no duplicate confirmation on a replay).
    pub async fn complete_booking(
        &self,
        booking_id: BookingId,
        payment_ref: &str,
        payment_phone: Option<&str>,
    ) -> Result<(Booking, Vec<Ticket>, bool), AppError> {
        // Idempotency shortcut, outside any transaction (spec §4.7 step 1).
        if let Some((booking, tickets)) = self.already_paid(booking_id).await? {
            if !tickets.is_empty() {
                return Ok((booking, tickets, false));
            }
        }

        let codes_needed = {
            let booking = self.peek_booking(booking_id).await?;
            booking.quantity
        };
        let codes = self.generate_unique_codes(codes_needed).await?;

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let Some(booking) = self.fetch_booking(booking_id, &mut tx).await? else {
            return Err(AppError::NotFound(format!("booking {booking_id}")));
        };

        if booking.status == BookingStatus::Paid {
            let tickets = self.existing_tickets(booking_id, &mut tx).await?;
            tx.commit().await.map_err(AppError::from)?;
            return Ok((booking, tickets, false));
        }

        if !booking.status.is_completable() {
            return Err(AppError::InvalidState(format!(
                "booking {booking_id} is {:?}, not completable",
                booking.status
            )));
        }

        // The single serialization point (spec §4.7 step 4(a), §9): a
        // conditional UPDATE, not a read-then-write. Exactly one concurrent
        // caller observes rows_affected == 1; the loser re-reads below.
        let update_result = sqlx::query(
            "UPDATE bookings
             SET status = 'PAID',
                 payment_reference = $2,
                 payment_phone_number = COALESCE($3, payment_phone_number)
             WHERE id = $1 AND status IN ('PENDING', 'AWAITING_PAYMENT', 'EXPIRED')",
        )
        .bind(booking_id.as_uuid())
        .bind(payment_ref)
        .bind(payment_phone)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

        if update_result.rows_affected() == 0 {
            // Another writer won the race. Abort this transaction and
            // re-read outside it — the winner's commit is now visible.
            tx.rollback().await.map_err(AppError::from)?;
            return self.await_winner(booking_id).await;
        }

        sqlx::query("UPDATE ticket_tiers SET quantity_sold = quantity_sold + $2 WHERE id = $1")
            .bind(booking.tier_id.as_uuid())
            .bind(booking.quantity)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;

        let mut tickets = Vec::with_capacity(codes.len());
        for code in codes {
            let ticket_id = TicketId::new();
            sqlx::query(
                "INSERT INTO tickets (id, booking_id, unique_code, is_redeemed) VALUES ($1, $2, $3, false)",
            )
            .bind(ticket_id.as_uuid())
            .bind(booking_id.as_uuid())
            .bind(&code)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;
            tickets.push(Ticket {
                id: ticket_id,
                booking_id,
                unique_code: code,
                is_redeemed: false,
            });
        }

        tx.commit().await.map_err(AppError::from)?;
        let mut paid_booking = booking;
        paid_booking.status = BookingStatus::Paid;
        paid_booking.payment_reference = Some(payment_ref.to_string());
        Ok((paid_booking, tickets, true))
    }

    /// Re-reads a booking that another writer just won the race on. Per
    /// spec §4.7 step 1, this is the "retries the lookup" half of
    /// first-webhook-wins: the loser is not an error, it's an idempotent
    /// no-op that returns the winner's result.
    async fn await_winner(&self, booking_id: BookingId) -> Result<(Booking, Vec<Ticket>, bool), AppError> {
        match self.already_paid(booking_id).await? {
            Some((booking, tickets)) if !tickets.is_empty() => Ok((booking, tickets, false)),
            _ => Err(AppError::AlreadyProcessed),
        }
    }

    async fn peek_booking(&self, booking_id: BookingId) -> Result<Booking, AppError> {
        let row = sqlx::query(
            "SELECT id, user_id, tier_id, quantity, total_amount_cents, status, payment_method,
                    payment_phone_number, payment_reference, created_at, expiry_time
             FROM bookings WHERE id = $1",
        )
        .bind(booking_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        let Some(row) = row else {
            return Err(AppError::NotFound(format!("booking {booking_id}")));
        };
        row_to_booking(&row)
    }

    async fn already_paid(&self, booking_id: BookingId) -> Result<Option<(Booking, Vec<Ticket>)>, AppError> {
        let booking_row = sqlx::query(
            "SELECT id, user_id, tier_id, quantity, total_amount_cents, status, payment_method,
                    payment_phone_number, payment_reference, created_at, expiry_time
             FROM bookings WHERE id = $1",
        )
        .bind(booking_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        let Some(booking_row) = booking_row else {
            return Ok(None);
        };
        let booking = row_to_booking(&booking_row)?;
        if booking.status != BookingStatus::Paid {
            return Ok(None);
        }

        let ticket_rows = sqlx::query("SELECT id, booking_id, unique_code, is_redeemed FROM tickets WHERE booking_id = $1")
            .bind(booking_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::from)?;

        let tickets = ticket_rows
            .iter()
            .map(|row| {
                Ok(Ticket {
                    id: row.try_get::<uuid::Uuid, _>("id").map_err(AppError::from)?.into(),
                    booking_id: row.try_get::<uuid::Uuid, _>("booking_id").map_err(AppError::from)?.into(),
                    unique_code: row.try_get("unique_code").map_err(AppError::from)?,
                    is_redeemed: row.try_get("is_redeemed").map_err(AppError::from)?,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Some((booking, tickets)))
    }

    /// Cancels a `PAID` booking and reverses the inventory increment (spec
    /// §4.7). Tickets are left dangling, neither deleted nor redeemed.
    pub async fn cancel_booking(&self, booking_id: BookingId, _reason: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let booking = self
            .fetch_booking(booking_id, &mut tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

        let update_result = sqlx::query("UPDATE bookings SET status = 'CANCELLED' WHERE id = $1 AND status = 'PAID'")
            .bind(booking_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;

        if update_result.rows_affected() != 1 {
            return Err(AppError::Conflict(format!(
                "booking {booking_id} is not PAID, cannot cancel"
            )));
        }

        sqlx::query("UPDATE ticket_tiers SET quantity_sold = quantity_sold - $2 WHERE id = $1")
            .bind(booking.tier_id.as_uuid())
            .bind(booking.quantity)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;

        tx.commit().await.map_err(AppError::from)?;
        Ok(())
    }

    /// Sweeps `AWAITING_PAYMENT`/`PENDING` bookings past their `expiry_time`
    /// into `EXPIRED` (SPEC_FULL §E.2). `EXPIRED` is not terminal for the
    /// payment path: `complete_booking`'s conditional update still admits
    /// it, so a provider webhook that lands after the sweep still wins the
    /// booking instead of being rejected (spec §5's hard guarantee that a
    /// confirmed payment is honored even after the UI gave up).
    pub async fn expire_stale_bookings(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'EXPIRED'
             WHERE status IN ('PENDING', 'AWAITING_PAYMENT') AND expiry_time < $1",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_code_has_expected_shape() {
        let code = draw_code();
        assert_eq!(code.len(), 9);
        assert_eq!(code.as_bytes()[4], b'-');
        assert!(code.chars().filter(|c| *c != '-').all(|c| c.is_ascii_hexdigit() && (c.is_ascii_digit() || c.is_uppercase())));
    }

    #[test]
    fn status_id_round_trips() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::AwaitingPayment,
            BookingStatus::Paid,
            BookingStatus::Cancelled,
            BookingStatus::Expired,
        ] {
            assert_eq!(parse_status(status_id(status)).unwrap(), status);
        }
    }
}
