//! Ticket Issuer / media delivery (spec §4.8).
//!
//! Runs after `BookingEngine::complete_booking` succeeds: renders each
//! ticket's code as a QR PNG, uploads it, and fans the image sends out in
//! parallel. Every delivery step is best-effort — failures are logged and
//! never propagate, per spec §7's "ticket-image fan-out... NEVER propagate".

use crate::domain::{Event, Money, Ticket, TicketTier};
use crate::error::AppError;
use crate::messaging::{MessagingClient, OutboundMessage};
use futures::future::join_all;
use image::{ImageBuffer, Luma};
use qrcode::{EcLevel, QrCode};
use std::sync::Arc;

const QR_DIMENSION: u32 = 400;

/// Renders `code` as a 400x400 PNG with high error correction (spec §4.8).
///
/// # Errors
///
/// Returns [`AppError::InternalError`] if the code can't be encoded as a QR
/// symbol (practically unreachable for the fixed `XXXX-XXXX` alphabet) or
/// the resulting image can't be serialized to PNG bytes.
pub fn render_qr_png(code: &str) -> Result<Vec<u8>, AppError> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::H)
        .map_err(|e| AppError::InternalError(format!("QR encoding failed: {e}")))?;

    let image = qr.render::<Luma<u8>>().max_dimensions(QR_DIMENSION, QR_DIMENSION).build();
    let resized: ImageBuffer<Luma<u8>, Vec<u8>> =
        image::imageops::resize(&image, QR_DIMENSION, QR_DIMENSION, image::imageops::FilterType::Nearest);

    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    image::DynamicImage::ImageLuma8(resized)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| AppError::InternalError(format!("PNG encoding failed: {e}")))?;
    Ok(bytes)
}

/// Formats the single confirmation text listing all purchased codes (spec
/// §4.8: "event title, date, venue, tier name, quantity, total, and the
/// full list of codes").
#[must_use]
pub fn confirmation_text(event: &Event, tier: &TicketTier, quantity: i32, total: Money, tickets: &[Ticket]) -> String {
    let codes = tickets
        .iter()
        .map(|t| t.unique_code.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Booking confirmed!\n\n{}\n{}\nVenue: {}\nTier: {} x{}\nTotal: KES {}\n\nYour ticket codes:\n{}",
        event.title,
        event.start_time.format("%Y-%m-%d %H:%M"),
        event.venue,
        tier.name,
        quantity,
        total,
        codes,
    )
}

/// Sends the confirmation text, then fans out one image send per ticket in
/// parallel. Every individual failure is logged and swallowed (spec §4.8,
/// §7) — this function itself never returns an error.
pub async fn deliver_tickets(
    messaging: Arc<dyn MessagingClient>,
    phone: &str,
    event: &Event,
    tier: &TicketTier,
    quantity: i32,
    total: Money,
    tickets: &[Ticket],
) {
    let confirmation = confirmation_text(event, tier, quantity, total, tickets);
    if let Err(error) = messaging.send(phone, OutboundMessage::text(confirmation)).await {
        tracing::warn!(phone = %crate::error::mask_phone(phone), %error, "confirmation text delivery failed");
    }

    let caption = format!("{} — {}", event.title, tier.name);
    let deliveries = tickets.iter().map(|ticket| {
        let messaging = Arc::clone(&messaging);
        let phone = phone.to_string();
        let caption = caption.clone();
        let code = ticket.unique_code.clone();
        async move {
            if let Err(error) = deliver_one_ticket_image(messaging, &phone, &code, &caption).await {
                tracing::warn!(
                    phone = %crate::error::mask_phone(&phone),
                    ticket_code = %code,
                    %error,
                    "ticket image delivery failed",
                );
            }
        }
    });

    join_all(deliveries).await;
}

async fn deliver_one_ticket_image(
    messaging: Arc<dyn MessagingClient>,
    phone: &str,
    code: &str,
    caption: &str,
) -> Result<(), AppError> {
    let png = render_qr_png(code)?;
    let media_id = messaging.upload_media(png, "image/png").await?;
    messaging
        .send(
            phone,
            OutboundMessage::Image {
                media_id,
                caption: Some(caption.to_string()),
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_png_has_png_signature() {
        let png = render_qr_png("ABCD-1234").unwrap();
        assert_eq!(&png[0..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n']);
    }

    #[test]
    fn confirmation_text_lists_all_codes() {
        let event = Event {
            id: crate::domain::EventId::new(),
            title: "Campus Fest".to_string(),
            description: String::new(),
            venue: "Main Hall".to_string(),
            start_time: chrono::Utc::now(),
            end_time: chrono::Utc::now(),
            active: true,
            category: crate::domain::Category::University,
        };
        let tier = TicketTier {
            id: crate::domain::TierId::new(),
            event_id: event.id,
            name: "Regular".to_string(),
            unit_price: Money::from_units(500),
            quantity: 10,
            quantity_sold: 0,
        };
        let tickets = vec![
            Ticket {
                id: crate::domain::TicketId::new(),
                booking_id: crate::domain::BookingId::new(),
                unique_code: "AAAA-1111".to_string(),
                is_redeemed: false,
            },
            Ticket {
                id: crate::domain::TicketId::new(),
                booking_id: crate::domain::BookingId::new(),
                unique_code: "BBBB-2222".to_string(),
                is_redeemed: false,
            },
        ];

        let text = confirmation_text(&event, &tier, 2, Money::from_units(1000), &tickets);
        assert!(text.contains("AAAA-1111"));
        assert!(text.contains("BBBB-2222"));
        assert!(text.contains("Campus Fest"));
    }
}
