use super::{require_session, CommandResult};
use crate::api::bookings::create_booking;
use crate::api::customs::submit_customs;
use crate::api::discounts::request_discount;
use crate::api::{BookingFilter, FetchOptions};
use crate::state::AppState;
use crate::types::{Booking, BookingStatus, CustomsDocument, CustomsSubmission, DiscountRequest, NewBooking};

fn format_booking(booking: &Booking) -> String {
  let mut line = format!(
    "{:<14} {:<11} {} -> {}",
    booking.reference.as_deref().unwrap_or(&booking.id),
    booking.status.as_str(),
    booking.pickup,
    booking.dropoff
  );
  if let Some(cargo) = booking.cargo_type.as_deref() {
    line.push_str(&format!("  [{cargo}]"));
  }
  if let Some(price) = booking.price {
    line.push_str(&format!("  {price:.2}"));
  }
  line
}

pub(super) async fn list(state: &AppState, status: Option<BookingStatus>, force: bool) -> CommandResult {
  require_session(state).await?;
  let filter = BookingFilter { status };
  let bookings = state
    .bookings
    .fetch_bookings(&filter, FetchOptions { force })
    .await?;
  if bookings.is_empty() {
    println!("No bookings.");
  }
  for booking in &bookings {
    println!("{}", format_booking(booking));
  }
  Ok(())
}

pub(super) async fn create(state: &AppState, booking: NewBooking) -> CommandResult {
  require_session(state).await?;
  let created = create_booking(&state.api, &booking).await?;
  state.bookings.invalidate();
  println!("Booked {}", format_booking(&created));
  Ok(())
}

pub(super) async fn cancel(state: &AppState, id: &str) -> CommandResult {
  require_session(state).await?;
  let updated = state.bookings.cancel(id).await?;
  println!("{}", format_booking(&updated));
  Ok(())
}

pub(super) async fn discount(
  state: &AppState,
  booking_id: &str,
  reason: String,
  percent: Option<f64>,
) -> CommandResult {
  require_session(state).await?;
  let receipt = request_discount(
    &state.api,
    booking_id,
    &DiscountRequest {
      reason,
      requested_percent: percent,
    },
  )
  .await?;
  println!(
    "Discount request {} {}",
    receipt.id,
    receipt.status.as_deref().unwrap_or("submitted")
  );
  Ok(())
}

pub(super) async fn customs(
  state: &AppState,
  booking_id: String,
  documents: Vec<CustomsDocument>,
  notes: Option<String>,
) -> CommandResult {
  require_session(state).await?;
  let count = documents.len();
  let receipt = submit_customs(
    &state.api,
    &CustomsSubmission {
      booking_id,
      documents,
      notes,
    },
  )
  .await?;
  println!(
    "Customs clearance {} {} ({count} document(s))",
    receipt.id,
    receipt.status.as_deref().unwrap_or("submitted")
  );
  Ok(())
}
