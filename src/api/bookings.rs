use super::{encode_body, from_envelope, segment};
use crate::http::{ApiClient, ApiError, ApiRequest};
use crate::types::{Booking, BookingStatus, NewBooking};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const ENVELOPE_KEYS: &[&str] = &["data", "bookings", "booking", "items"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn status(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Bypass the cache even when it is still fresh.
    pub force: bool,
}

pub async fn list_bookings(client: &ApiClient, filter: &BookingFilter) -> Result<Vec<Booking>, ApiError> {
    let mut request = ApiRequest::get("/bookings");
    if let Some(status) = filter.status {
        request = request.query("status", status.as_str());
    }
    from_envelope(client.send_json::<Value>(request).await?, ENVELOPE_KEYS)
}

pub async fn get_booking(client: &ApiClient, id: &str) -> Result<Booking, ApiError> {
    let request = ApiRequest::get(format!("/bookings/{}", segment(id)));
    from_envelope(client.send_json::<Value>(request).await?, ENVELOPE_KEYS)
}

pub async fn create_booking(client: &ApiClient, booking: &NewBooking) -> Result<Booking, ApiError> {
    let request = ApiRequest::post("/bookings")
        .json(booking)
        .map_err(encode_body)?;
    from_envelope(client.send_json::<Value>(request).await?, ENVELOPE_KEYS)
}

pub async fn cancel_booking(client: &ApiClient, id: &str) -> Result<Booking, ApiError> {
    let request = ApiRequest::patch(format!("/bookings/{}/cancel", segment(id)));
    from_envelope(client.send_json::<Value>(request).await?, ENVELOPE_KEYS)
}

struct CachedList {
    bookings: Vec<Booking>,
    fetched_at: Instant,
}

struct PendingChange {
    previous: Option<BookingStatus>,
    target: BookingStatus,
}

#[derive(Default)]
struct BookState {
    lists: HashMap<BookingFilter, CachedList>,
    pending: HashMap<String, PendingChange>,
}

impl BookState {
    fn find_status(&self, id: &str) -> Option<BookingStatus> {
        self.lists
            .values()
            .flat_map(|list| list.bookings.iter())
            .find(|booking| booking.id == id)
            .map(|booking| booking.status)
    }

    fn set_status(&mut self, id: &str, status: BookingStatus) {
        for booking in self.bookings_mut(id) {
            booking.status = status;
        }
    }

    fn replace(&mut self, updated: &Booking) {
        for booking in self.bookings_mut(&updated.id) {
            *booking = updated.clone();
        }
    }

    fn bookings_mut<'a>(&'a mut self, id: &'a str) -> impl Iterator<Item = &'a mut Booking> + 'a {
        self.lists
            .values_mut()
            .flat_map(|list| list.bookings.iter_mut())
            .filter(move |booking| booking.id == id)
    }

    /// Keeps in-flight changes visible over a fresh server list.
    fn overlay_pending(&self, bookings: &mut [Booking]) {
        for booking in bookings {
            if let Some(change) = self.pending.get(&booking.id) {
                booking.status = change.target;
            }
        }
    }
}

/// Client-side booking state: cached lists per filter plus optimistic
/// status changes that are reconciled or rolled back once the backend
/// answers.
pub struct BookingBook {
    client: ApiClient,
    ttl: Duration,
    state: Mutex<BookState>,
}

impl BookingBook {
    pub fn new(client: ApiClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            state: Mutex::new(BookState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn fetch_bookings(
        &self,
        filter: &BookingFilter,
        options: FetchOptions,
    ) -> Result<Vec<Booking>, ApiError> {
        if !options.force {
            if let Some(list) = self.state().lists.get(filter) {
                if list.fetched_at.elapsed() < self.ttl {
                    return Ok(list.bookings.clone());
                }
            }
        }

        let mut bookings = list_bookings(&self.client, filter).await?;
        let mut state = self.state();
        state.overlay_pending(&mut bookings);
        state.lists.insert(
            filter.clone(),
            CachedList {
                bookings: bookings.clone(),
                fetched_at: Instant::now(),
            },
        );
        tracing::debug!(count = bookings.len(), status = ?filter.status, "bookings fetched");
        Ok(bookings)
    }

    /// Last cached list for `filter`, fresh or not.
    pub fn cached(&self, filter: &BookingFilter) -> Option<Vec<Booking>> {
        self.state().lists.get(filter).map(|list| list.bookings.clone())
    }

    pub fn status_of(&self, id: &str) -> Option<BookingStatus> {
        self.state().find_status(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.state().pending.contains_key(id)
    }

    /// Shows the booking as cancelled right away, then settles with the
    /// backend's answer. On failure the previous status is restored.
    pub async fn cancel(&self, id: &str) -> Result<Booking, ApiError> {
        {
            let mut state = self.state();
            let previous = state.find_status(id);
            state.set_status(id, BookingStatus::Cancelled);
            state.pending.insert(
                id.to_string(),
                PendingChange {
                    previous,
                    target: BookingStatus::Cancelled,
                },
            );
        }

        let result = cancel_booking(&self.client, id).await;

        let mut state = self.state();
        let change = state.pending.remove(id);
        match &result {
            Ok(updated) => state.replace(updated),
            Err(e) => {
                if let Some(previous) = change.and_then(|c| c.previous) {
                    state.set_status(id, previous);
                }
                tracing::warn!(booking = id, error = %e, "cancel failed; change rolled back");
            }
        }
        result
    }

    pub fn invalidate(&self) {
        self.state().lists.clear();
    }
}
