use crate::types::NotificationData;

const SHIPMENT_KINDS: &[&str] = &[
  "shipment_update",
  "shipment_updated",
  "booking_update",
  "booking_updated",
  "booking_status",
  "driver_assigned",
  "discount_update",
  "customs_update",
];
const PROFILE_KINDS: &[&str] = &["profile_updated", "profile_update", "user_updated"];
const SHIPMENT_FIELDS: &[&str] = &["bookingId", "shipmentId"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
  ShipmentUpdate,
  ProfileUpdated,
}

fn normalize_kind(kind: &str) -> String {
  kind
    .trim()
    .chars()
    .map(|c| match c {
      '-' | ' ' | '.' => '_',
      c => c.to_ascii_lowercase(),
    })
    .collect()
}

fn has_field(data: &NotificationData, key: &str) -> bool {
  data
    .fields
    .get(key)
    .is_some_and(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()))
}

/// Categories a notification belongs to, without duplicates.
pub fn classify(data: &NotificationData) -> Vec<EventCategory> {
  let mut categories = Vec::new();
  let kind = data.kind.as_deref().map(normalize_kind).unwrap_or_default();

  if SHIPMENT_KINDS.contains(&kind.as_str())
    || SHIPMENT_FIELDS.iter().any(|key| has_field(data, key))
  {
    categories.push(EventCategory::ShipmentUpdate);
  }
  if PROFILE_KINDS.contains(&kind.as_str()) {
    categories.push(EventCategory::ProfileUpdated);
  }
  categories
}
