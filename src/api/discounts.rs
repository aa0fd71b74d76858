use super::{encode_body, from_envelope, segment};
use crate::http::{ApiClient, ApiError, ApiRequest};
use crate::types::{DiscountRequest, DiscountRequestReceipt};
use serde_json::Value;

pub async fn request_discount(
    client: &ApiClient,
    booking_id: &str,
    body: &DiscountRequest,
) -> Result<DiscountRequestReceipt, ApiError> {
    let request = ApiRequest::post(format!("/bookings/{}/discount-requests", segment(booking_id)))
        .json(body)
        .map_err(encode_body)?;
    from_envelope(client.send_json::<Value>(request).await?, &["data", "discountRequest"])
}
