use super::{encode_body, from_envelope};
use crate::http::{ApiClient, ApiError, ApiRequest};
use crate::types::{CustomsReceipt, CustomsSubmission};
use serde_json::Value;

pub async fn submit_customs(
    client: &ApiClient,
    submission: &CustomsSubmission,
) -> Result<CustomsReceipt, ApiError> {
    let request = ApiRequest::post("/customs/clearances")
        .json(submission)
        .map_err(encode_body)?;
    from_envelope(client.send_json::<Value>(request).await?, &["data", "clearance"])
}
