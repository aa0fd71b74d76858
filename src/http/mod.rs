mod client;
mod error;
mod refresh;
mod transport;

pub use client::{ApiClient, REFRESH_PATH};
pub use error::{
    normalize_error_message, ApiError, TransportError, TransportResult, GENERIC_ERROR_MESSAGE,
    SESSION_EXPIRED_MESSAGE,
};
pub use refresh::RefreshCoordinator;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, OutgoingRequest, ReqwestTransport};
