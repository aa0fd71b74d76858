mod app_state;
mod token_store;

pub use app_state::AppState;
pub use token_store::{
    KeyringBackend, MemoryBackend, SecretBackend, TokenStore, TokenStoreError, KEY_ACCESS_TOKEN,
    KEY_REFRESH_TOKEN,
};
