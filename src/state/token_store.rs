use crate::types::TokenPair;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;

pub const KEY_ACCESS_TOKEN: &str = "accessToken";
pub const KEY_REFRESH_TOKEN: &str = "refreshToken";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenStoreError {
    #[error("secure storage is unavailable: {0}")]
    Unavailable(String),
    #[error("secure storage failed: {0}")]
    Platform(String),
}

/// Key/value secret persistence used by [`TokenStore`].
pub trait SecretBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, TokenStoreError>;
    fn write(&self, key: &str, value: &str) -> Result<(), TokenStoreError>;
    fn delete(&self, key: &str) -> Result<(), TokenStoreError>;
}

/// OS keychain / secret service.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, TokenStoreError> {
        keyring::Entry::new(&self.service, key).map_err(map_keyring_error)
    }
}

fn map_keyring_error(err: keyring::Error) -> TokenStoreError {
    match err {
        keyring::Error::NoStorageAccess(e) => TokenStoreError::Unavailable(e.to_string()),
        keyring::Error::PlatformFailure(e) => TokenStoreError::Platform(e.to_string()),
        other => TokenStoreError::Platform(other.to_string()),
    }
}

impl SecretBackend for KeyringBackend {
    fn read(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::BadEncoding(_)) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(map_keyring_error)
    }

    fn delete(&self, key: &str) -> Result<(), TokenStoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(e)),
        }
    }
}

/// Process-local backend for tests and platforms without a secret service.
#[derive(Default)]
pub struct MemoryBackend {
    values: StdMutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, TokenStoreError> {
        self.values
            .lock()
            .map_err(|_| TokenStoreError::Platform("memory backend poisoned".to_string()))
    }
}

impl SecretBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.values()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), TokenStoreError> {
        self.values()?.remove(key);
        Ok(())
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

#[derive(Default)]
struct Mirror {
    pair: Option<TokenPair>,
    /// Bumped by every clear so in-flight refreshes can tell they lost.
    generation: u64,
}

/// Access/refresh token persistence shared by the API client and the
/// realtime session. Values are mirrored in memory after the first read.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn SecretBackend>,
    mirror: Arc<Mutex<Mirror>>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            mirror: Arc::new(Mutex::new(Mirror::default())),
        }
    }

    pub fn keyring(service: impl Into<String>) -> Self {
        Self::new(Arc::new(KeyringBackend::new(service)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    fn load<'a>(&self, mirror: &'a mut Mirror) -> Result<&'a mut TokenPair, TokenStoreError> {
        if mirror.pair.is_none() {
            mirror.pair = Some(TokenPair {
                access_token: normalize(self.backend.read(KEY_ACCESS_TOKEN)?),
                refresh_token: normalize(self.backend.read(KEY_REFRESH_TOKEN)?),
            });
        }
        Ok(mirror.pair.get_or_insert_with(TokenPair::default))
    }

    pub async fn access_token(&self) -> Result<Option<String>, TokenStoreError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.load(&mut mirror)?.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Result<Option<String>, TokenStoreError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.load(&mut mirror)?.refresh_token.clone())
    }

    /// Current clear generation; pass it to [`TokenStore::set_tokens_for`].
    pub async fn generation(&self) -> u64 {
        self.mirror.lock().await.generation
    }

    /// Writes whichever tokens are provided; `None` leaves the stored value
    /// untouched.
    pub async fn set_tokens(
        &self,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> Result<(), TokenStoreError> {
        let mut mirror = self.mirror.lock().await;
        self.write_locked(&mut mirror, access, refresh)
    }

    /// Like [`TokenStore::set_tokens`], but only if no clear happened since
    /// `generation` was read. Returns whether the tokens were stored.
    pub async fn set_tokens_for(
        &self,
        generation: u64,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> Result<bool, TokenStoreError> {
        let mut mirror = self.mirror.lock().await;
        if mirror.generation != generation {
            return Ok(false);
        }
        self.write_locked(&mut mirror, access, refresh)?;
        Ok(true)
    }

    fn write_locked(
        &self,
        mirror: &mut Mirror,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> Result<(), TokenStoreError> {
        let access = normalize(access.map(str::to_string));
        let refresh = normalize(refresh.map(str::to_string));
        let pair = self.load(mirror)?;

        if let Some(access) = access {
            self.backend.write(KEY_ACCESS_TOKEN, &access)?;
            pair.access_token = Some(access);
        }
        if let Some(refresh) = refresh {
            self.backend.write(KEY_REFRESH_TOKEN, &refresh)?;
            pair.refresh_token = Some(refresh);
        }
        Ok(())
    }

    pub async fn clear_tokens(&self) -> Result<(), TokenStoreError> {
        let mut mirror = self.mirror.lock().await;
        mirror.generation += 1;
        // Forget the mirror first so a failed delete re-reads the backend.
        mirror.pair = None;
        self.backend.delete(KEY_ACCESS_TOKEN)?;
        self.backend.delete(KEY_REFRESH_TOKEN)?;
        mirror.pair = Some(TokenPair::default());
        Ok(())
    }
}
