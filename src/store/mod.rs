//! Token storage: the in-memory [`TokenStore`] shared by the engine and the
//! authorizer, and the [`CredentialStore`] persistence seam behind it.

pub mod credential;

pub use credential::{
    CredentialStore, CredentialStoreConfig, FileCredentialStore, MemoryCredentialStore,
};

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::OAuthError;
use crate::token::Token;

/// Holds zero-or-one current token for one configured client.
///
/// The store is policy-free: it never looks at expiry. Every mutation bumps
/// a generation counter so writers can detect that the token they based a
/// refresh on has since been replaced or cleared.
#[derive(Default)]
pub struct TokenStore {
    slot: RwLock<Slot>,
    credentials: Option<Arc<dyn CredentialStore>>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    token: Option<Token>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.read();
        f.debug_struct("TokenStore")
            .field("generation", &slot.generation)
            .field("has_token", &slot.token.is_some())
            .field("credentials", &self.credentials.as_ref().map(|_| ".."))
            .finish()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist every change through `credentials`.
    pub fn with_credential_store(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn current(&self) -> Option<Token> {
        self.read().token.clone()
    }

    /// Current token together with the generation it belongs to.
    pub fn snapshot(&self) -> (u64, Option<Token>) {
        let slot = self.read();
        (slot.generation, slot.token.clone())
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Replace the current token.
    pub fn set(&self, token: Token) {
        {
            let mut slot = self.write();
            slot.generation += 1;
            slot.token = Some(token.clone());
        }
        self.persist(&token);
    }

    /// Replace the current token only if nothing else has written since
    /// `generation` was observed. Returns whether the write happened.
    pub fn replace_if(&self, generation: u64, token: Token) -> bool {
        {
            let mut slot = self.write();
            if slot.generation != generation {
                return false;
            }
            slot.generation += 1;
            slot.token = Some(token.clone());
        }
        self.persist(&token);
        true
    }

    /// Drop the current token and delete its persisted copy.
    pub fn clear(&self) {
        {
            let mut slot = self.write();
            slot.generation += 1;
            slot.token = None;
        }
        if let Some(credentials) = &self.credentials {
            if let Err(err) = credentials.delete() {
                tracing::warn!(error = %err, "failed to delete persisted token");
            }
        }
    }

    /// Load the persisted token, if any, into memory.
    ///
    /// A missing credential store or an empty one leaves the store as is.
    pub fn restore(&self) -> Result<Option<Token>, OAuthError> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };
        let loaded = credentials.load()?;
        if let Some(token) = &loaded {
            let mut slot = self.write();
            slot.generation += 1;
            slot.token = Some(token.clone());
            tracing::debug!(generation = slot.generation, "restored persisted token");
        }
        Ok(loaded)
    }

    fn persist(&self, token: &Token) {
        if let Some(credentials) = &self.credentials {
            if let Err(err) = credentials.save(token) {
                tracing::warn!(error = %err, "failed to persist token");
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingCredentials;

    impl CredentialStore for FailingCredentials {
        fn load(&self) -> Result<Option<Token>, OAuthError> {
            Err(OAuthError::Io("disk gone".to_string()))
        }

        fn save(&self, _token: &Token) -> Result<(), OAuthError> {
            Err(OAuthError::Io("disk gone".to_string()))
        }

        fn delete(&self) -> Result<(), OAuthError> {
            Err(OAuthError::Io("disk gone".to_string()))
        }
    }

    #[test]
    fn set_and_clear_bump_generation() {
        let store = TokenStore::new();
        assert!(store.current().is_none());
        assert_eq!(store.generation(), 0);

        store.set(Token::bearer("a"));
        assert_eq!(store.current().unwrap().access_token, "a");
        assert_eq!(store.generation(), 1);

        store.clear();
        assert!(store.current().is_none());
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn replace_if_rejects_stale_generation() {
        let store = TokenStore::new();
        store.set(Token::bearer("a"));
        let (generation, _) = store.snapshot();

        store.set(Token::bearer("b"));
        assert!(!store.replace_if(generation, Token::bearer("stale")));
        assert_eq!(store.current().unwrap().access_token, "b");

        let (generation, _) = store.snapshot();
        assert!(store.replace_if(generation, Token::bearer("c")));
        assert_eq!(store.current().unwrap().access_token, "c");
    }

    #[test]
    fn set_persists_and_clear_deletes() {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let store = TokenStore::new().with_credential_store(credentials.clone());

        store.set(Token::bearer("a"));
        assert_eq!(credentials.load().unwrap().unwrap().access_token, "a");

        store.clear();
        assert!(credentials.load().unwrap().is_none());
    }

    #[test]
    fn restore_loads_persisted_token() {
        let credentials = Arc::new(MemoryCredentialStore::with_token(Token::bearer("saved")));
        let store = TokenStore::new().with_credential_store(credentials);
        let restored = store.restore().unwrap();
        assert_eq!(restored.unwrap().access_token, "saved");
        assert_eq!(store.current().unwrap().access_token, "saved");
    }

    #[test]
    fn restore_without_credential_store_is_noop() {
        let store = TokenStore::new();
        assert!(store.restore().unwrap().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn persistence_failure_keeps_in_memory_token() {
        let store = TokenStore::new().with_credential_store(Arc::new(FailingCredentials));
        store.set(Token::bearer("a"));
        assert_eq!(store.current().unwrap().access_token, "a");
        assert!(store.restore().is_err());
        store.clear();
        assert!(store.current().is_none());
    }
}
