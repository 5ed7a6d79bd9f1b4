use std::sync::Arc;

use super::{AuthResult, Token, UserProfile};
use crate::storage::SecureStorage;

pub const TOKEN_KEY: &str = "oauth_token";
pub const PROFILE_KEY: &str = "user_profile";

/// Persists the token and the signed-in profile as JSON in secure storage.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn SecureStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    pub fn save_token(&self, token: &Token) -> AuthResult<()> {
        let raw = serde_json::to_vec(token)?;
        self.storage.put(TOKEN_KEY, &raw)?;
        Ok(())
    }

    pub fn load_token(&self) -> AuthResult<Option<Token>> {
        match self.storage.get(TOKEN_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save_profile(&self, profile: &UserProfile) -> AuthResult<()> {
        let raw = serde_json::to_vec(profile)?;
        self.storage.put(PROFILE_KEY, &raw)?;
        Ok(())
    }

    pub fn load_profile(&self) -> AuthResult<Option<UserProfile>> {
        match self.storage.get(PROFILE_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Whether a token has been persisted.
    pub fn is_authenticated(&self) -> AuthResult<bool> {
        Ok(self.storage.get(TOKEN_KEY)?.is_some())
    }

    /// Delete every persisted credential. All keys are attempted; the first
    /// failure is returned.
    pub fn clear(&self) -> AuthResult<()> {
        let mut first_error = None;
        for key in [TOKEN_KEY, PROFILE_KEY] {
            if let Err(error) = self.storage.delete(key) {
                tracing::warn!(key, %error, "Failed to delete credential");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::token_expiring_in;
    use crate::auth::AuthError;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn store() -> (Arc<MemoryStorage>, CredentialStore) {
        let storage = Arc::new(MemoryStorage::new());
        (storage.clone(), CredentialStore::new(storage))
    }

    #[test]
    fn token_round_trip() {
        let (_, credentials) = store();
        assert_eq!(credentials.load_token().unwrap(), None);
        assert!(!credentials.is_authenticated().unwrap());

        let token = token_expiring_in(3600);
        credentials.save_token(&token).unwrap();
        assert_eq!(credentials.load_token().unwrap(), Some(token));
        assert!(credentials.is_authenticated().unwrap());
    }

    #[test]
    fn clear_removes_token_and_profile() {
        let (storage, credentials) = store();
        credentials.save_token(&token_expiring_in(3600)).unwrap();
        credentials
            .save_profile(&UserProfile {
                id: "1".to_string(),
                email: "a@example.com".to_string(),
                name: "A".to_string(),
                picture: None,
                created_at: 1,
            })
            .unwrap();

        credentials.clear().unwrap();
        assert!(storage.is_empty());
        assert_eq!(credentials.load_profile().unwrap(), None);
    }

    #[test]
    fn save_failure_propagates() {
        let (storage, credentials) = store();
        storage.set_fail_writes(true);
        let error = credentials.save_token(&token_expiring_in(10)).unwrap_err();
        assert!(matches!(error, AuthError::SecureStorage(_)));
    }

    #[test]
    fn corrupt_token_is_an_error() {
        let (storage, credentials) = store();
        storage.put(TOKEN_KEY, b"{not json").unwrap();
        assert!(matches!(
            credentials.load_token(),
            Err(AuthError::Json(_))
        ));
    }
}
