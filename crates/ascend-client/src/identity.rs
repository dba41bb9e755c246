//! Cached identity credentials

use std::sync::RwLock;

use tracing::info;

/// Source of the bearer token presented to the remote store.
pub trait IdentityProvider: Send + Sync {
    fn identity_id(&self) -> &str;

    /// Current token, or `None` if the user must authenticate again
    fn token(&self) -> Option<String>;

    fn set_token(&self, token: String);

    /// Drop the cached token after the remote store rejected it
    fn invalidate(&self);
}

/// In-memory token cache for one identity
#[derive(Debug)]
pub struct CachedIdentity {
    identity_id: String,
    token: RwLock<Option<String>>,
}

impl CachedIdentity {
    pub fn new(identity_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            token: RwLock::new(token.filter(|t| !t.is_empty())),
        }
    }
}

impl IdentityProvider for CachedIdentity {
    fn identity_id(&self) -> &str {
        &self.identity_id
    }

    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_token(&self, token: String) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token).filter(|t| !t.is_empty());
    }

    fn invalidate(&self) {
        let mut token = self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if token.take().is_some() {
            info!(identity = %self.identity_id, "Cached identity token invalidated");
        }
    }
}
