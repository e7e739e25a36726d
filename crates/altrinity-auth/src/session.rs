//! Auth session state with token persistence.

use crate::{decode_claims, AuthResult, Claims};
use altrinity_storage::{KeyValueStore, StorageKeys};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
struct SessionState {
    access_token: String,
    refresh_token: Option<String>,
    /// `None` when the payload could not be decoded; the session is still
    /// authenticated and the token is still sent.
    claims: Option<Claims>,
}

/// Current identity of the device user.
///
/// Holds the bearer token used for route submission and the claims decoded
/// from it. Tokens are written through to the key-value store so a restart
/// keeps the user signed in.
pub struct AuthSession {
    store: Arc<dyn KeyValueStore>,
    state: RwLock<Option<SessionState>>,
}

impl AuthSession {
    /// Create an empty (signed-out) session over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            state: RwLock::new(None),
        }
    }

    /// Reload tokens saved by a previous process.
    ///
    /// Returns whether a token was found.
    pub fn restore(&self) -> AuthResult<bool> {
        let Some(access_token) = self.store.get(StorageKeys::ACCESS_TOKEN)? else {
            debug!("No stored access token");
            return Ok(false);
        };
        let refresh_token = self.store.get(StorageKeys::REFRESH_TOKEN)?;

        *self.state.write() = Some(build_state(access_token, refresh_token));
        info!(subject = ?self.subject(), "Restored auth session");
        Ok(true)
    }

    /// Replace the session tokens and persist them.
    pub fn set_token(&self, access_token: &str, refresh_token: Option<&str>) -> AuthResult<()> {
        self.store.set(StorageKeys::ACCESS_TOKEN, access_token)?;
        match refresh_token {
            Some(refresh) => self.store.set(StorageKeys::REFRESH_TOKEN, refresh)?,
            None => {
                self.store.delete(StorageKeys::REFRESH_TOKEN)?;
            }
        }

        let state = build_state(
            access_token.to_string(),
            refresh_token.map(str::to_string),
        );
        *self.state.write() = Some(state);

        info!(subject = ?self.subject(), "Auth token updated");
        Ok(())
    }

    /// Sign out: forget the tokens in memory and in storage.
    pub fn clear(&self) -> AuthResult<()> {
        self.store.delete(StorageKeys::ACCESS_TOKEN)?;
        self.store.delete(StorageKeys::REFRESH_TOKEN)?;
        *self.state.write() = None;
        info!("Auth session cleared");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().is_some()
    }

    /// Current bearer token.
    pub fn token(&self) -> Option<String> {
        self.state.read().as_ref().map(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state
            .read()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
    }

    /// Decoded claims of the current token.
    pub fn claims(&self) -> Option<Claims> {
        self.state.read().as_ref().and_then(|s| s.claims.clone())
    }

    /// Realm roles, empty when signed out or undecodable.
    pub fn roles(&self) -> Vec<String> {
        self.claims()
            .map(|c| c.realm_access.roles)
            .unwrap_or_default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }

    /// Subject identifier (user ID).
    pub fn subject(&self) -> Option<String> {
        self.claims().and_then(|c| c.sub)
    }

    pub fn username(&self) -> Option<String> {
        self.claims().and_then(|c| c.preferred_username)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims().and_then(|c| c.expires_at())
    }
}

fn build_state(access_token: String, refresh_token: Option<String>) -> SessionState {
    let claims = match decode_claims(&access_token) {
        Ok(claims) => Some(claims),
        Err(e) => {
            error!(error = %e, "Failed to decode access token claims");
            None
        }
    };

    SessionState {
        access_token,
        refresh_token,
        claims,
    }
}
