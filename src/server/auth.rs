//! API key authentication.
//!
//! Keys are loaded from the server config file and map to a user and the
//! family whose records that user shares.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use super::routes::AppState;
use crate::config::{ApiKeyEntry, ConfigFile};

/// Authenticated user info, added to request extensions after auth
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
    pub family_id: String,
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    /// Load API keys from config file
    ///
    /// A missing or unreadable file yields an empty store; every
    /// authenticated request then fails.
    pub fn load(config_path: &Path) -> Self {
        match ConfigFile::load(config_path) {
            Ok(config) => {
                let store = Self::from_entries(config.api_keys);
                tracing::info!("Loaded {} API key(s)", store.len());
                store
            }
            Err(e) => {
                tracing::warn!("{}", e);
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }

    pub fn from_entries(entries: Vec<ApiKeyEntry>) -> Self {
        let keys = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AuthUser {
                        user_id: entry.user_id,
                        family_id: entry.family_id,
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Validate an API key and return the associated user
    pub fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Auth error response
#[derive(Serialize)]
struct AuthError {
    error: &'static str,
    message: &'static str,
}

fn unauthorized(error: &'static str, message: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(AuthError { error, message })).into_response()
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key,
            None => {
                return unauthorized(
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => return unauthorized("missing_auth", "Authorization header required"),
    };

    match state.api_keys.validate(api_key) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => unauthorized("invalid_key", "Invalid API key"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, user: &str, family: &str) -> ApiKeyEntry {
        ApiKeyEntry {
            key: key.to_string(),
            user_id: user.to_string(),
            family_id: family.to_string(),
        }
    }

    #[test]
    fn test_validate() {
        let store = ApiKeyStore::from_entries(vec![
            entry("k1", "parent1", "family1"),
            entry("k2", "parent2", "family1"),
        ]);

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.validate("k2"),
            Some(AuthUser {
                user_id: "parent2".into(),
                family_id: "family1".into()
            })
        );
        assert!(store.validate("nope").is_none());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::load(&temp_dir.path().join("absent.yaml"));
        assert!(store.is_empty());
    }
}
