use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::ServerConfig;

use super::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<Store>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<Store>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// An empty profile list admits every caller.
    fn knows_profile(&self, profile_id: &str) -> bool {
        self.config.profiles.is_empty() || self.config.profiles.iter().any(|p| p == profile_id)
    }
}

/// The driver profile a request acts for, taken from the `perfil_id` query parameter.
#[derive(Debug, Clone)]
pub struct Profile(pub String);

#[derive(Deserialize)]
struct ProfileQuery {
    perfil_id: Option<String>,
}

pub enum AuthError {
    MissingProfile,
    UnknownProfile,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingProfile => (StatusCode::UNAUTHORIZED, "Missing perfil_id"),
            AuthError::UnknownProfile => (StatusCode::FORBIDDEN, "Unknown perfil_id"),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl FromRequestParts<AppState> for Profile {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let profile_id = Query::<ProfileQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.perfil_id)
            .filter(|p| !p.trim().is_empty())
            .ok_or(AuthError::MissingProfile)?;

        if !state.knows_profile(&profile_id) {
            log::warn!("Rejected request for unknown profile {}", profile_id);
            return Err(AuthError::UnknownProfile);
        }

        Ok(Profile(profile_id))
    }
}
