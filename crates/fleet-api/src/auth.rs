//! Token authentication.
//!
//! Every route requires a `token` query parameter naming a known user.
//! Authorization is left to the workflows.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use tracing::debug;

use fleet_cluster::ControlError;
use fleet_state::User;

use crate::ApiState;
use crate::error::ApiError;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<ApiState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let token = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(query)| query.token)
            .filter(|token| !token.is_empty());
        let Some(token) = token else {
            debug!(path = %parts.uri.path(), "request without token");
            return Err(ApiError(ControlError::not_authorized()));
        };
        match state.control.store().find_user_by_token(&token)? {
            Some(user) => Ok(AuthUser(user)),
            None => {
                debug!(path = %parts.uri.path(), "request with unknown token");
                Err(ApiError(ControlError::not_authorized()))
            }
        }
    }
}
