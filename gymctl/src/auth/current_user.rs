//! Extract the authenticated user from a request.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{instrument, trace};

/// Session token from the configured cookie, if present
fn token_from_cookie<'a>(parts: &'a Parts, config: &Config) -> Option<&'a str> {
    let cookie_name = &config.auth.session.cookie_name;
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| name == cookie_name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn token_from_bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let config = &state.config;

        if let Some(token) = token_from_cookie(parts, config) {
            match session::verify_session_token(token, config) {
                Ok(user) => return Ok(user),
                // A stale cookie should not mask a valid bearer token
                Err(Error::Unauthenticated { .. }) => trace!("Ignoring invalid session cookie"),
                Err(e) => return Err(e),
            }
        }

        if let Some(token) = token_from_bearer(parts) {
            return session::verify_session_token(token, config);
        }

        Err(Error::Unauthenticated { message: None })
    }
}
