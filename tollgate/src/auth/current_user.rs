use crate::{
    AppState,
    api::models::auth::CurrentUser,
    auth::session,
    db::handlers::{Repository, Users},
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument, trace};

/// Extract the session identity from the JWT cookie if present and valid
/// Returns:
/// - None: No session cookie present
/// - Some(Ok(identity)): Valid JWT found and verified
/// - Some(Err(error)): Cookie header present but unreadable
#[instrument(skip(parts, config))]
fn try_jwt_session_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<session::SessionIdentity>> {
    let cookie_header = parts.headers.get(axum::http::header::COOKIE)?;

    let cookie_str = match cookie_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid cookie header: {e}"),
            }));
        }
    };
    let cookie_name = &config.auth.session.cookie_name;

    for cookie in cookie_str.split(';') {
        let cookie = cookie.trim();
        if let Some((name, value)) = cookie.split_once('=') {
            if name == cookie_name {
                // Try to verify the JWT session token
                match session::verify_session_token(value, config) {
                    Ok(identity) => return Some(Ok(identity)),
                    Err(_) => {
                        // Invalid/expired token, continue checking other cookies
                        // Expected churn for expired sessions, so not propagated
                        continue;
                    }
                }
            }
        }
    }
    None
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let identity = match try_jwt_session_auth(parts, &state.config) {
            Some(Ok(identity)) => identity,
            Some(Err(e)) => return Err(e),
            None => {
                trace!("No session cookie on request");
                return Err(Error::Unauthenticated { message: None });
            }
        };

        // The token proves identity at issuance time; account state is
        // re-read on every request so a deleted user cannot ride an
        // orphaned session.
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let mut users = Users::new(&mut conn);
        let user = users.get_by_id(identity.id).await?.ok_or(Error::Unauthenticated { message: None })?;

        debug!("Session authenticated user: {}", user.id);
        Ok(CurrentUser::from(user))
    }
}
