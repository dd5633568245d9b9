// handlers/auth/login.rs - POST /api/auth handler

use std::sync::Arc;

use serde_json::json;

use crate::auth::{generate_jwt, Claims};
use crate::error::ApiError;
use crate::router::{handler_fn, Args, Handler, HandlerResult};
use crate::security::AccessControl;

/// POST /api/auth - Verify credentials and issue a bearer token
///
/// Expected Input:
/// ```json
/// { "username": "admin", "password": "secret" }
/// ```
///
/// Output: `{"token", "username", "roles", "expires_in"}` with status 201.
pub fn handler(access: Arc<AccessControl>, jwt_secret: String, expiry_hours: u64) -> Arc<dyn Handler> {
    handler_fn(move |args: Args| {
        let access = access.clone();
        let jwt_secret = jwt_secret.clone();
        async move { login(&access, &jwt_secret, expiry_hours, &args) }
    })
}

fn login(access: &AccessControl, jwt_secret: &str, expiry_hours: u64, args: &Args) -> HandlerResult {
    let username = args.str("username")?;
    let password = args.str("password")?;

    let principal = access.authenticate(&username, &password).ok_or_else(|| {
        tracing::warn!("Failed login attempt for user '{}'", username);
        ApiError::unauthorized("Invalid credentials")
    })?;

    let claims = Claims::with_expiry(&principal, expiry_hours);
    let token = generate_jwt(&claims, jwt_secret)?;
    tracing::info!("User '{}' logged in", principal.username);

    Ok(json!({
        "token": token,
        "username": principal.username,
        "roles": principal.roles,
        "expires_in": claims.exp - claims.iat,
    }))
}
