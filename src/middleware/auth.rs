use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::validate_jwt;
use crate::error::ApiError;
use crate::security::Principal;
use crate::server::AppState;

/// Attach the bearer token's principal to the request, if a token is sent.
///
/// Requests without a token pass through anonymously; the dispatcher decides
/// whether the endpoint needs a principal. A token that does not verify, or
/// names a user that no longer exists, is rejected here.
pub async fn principal_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer_token(request.headers()) {
        Ok(token) => token,
        Err(msg) => return ApiError::unauthorized(msg).into_response(),
    };

    if let Some(token) = token {
        match resolve_principal(&state, &token) {
            Ok(principal) => {
                tracing::debug!("Authenticated request as '{}'", principal.username);
                request.extensions_mut().insert(principal);
            }
            Err(err) => return err.into_response(),
        }
    }

    next.run(request).await
}

fn resolve_principal(state: &AppState, token: &str) -> Result<Principal, ApiError> {
    let claims = validate_jwt(token, &state.jwt_secret)?;

    // Roles are read from the live access control so revocations apply at once
    state.access.principal(&claims.username).ok_or_else(|| {
        tracing::warn!("Token presented for unknown user '{}'", claims.username);
        ApiError::unauthorized("User no longer exists")
    })
}

/// `Ok(None)` when no Authorization header is present
fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<String>, String> {
    let Some(auth_header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(Some(token.trim().to_string()))
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}
