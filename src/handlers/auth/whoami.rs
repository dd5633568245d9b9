// handlers/auth/whoami.rs - GET /api/auth/whoami handler

use std::sync::Arc;

use serde_json::json;

use crate::error::ApiError;
use crate::router::{handler_fn, Args, Handler, HandlerResult};

pub fn handler() -> Arc<dyn Handler> {
    handler_fn(|args: Args| async move { whoami(&args) })
}

/// GET /api/auth/whoami - Current principal's username and roles
fn whoami(args: &Args) -> HandlerResult {
    let principal = args
        .principal()
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;
    Ok(json!({
        "username": principal.username,
        "roles": principal.roles,
    }))
}
