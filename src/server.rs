use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::crash::CrashStore;
use crate::handlers;
use crate::middleware::principal_middleware;
use crate::router::{DispatchRequest, Dispatcher, RegistryError, ResourceGroup, RouteTable};
use crate::security::access_control::ADMINISTRATOR_ROLE;
use crate::security::{AccessControl, Principal, ScopeCatalog};

const ADMIN_USERNAME: &str = "admin";

/// Shared, read-only request context
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub access: Arc<AccessControl>,
    pub jwt_secret: Arc<str>,
    pub crash: CrashStore,
}

/// Load users and roles, then register every resource group.
/// Any configuration problem aborts startup.
pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let catalog = ScopeCatalog::default();

    let mut access = match &config.security.access_control_file {
        Some(path) => AccessControl::load(path, &catalog)
            .with_context(|| format!("failed to load access control file {}", path))?,
        None => AccessControl::default(),
    };

    if let Some(password) = &config.security.admin_password {
        if access.principal(ADMIN_USERNAME).is_none() {
            access.add_user(ADMIN_USERNAME, password, vec![ADMINISTRATOR_ROLE.to_string()])?;
            if config.is_development() {
                tracing::warn!("Seeded '{}' account with the development password", ADMIN_USERNAME);
            } else {
                tracing::info!("Seeded '{}' account from DASHBOARD_ADMIN_PASSWORD", ADMIN_USERNAME);
            }
        }
    }
    if access.user_count() == 0 {
        tracing::warn!("No dashboard users configured; secured endpoints are unreachable");
    }

    let access = Arc::new(access);
    let crash = CrashStore::in_memory();
    let groups = handlers::resource_groups(config, access.clone(), crash.clone());
    let table = build_route_table(config, catalog, &groups)?;

    Ok(AppState {
        dispatcher: Dispatcher::new(Arc::new(table), access.clone()),
        access,
        jwt_secret: Arc::from(config.security.jwt_secret.as_str()),
        crash,
    })
}

pub fn build_route_table(
    config: &AppConfig,
    catalog: ScopeCatalog,
    groups: &[ResourceGroup],
) -> Result<RouteTable, RegistryError> {
    let mut builder = RouteTable::builder(catalog)
        .url_prefix(config.api.url_prefix.clone())
        .secure_by_default(config.security.secure_by_default);
    for group in groups {
        builder.register(group)?;
    }
    builder.build()
}

pub fn app(state: AppState, config: &AppConfig) -> Router {
    let mut router = Router::new()
        // Served outside the registry
        .route("/", get(root))
        .route("/health", get(health))
        .route("/docs/routes", get(route_docs))
        // Everything else goes through the route table
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), principal_middleware))
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes));

    if config.security.enable_cors {
        router = router.layer(cors_layer(&config.security.cors_origins));
    }
    if config.api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }

    router.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn serve(config: &AppConfig) -> anyhow::Result<()> {
    let state = build_state(config)?;
    tracing::info!(
        "Starting dashboard in {:?} mode with {} routes",
        config.environment,
        state.dispatcher.table().len()
    );

    let app = app(state, config);
    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Dashboard listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn dispatch(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = DispatchRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
        principal: principal.map(|Extension(p)| p),
    };

    match state.dispatcher.dispatch(request).await {
        Ok(response) => response.into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "Ceph Manager Dashboard",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": state.dispatcher.table().len(),
        "documentation": "/docs/routes",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

async fn route_docs(State(state): State<AppState>) -> Json<Value> {
    let table = state.dispatcher.table();
    Json(json!({
        "url_prefix": table.url_prefix(),
        "parent_urls": table.parent_urls(),
        "routes": table.summaries(),
    }))
}
