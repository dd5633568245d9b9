#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use mgr_dashboard::auth::{generate_jwt, Claims};
use mgr_dashboard::config::AppConfig;
use mgr_dashboard::crash::CrashStore;
use mgr_dashboard::router::{Dispatcher, ResourceGroup};
use mgr_dashboard::security::{AccessControl, ScopeCatalog};
use mgr_dashboard::server::{app, build_route_table, build_state, AppState};

pub const ADMIN_PASSWORD: &str = "admin";

/// sha256("hunter2")
pub const HUNTER2_SHA256: &str = "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.api.enable_request_logging = false;
    config.security.admin_password = Some(ADMIN_PASSWORD.to_string());
    config.security.jwt_secret = "integration-test-secret".to_string();
    config
}

/// Write an access control file to a unique temp path
pub fn write_access_file(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dashboard-access-{}.yaml", uuid::Uuid::new_v4().simple()));
    std::fs::write(&path, contents).expect("write access control file");
    path
}

/// The full axum app driven in-process through `oneshot`
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let state = build_state(&config).expect("dashboard state builds");
        let router = app(state.clone(), &config);
        Self { router, state }
    }

    /// App serving custom groups, with users and roles from `access`
    pub fn with_groups(catalog: ScopeCatalog, access: AccessControl, groups: &[ResourceGroup]) -> Self {
        let config = test_config();
        let table = build_route_table(&config, catalog, groups).expect("route table builds");
        let access = Arc::new(access);
        let state = AppState {
            dispatcher: Dispatcher::new(Arc::new(table), access.clone()),
            access,
            jwt_secret: Arc::from(config.security.jwt_secret.as_str()),
            crash: CrashStore::in_memory(),
        };
        let router = app(state.clone(), &config);
        Self { router, state }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.expect("infallible service");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        self.send(request(method, uri, token, body)).await
    }

    /// Mint a token for a configured user without going through `/api/auth`
    pub async fn login_as(&self, username: &str) -> String {
        let principal = self.state.access.principal(username).expect("known user");
        let claims = Claims::with_expiry(&principal, 1);
        generate_jwt(&claims, &self.state.jwt_secret).expect("token signs")
    }

    pub async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth",
                None,
                Some(json!({"username": username, "password": password})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "login failed: {body}");
        body["token"].as_str().expect("token in login response").to_string()
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("valid request"),
        None => builder.body(Body::empty()).expect("valid request"),
    }
}

/// The built binary, listening on a free port; killed on drop
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    pub async fn spawn() -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let child = Command::new(env!("CARGO_BIN_EXE_mgr-dashboard"))
            .arg("serve")
            .env("APP_ENV", "development")
            .env("DASHBOARD_PORT", port.to_string())
            .env("DASHBOARD_ADMIN_PASSWORD", ADMIN_PASSWORD)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn server binary")?;

        let server = Self { port, base_url, child };
        server.wait_ready(Duration::from_secs(10)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == reqwest::StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
