use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub crash: CrashConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Prefix prepended to every registered route
    pub url_prefix: String,
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Applied to resource groups that do not say whether they are secured
    pub secure_by_default: bool,
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub access_control_file: Option<String>,
    #[serde(skip_serializing)]
    pub admin_password: Option<String>,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashConfig {
    pub prune_keep_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // API overrides
        if let Ok(v) = env::var("DASHBOARD_URL_PREFIX") {
            self.api.url_prefix = v.trim_end_matches('/').to_string();
        }
        if let Some(port) = env::var("DASHBOARD_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_SECURE_BY_DEFAULT") {
            self.security.secure_by_default = v.parse().unwrap_or(self.security.secure_by_default);
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("DASHBOARD_ACCESS_FILE") {
            self.security.access_control_file = Some(v);
        }
        if let Ok(v) = env::var("DASHBOARD_ADMIN_PASSWORD") {
            self.security.admin_password = Some(v);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Crash overrides
        if let Ok(v) = env::var("CRASH_PRUNE_KEEP_DAYS") {
            self.crash.prune_keep_days = v.parse().unwrap_or(self.crash.prune_keep_days);
        }

        self
    }

    pub fn is_development(&self) -> bool {
        matches!(self.environment, Environment::Development)
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig {
                url_prefix: String::new(),
                port: 8080,
                enable_request_logging: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                secure_by_default: true,
                jwt_secret: "development-only-secret".to_string(),
                jwt_expiry_hours: 8,
                access_control_file: None,
                admin_password: Some("admin".to_string()),
                enable_cors: true,
                cors_origins: vec!["http://localhost:4200".to_string()],
            },
            crash: CrashConfig { prune_keep_days: 30 },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            api: ApiConfig {
                url_prefix: String::new(),
                port: 8080,
                enable_request_logging: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            security: SecurityConfig {
                secure_by_default: true,
                jwt_secret: String::new(),
                jwt_expiry_hours: 8,
                access_control_file: None,
                admin_password: None,
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
            crash: CrashConfig { prune_keep_days: 30 },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            api: ApiConfig {
                url_prefix: String::new(),
                port: 8443,
                enable_request_logging: false,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
            },
            security: SecurityConfig {
                secure_by_default: true,
                jwt_secret: String::new(),
                jwt_expiry_hours: 8,
                access_control_file: None,
                admin_password: None,
                enable_cors: false,
                cors_origins: Vec::new(),
            },
            crash: CrashConfig { prune_keep_days: 365 },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
