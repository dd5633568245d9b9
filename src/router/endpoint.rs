use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::error::RegistryError;
use crate::security::Permission;

/// HTTP methods an endpoint may be restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// GET and DELETE take every argument from the URL
    pub fn is_url_only(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }

    /// Permission implied by the method when a handler does not name one
    pub fn default_permission(&self) -> Permission {
        match self {
            Method::Get => Permission::Read,
            Method::Post => Permission::Create,
            Method::Put => Permission::Update,
            Method::Delete => Permission::Delete,
        }
    }

    pub fn from_http(method: &axum::http::Method) -> Option<Self> {
        match *method {
            axum::http::Method::GET => Some(Method::Get),
            axum::http::Method::POST => Some(Method::Post),
            axum::http::Method::PUT => Some(Method::Put),
            axum::http::Method::DELETE => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            _ => Err(RegistryError::InvalidMethod(s.to_string())),
        }
    }
}

/// Where an endpoint's required permissions come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPolicy {
    /// One permission implied by the HTTP method
    FromMethod,
    /// Exactly these permissions; empty means "authenticated is enough"
    Explicit(Vec<Permission>),
}

impl PermissionPolicy {
    pub fn resolve(&self, method: Method) -> Vec<Permission> {
        match self {
            PermissionPolicy::FromMethod => vec![method.default_permission()],
            PermissionPolicy::Explicit(permissions) => permissions.clone(),
        }
    }

    pub(crate) fn add(&mut self, permission: Permission) {
        match self {
            PermissionPolicy::FromMethod => *self = PermissionPolicy::Explicit(vec![permission]),
            PermissionPolicy::Explicit(permissions) => {
                if !permissions.contains(&permission) {
                    permissions.push(permission);
                    permissions.sort();
                }
            }
        }
    }
}

/// Annotation attached to a handler when it is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub(crate) method: Method,
    pub(crate) path: Option<String>,
    pub(crate) path_params: Option<Vec<String>>,
    pub(crate) query_params: Vec<String>,
    pub(crate) json_response: bool,
    pub(crate) proxy: bool,
    pub(crate) status: u16,
    pub(crate) permissions: PermissionPolicy,
    pub(crate) scope: Option<String>,
}

impl Default for EndpointSpec {
    fn default() -> Self {
        Self::new(Method::Get)
    }
}

impl EndpointSpec {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            path: None,
            path_params: None,
            query_params: Vec::new(),
            json_response: true,
            proxy: false,
            status: 200,
            permissions: PermissionPolicy::FromMethod,
            scope: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::Get)
    }

    pub fn post() -> Self {
        Self::new(Method::Post)
    }

    pub fn put() -> Self {
        Self::new(Method::Put)
    }

    pub fn delete() -> Self {
        Self::new(Method::Delete)
    }

    /// Pass-through endpoint: matches every HTTP method and captures the
    /// rest of the URL in a `path` parameter
    pub fn proxy(path: Option<&str>) -> Self {
        let base = match path {
            None | Some("/") => "",
            Some(p) => p,
        };
        let mut spec = Self::new(Method::Get).path(format!("{}/{{path:.*}}", base));
        spec.proxy = true;
        spec
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Extra path placeholders for POST/PUT endpoints
    pub fn path_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    pub fn query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn json_response(mut self, json_response: bool) -> Self {
        self.json_response = json_response;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Require a permission instead of the one implied by the method.
    /// Repeated calls accumulate.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.add(permission);
        self
    }

    /// Require authentication only
    pub fn no_permissions(mut self) -> Self {
        self.permissions = PermissionPolicy::Explicit(Vec::new());
        self
    }

    /// Check against this scope instead of the group's default
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

/// Normalized endpoint path: trimmed, leading slash, and "/" collapsed to "".
/// `None` keeps meaning "derive the path from the action name".
pub(crate) fn normalize_endpoint_path(path: Option<&str>) -> Option<String> {
    path.map(|p| {
        let p = p.trim();
        if p == "/" {
            String::new()
        } else if !p.is_empty() && !p.starts_with('/') {
            format!("/{}", p)
        } else {
            p.to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_is_restricted() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("Delete".parse::<Method>().unwrap(), Method::Delete);
        assert_eq!(
            "PATCH".parse::<Method>(),
            Err(RegistryError::InvalidMethod("PATCH".into()))
        );
    }

    #[test]
    fn explicit_permissions_replace_method_default() {
        let spec = EndpointSpec::post();
        assert_eq!(spec.permissions.resolve(Method::Post), vec![Permission::Create]);

        let spec = EndpointSpec::post()
            .with_permission(Permission::Delete)
            .with_permission(Permission::Read)
            .with_permission(Permission::Delete);
        assert_eq!(
            spec.permissions.resolve(Method::Post),
            vec![Permission::Read, Permission::Delete]
        );

        let spec = EndpointSpec::get().no_permissions();
        assert!(spec.permissions.resolve(Method::Get).is_empty());
    }

    #[test]
    fn proxy_captures_remaining_path() {
        let spec = EndpointSpec::proxy(Some("/grafana"));
        assert!(spec.proxy);
        assert_eq!(spec.path.as_deref(), Some("/grafana/{path:.*}"));

        let spec = EndpointSpec::proxy(Some("/"));
        assert_eq!(spec.path.as_deref(), Some("/{path:.*}"));
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_endpoint_path(None), None);
        assert_eq!(normalize_endpoint_path(Some("/")).as_deref(), Some(""));
        assert_eq!(normalize_endpoint_path(Some(" status ")).as_deref(), Some("/status"));
        assert_eq!(normalize_endpoint_path(Some("/a/b")).as_deref(), Some("/a/b"));
    }
}
