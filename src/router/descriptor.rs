//! Endpoint descriptors: what one exposed operation looks like once its
//! annotation and signature have been combined.
//!
//! Parameter classification follows two rules:
//!
//! * GET/DELETE: a parameter is a path parameter when the mount path names it
//!   as a placeholder, or when it is required and not listed as a query
//!   parameter. Everything else is a query parameter. There are no body
//!   parameters.
//! * POST/PUT: path parameters are the placeholders in the mount path plus the
//!   explicitly declared path parameters. Query parameters are the declared
//!   ones. The rest travels in the body.

use std::sync::Arc;

use serde::Serialize;

use super::endpoint::{normalize_endpoint_path, EndpointSpec, Method};
use super::error::RegistryError;
use super::handler::Handler;
use super::signature::{Param, Signature};
use crate::security::{Permission, Scope, ScopeCatalog};

/// Attributes an endpoint inherits from its resource group
#[derive(Debug, Clone)]
pub(crate) struct GroupContext {
    pub name: String,
    pub mount_path: String,
    pub scope: Option<Scope>,
    pub secure: bool,
    pub is_api: bool,
}

#[derive(Clone, Serialize)]
pub struct EndpointDescriptor {
    pub group: String,
    pub action: String,
    pub method: Method,
    /// URL template relative to the table's prefix
    pub url: String,
    pub path_params: Vec<Param>,
    pub query_params: Vec<Param>,
    pub body_params: Vec<Param>,
    pub json_response: bool,
    pub proxy: bool,
    pub status: u16,
    pub permissions: Vec<Permission>,
    pub scope: Option<Scope>,
    pub secure: bool,
    pub is_api: bool,
    #[serde(skip)]
    pub(crate) signature: Signature,
    #[serde(skip)]
    pub(crate) handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Endpoint({}, {}, {})", self.url, self.method, self.action)
    }
}

impl EndpointDescriptor {
    pub(crate) fn derive(
        group: &GroupContext,
        catalog: &ScopeCatalog,
        action: &str,
        spec: EndpointSpec,
        signature: Signature,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RegistryError> {
        let method = spec.method;
        let optional_path_param = |param: &str| RegistryError::OptionalPathParam {
            group: group.name.clone(),
            action: action.to_string(),
            param: param.to_string(),
        };

        if method.is_url_only() && spec.path_params.is_some() {
            return Err(RegistryError::PathParamsNotAllowed {
                group: group.name.clone(),
                action: action.to_string(),
                method: method.to_string(),
            });
        }
        let explicit_path_params = spec.path_params.clone().unwrap_or_default();
        if let Some(param) = signature
            .params()
            .iter()
            .find(|p| explicit_path_params.contains(&p.name) && !p.required)
        {
            return Err(optional_path_param(&param.name));
        }

        let endpoint_path = normalize_endpoint_path(spec.path.as_deref());
        let placeholders = path_param_names(&join_url(
            &group.mount_path,
            endpoint_path.as_deref().unwrap_or(""),
        ));

        let path_params: Vec<Param> = signature
            .params()
            .iter()
            .filter(|p| {
                placeholders.contains(&p.name)
                    || if method.is_url_only() {
                        p.required && !spec.query_params.contains(&p.name)
                    } else {
                        explicit_path_params.contains(&p.name)
                    }
            })
            .cloned()
            .collect();
        if let Some(param) = path_params.iter().find(|p| !p.required) {
            return Err(optional_path_param(&param.name));
        }

        let is_path = |p: &Param| path_params.iter().any(|pp| pp.name == p.name);
        let query_params: Vec<Param> = signature
            .params()
            .iter()
            .filter(|p| {
                !is_path(p) && (method.is_url_only() || spec.query_params.contains(&p.name))
            })
            .cloned()
            .collect();
        let body_params: Vec<Param> = signature
            .params()
            .iter()
            .filter(|p| !is_path(p) && !query_params.iter().any(|q| q.name == p.name))
            .cloned()
            .collect();

        let mut url = match &endpoint_path {
            Some(path) => join_url(&group.mount_path, path),
            None => join_url(&group.mount_path, &format!("/{}", action)),
        };
        let extra: Vec<String> = path_params
            .iter()
            .filter(|p| !placeholders.contains(&p.name))
            .map(|p| format!("{{{}}}", p.name))
            .collect();
        if !extra.is_empty() {
            url = join_url(&url, &format!("/{}", extra.join("/")));
        }

        let scope = match &spec.scope {
            Some(name) => Some(catalog.scope(name)?),
            None => group.scope.clone(),
        };
        let permissions = spec.permissions.resolve(method);
        if group.secure && !permissions.is_empty() && scope.is_none() {
            return Err(RegistryError::MissingScope {
                group: group.name.clone(),
                action: action.to_string(),
            });
        }

        Ok(Self {
            group: group.name.clone(),
            action: action.to_string(),
            method,
            url,
            path_params,
            query_params,
            body_params,
            json_response: spec.json_response,
            proxy: spec.proxy,
            status: spec.status,
            permissions,
            scope,
            secure: group.secure,
            is_api: group.is_api,
            signature,
            handler,
        })
    }

    pub fn path_param_names(&self) -> Vec<&str> {
        self.path_params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn query_param_names(&self) -> Vec<&str> {
        self.query_params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn body_param_names(&self) -> Vec<&str> {
        self.body_params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// Placeholder names in a URL template, accepting `:name`, `{name}` and
/// `{name:regex}` segments
pub fn path_param_names(path: &str) -> Vec<String> {
    path.split('/')
        .filter_map(|step| {
            if let Some(name) = step.strip_prefix(':') {
                Some(name.to_string())
            } else if step.len() >= 2 && step.starts_with('{') && step.ends_with('}') {
                let inner = &step[1..step.len() - 1];
                Some(inner.split(':').next().unwrap_or(inner).to_string())
            } else {
                None
            }
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Concatenate URL pieces, treating a bare "/" base as the root
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = if base == "/" { "" } else { base };
    let url = format!("{}{}", base, path);
    if url.is_empty() {
        "/".to_string()
    } else {
        url
    }
}
