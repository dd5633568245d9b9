use std::sync::Arc;

use super::descriptor::{path_param_names, EndpointDescriptor, GroupContext};
use super::endpoint::{EndpointSpec, Method, PermissionPolicy};
use super::error::RegistryError;
use super::handler::Handler;
use super::signature::Signature;
use crate::security::{Permission, ScopeCatalog};

/// Standard operations of a REST resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestOp {
    List,
    Create,
    BulkSet,
    BulkDelete,
    Get,
    Delete,
    Set,
}

impl RestOp {
    /// Operations consulted, in order, when inferring the resource identifier
    const ID_SOURCES: [RestOp; 3] = [RestOp::Get, RestOp::Set, RestOp::Delete];

    pub fn action(&self) -> &'static str {
        match self {
            RestOp::List => "list",
            RestOp::Create => "create",
            RestOp::BulkSet => "bulk_set",
            RestOp::BulkDelete => "bulk_delete",
            RestOp::Get => "get",
            RestOp::Delete => "delete",
            RestOp::Set => "set",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            RestOp::List | RestOp::Get => Method::Get,
            RestOp::Create => Method::Post,
            RestOp::BulkSet | RestOp::Set => Method::Put,
            RestOp::BulkDelete | RestOp::Delete => Method::Delete,
        }
    }

    /// Whether the operation addresses a single resource by its identifier
    pub fn is_resource(&self) -> bool {
        matches!(self, RestOp::Get | RestOp::Delete | RestOp::Set)
    }

    pub fn status(&self) -> u16 {
        match self {
            RestOp::Create => 201,
            RestOp::BulkDelete | RestOp::Delete => 204,
            _ => 200,
        }
    }
}

/// A custom operation mounted on the collection or under a resource identifier
#[derive(Debug, Clone)]
pub struct CustomOp {
    method: Method,
    path: Option<String>,
    status: u16,
    query_params: Option<Vec<String>>,
}

impl CustomOp {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            path: None,
            status: 200,
            query_params: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_params = Some(params.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Clone)]
enum OperationKind {
    Endpoint(EndpointSpec),
    Rest(RestOp),
    Collection(CustomOp),
    Resource(CustomOp),
}

#[derive(Clone)]
struct Operation {
    action: String,
    kind: OperationKind,
    signature: Signature,
    permissions: Option<Vec<Permission>>,
    handler: Arc<dyn Handler>,
}

/// Handlers sharing a URL prefix and a default security scope
#[derive(Clone)]
pub struct ResourceGroup {
    name: String,
    base_url: Option<String>,
    path: String,
    scope: Option<String>,
    secure: Option<bool>,
    is_api: bool,
    resource_id: Option<String>,
    operations: Vec<Operation>,
}

impl std::fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGroup")
            .field("name", &self.name)
            .field("mount_path", &self.mount_path())
            .field("scope", &self.scope)
            .field("operations", &self.operations.iter().map(|o| &o.action).collect::<Vec<_>>())
            .finish()
    }
}

impl ResourceGroup {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.is_empty() && !path.starts_with('/') {
            path = format!("/{}", path);
        }
        Self {
            name: name.into(),
            base_url: None,
            path,
            scope: None,
            secure: None,
            is_api: false,
            resource_id: None,
            operations: Vec::new(),
        }
    }

    /// Group mounted under `/api`
    pub fn api(name: impl Into<String>, path: impl Into<String>) -> Self {
        let mut group = Self::new(name, path).base_url("/api");
        group.is_api = true;
        group
    }

    /// Group mounted under `/ui-api`
    pub fn ui_api(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, path).base_url("/ui-api")
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn security_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Explicit resource identifier; a composite one is written "a/b"
    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mount_path(&self) -> String {
        let base = match self.base_url.as_deref() {
            None | Some("/") => "",
            Some(b) => b,
        };
        if base.is_empty() && self.path.is_empty() {
            "/".to_string()
        } else {
            format!("{}{}", base, self.path)
        }
    }

    pub fn endpoint(
        self,
        action: impl Into<String>,
        spec: EndpointSpec,
        signature: Signature,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.push(action.into(), OperationKind::Endpoint(spec), signature, handler)
    }

    /// Endpoint answering on the group's own path
    pub fn index(self, mut spec: EndpointSpec, signature: Signature, handler: Arc<dyn Handler>) -> Self {
        if spec.path.is_none() {
            spec.path = Some(String::new());
        }
        self.endpoint("index", spec, signature, handler)
    }

    pub fn rest(self, op: RestOp, signature: Signature, handler: Arc<dyn Handler>) -> Self {
        self.push(op.action().to_string(), OperationKind::Rest(op), signature, handler)
    }

    pub fn collection(
        self,
        action: impl Into<String>,
        op: CustomOp,
        signature: Signature,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.push(action.into(), OperationKind::Collection(op), signature, handler)
    }

    pub fn resource(
        self,
        action: impl Into<String>,
        op: CustomOp,
        signature: Signature,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.push(action.into(), OperationKind::Resource(op), signature, handler)
    }

    /// Replace the method-derived permission of an already added action.
    /// Repeated calls accumulate.
    pub fn with_permissions(mut self, action: &str, permissions: impl IntoIterator<Item = Permission>) -> Self {
        if let Some(op) = self.operations.iter_mut().find(|o| o.action == action) {
            let list = op.permissions.get_or_insert_with(Vec::new);
            for permission in permissions {
                if !list.contains(&permission) {
                    list.push(permission);
                }
            }
            list.sort();
        }
        self
    }

    fn push(mut self, action: String, kind: OperationKind, signature: Signature, handler: Arc<dyn Handler>) -> Self {
        self.operations.push(Operation {
            action,
            kind,
            signature,
            permissions: None,
            handler,
        });
        self
    }

    fn rest_op(&self, op: RestOp) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|o| matches!(o.kind, OperationKind::Rest(r) if r == op))
    }

    /// Identifier parameters of a single resource.
    ///
    /// An explicit declaration wins. Otherwise the first of get, set and
    /// delete that is present lends its required parameters, minus those
    /// already bound by the mount path. `None` when nothing usable exists.
    pub fn infer_resource_id(&self) -> Option<Vec<String>> {
        if let Some(id) = &self.resource_id {
            let parts: Vec<String> = id
                .split('/')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            return if parts.is_empty() { None } else { Some(parts) };
        }

        let mount_params = path_param_names(&self.mount_path());
        let op = RestOp::ID_SOURCES.iter().find_map(|op| self.rest_op(*op))?;
        let ids: Vec<String> = op
            .signature
            .required_names()
            .filter(|name| !mount_params.iter().any(|m| m == name))
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            None
        } else {
            Some(ids)
        }
    }

    /// Derive every endpoint descriptor of the group
    pub(crate) fn descriptors(
        &self,
        catalog: &ScopeCatalog,
        secure_by_default: bool,
    ) -> Result<Vec<EndpointDescriptor>, RegistryError> {
        let mount_path = self.mount_path();
        let first_segment = mount_path.trim_start_matches('/').split('/').next().unwrap_or("");
        if first_segment.starts_with(':') || first_segment.starts_with('{') {
            tracing::error!("Invalid url prefix '{}' for resource group '{}'", mount_path, self.name);
            return Err(RegistryError::InvalidUrlPrefix {
                group: self.name.clone(),
                prefix: mount_path,
            });
        }

        let context = GroupContext {
            name: self.name.clone(),
            mount_path: mount_path.clone(),
            scope: self.scope.as_deref().map(|s| catalog.scope(s)).transpose()?,
            secure: self.secure.unwrap_or(secure_by_default),
            is_api: self.is_api,
        };

        let resource_id = self.infer_resource_id();
        let mut seen = std::collections::HashSet::new();
        let mut descriptors = Vec::with_capacity(self.operations.len());

        for op in &self.operations {
            if !seen.insert(op.action.as_str()) {
                return Err(RegistryError::DuplicateAction {
                    group: self.name.clone(),
                    action: op.action.clone(),
                });
            }

            let spec = self.operation_spec(op, resource_id.as_deref())?;
            descriptors.push(EndpointDescriptor::derive(
                &context,
                catalog,
                &op.action,
                spec,
                op.signature.clone(),
                op.handler.clone(),
            )?);
        }

        tracing::info!(
            "Registered resource group {} -> {} ({} endpoints)",
            self.name,
            mount_path,
            descriptors.len()
        );
        Ok(descriptors)
    }

    fn operation_spec(&self, op: &Operation, resource_id: Option<&[String]>) -> Result<EndpointSpec, RegistryError> {
        let id_path = || -> Result<String, RegistryError> {
            match resource_id {
                Some(ids) => Ok(format!(
                    "/{}",
                    ids.iter().map(|id| format!("{{{}}}", id)).collect::<Vec<_>>().join("/")
                )),
                None => Err(RegistryError::ResourceIdNotInferred {
                    group: self.name.clone(),
                    action: op.action.clone(),
                }),
            }
        };
        let default_path = || format!("/{}", op.action);

        let (method, path, status, query_params) = match &op.kind {
            OperationKind::Endpoint(spec) => {
                let mut spec = spec.clone();
                if let Some(permissions) = &op.permissions {
                    spec.permissions = PermissionPolicy::Explicit(permissions.clone());
                }
                return Ok(spec);
            }
            OperationKind::Rest(rest) => {
                let path = if rest.is_resource() { id_path()? } else { String::new() };
                (rest.method(), path, rest.status(), None)
            }
            OperationKind::Collection(custom) => (
                custom.method,
                custom.path.clone().unwrap_or_else(default_path),
                custom.status,
                custom.query_params.clone(),
            ),
            OperationKind::Resource(custom) => (
                custom.method,
                format!("{}{}", id_path()?, custom.path.clone().unwrap_or_else(default_path)),
                custom.status,
                custom.query_params.clone(),
            ),
        };

        // URL-only methods take every non-identifier parameter from the query string
        let query_params = match query_params {
            Some(q) => q,
            None if method.is_url_only() => {
                let ids = resource_id.unwrap_or(&[]);
                op.signature
                    .params()
                    .iter()
                    .filter(|p| !ids.contains(&p.name))
                    .map(|p| p.name.clone())
                    .collect()
            }
            None => Vec::new(),
        };

        let mut spec = EndpointSpec::new(method)
            .path(path)
            .status(status)
            .query_params(query_params);
        if let Some(permissions) = &op.permissions {
            spec.permissions = PermissionPolicy::Explicit(permissions.clone());
        }
        Ok(spec)
    }
}
