use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::response::IntoResponse;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use tracing::Instrument;
use uuid::Uuid;

use super::descriptor::EndpointDescriptor;
use super::handler::Args;
use super::table::RouteTable;
use crate::error::ApiError;
use crate::middleware::response::DispatchResponse;
use crate::security::{Authorizer, Principal};

/// Per-request progression. Every request walks these in order; a failure
/// ends it at the stage that could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatchStage {
    Received,
    ParameterBound,
    PermissionChecked,
    Invoked,
    Encoded,
    Responded,
}

impl DispatchStage {
    pub fn next(self) -> Option<Self> {
        match self {
            DispatchStage::Received => Some(DispatchStage::ParameterBound),
            DispatchStage::ParameterBound => Some(DispatchStage::PermissionChecked),
            DispatchStage::PermissionChecked => Some(DispatchStage::Invoked),
            DispatchStage::Invoked => Some(DispatchStage::Encoded),
            DispatchStage::Encoded => Some(DispatchStage::Responded),
            DispatchStage::Responded => None,
        }
    }
}

/// A request that ended before reaching `Responded`
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchError {
    pub failed_at: DispatchStage,
    pub error: ApiError,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        self.error.into_response()
    }
}

/// Transport-neutral view of an inbound request
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: axum::http::Method,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub principal: Option<Principal>,
}

impl DispatchRequest {
    /// `target` is a path with an optional query string
    pub fn new(method: axum::http::Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            content_type: None,
            body: Bytes::new(),
            principal: None,
        }
    }

    pub fn json(mut self, body: &Value) -> Self {
        self.content_type = Some("application/json".to_string());
        self.body = Bytes::from(body.to_string());
        self
    }

    pub fn body(mut self, content_type: Option<String>, body: Bytes) -> Self {
        self.content_type = content_type;
        self.body = body;
        self
    }

    pub fn principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }
}

struct StageTracker {
    stage: DispatchStage,
}

impl StageTracker {
    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            tracing::trace!("dispatch stage {:?} -> {:?}", self.stage, next);
            self.stage = next;
        }
    }

    /// Rejection at the stage that was about to be entered
    fn reject(&self, error: ApiError) -> DispatchError {
        DispatchError {
            failed_at: self.stage.next().unwrap_or(self.stage),
            error,
        }
    }
}

/// Looks requests up in the route table, binds their arguments, checks
/// permissions and invokes the handler
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
    authorizer: Arc<dyn Authorizer>,
}

impl Dispatcher {
    pub fn new(table: Arc<RouteTable>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { table, authorizer }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "dispatch",
            %request_id,
            method = %request.method,
            path = %request.path
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        let mut tracker = StageTracker {
            stage: DispatchStage::Received,
        };

        let resolved = self
            .table
            .resolve(&request.method, &request.path)
            .map_err(|e| tracker.reject(e.into()))?;
        let descriptor = resolved.descriptor();

        let values = bind(descriptor, &resolved.captures, &request).map_err(|e| {
            tracing::debug!("Binding failed for {}:{}: {}", descriptor.group, descriptor.action, e);
            tracker.reject(e)
        })?;
        tracker.advance();

        self.check_permissions(descriptor, request.principal.as_ref())
            .map_err(|e| tracker.reject(e))?;
        tracker.advance();

        let args = Args::new(values).with_context(request.principal.clone(), request.method.clone());
        let value = descriptor.handler.call(args).await.map_err(|e| {
            if e.is_client_error() {
                tracing::debug!("{}:{} rejected request: {}", descriptor.group, descriptor.action, e);
            } else {
                tracing::error!("{}:{} failed: {}", descriptor.group, descriptor.action, e);
            }
            tracker.reject(e)
        })?;
        tracker.advance();

        let response = DispatchResponse::encode(descriptor, value);
        tracker.advance();
        tracker.advance();
        Ok(response)
    }

    fn check_permissions(
        &self,
        descriptor: &EndpointDescriptor,
        principal: Option<&Principal>,
    ) -> Result<(), ApiError> {
        if !descriptor.secure {
            return Ok(());
        }

        let principal = principal.ok_or_else(|| {
            tracing::warn!(
                "Unauthenticated request to secured endpoint {}:{}",
                descriptor.group,
                descriptor.action
            );
            ApiError::unauthorized("You are not authorized to access that resource")
        })?;

        if descriptor.permissions.is_empty() {
            return Ok(());
        }

        // Registration refuses secured endpoints with permissions but no scope
        let scope = descriptor.scope.as_ref().ok_or_else(|| {
            ApiError::internal_server_error("Cannot verify permissions without scope security defined")
        })?;

        if self.authorizer.authorize(principal, scope, &descriptor.permissions) {
            Ok(())
        } else {
            let required = descriptor
                .permissions
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                "User '{}' lacks [{}] on scope '{}' for {}:{}",
                principal.username,
                required,
                scope,
                descriptor.group,
                descriptor.action
            );
            Err(ApiError::forbidden(format!(
                "Access denied: [{}] permission required on scope '{}'",
                required, scope
            )))
        }
    }
}

fn is_form(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Repeated keys collect into an array
fn insert_merging(values: &mut Map<String, Value>, key: String, value: Value) {
    match values.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            values.insert(key, value);
        }
    }
}

fn bind(
    descriptor: &EndpointDescriptor,
    captures: &[(String, String)],
    request: &DispatchRequest,
) -> Result<Map<String, Value>, ApiError> {
    let mut values = Map::new();

    for (name, raw) in captures {
        let decoded = percent_decode_str(raw).decode_utf8().map_err(|_| {
            ApiError::bad_request(format!("Invalid percent-encoding in path parameter '{}'", name))
        })?;
        values.insert(name.clone(), Value::String(decoded.into_owned()));
    }

    let from_path = |key: &str| captures.iter().any(|(name, _)| name == key);
    let path_conflict = |key: &str| {
        ApiError::bad_request(format!(
            "Parameter '{}' is part of the URL and cannot be supplied again",
            key
        ))
    };

    if let Some(query) = &request.query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if from_path(&*key) {
                return Err(path_conflict(&*key));
            }
            insert_merging(&mut values, key.into_owned(), Value::String(value.into_owned()));
        }
    }

    // Body values are bound as sent; only URL-sourced values are decoded
    if !descriptor.method.is_url_only() && !request.body.is_empty() {
        let fields: Vec<(String, Value)> = if is_form(request.content_type.as_deref()) {
            url::form_urlencoded::parse(&request.body)
                .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
                .collect()
        } else {
            let data: Value = serde_json::from_slice(&request.body)?;
            let Value::Object(fields) = data else {
                return Err(ApiError::invalid_json("Failed to decode JSON: expected an object"));
            };
            fields.into_iter().collect()
        };
        for (key, value) in fields {
            if from_path(key.as_str()) {
                return Err(path_conflict(key.as_str()));
            }
            values.insert(key, value);
        }
    }

    let signature = descriptor.signature();
    if let Some(unexpected) = values.keys().find(|k| !signature.contains(k)) {
        return Err(ApiError::bad_request(format!(
            "Unexpected parameter '{}' for {}",
            unexpected, descriptor.action
        )));
    }

    let mut missing = HashMap::new();
    for param in signature.params() {
        if values.contains_key(&param.name) {
            continue;
        }
        if param.required {
            missing.insert(param.name.clone(), "This field is required".to_string());
        } else {
            values.insert(param.name.clone(), param.default.clone().unwrap_or(Value::Null));
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::validation_error("Missing required parameters", Some(missing)));
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::endpoint::{EndpointSpec, Method};
    use crate::router::resource::{ResourceGroup, RestOp};
    use crate::router::signature::Signature;
    use crate::security::Permission;
    use crate::testing::{StubHandler, StaticAuthorizer, TestContext};
    use axum::http::{Method as HttpMethod, StatusCode};
    use serde_json::json;

    fn widgets(ctx: &TestContext) -> ResourceGroup {
        ResourceGroup::api("Widget", "widgets")
            .security_scope("widgets")
            .rest(RestOp::Get, Signature::new().required("id").optional("detail", false), ctx.handler("get"))
            .rest(RestOp::Create, Signature::new().required("data"), ctx.handler("create"))
            .rest(RestOp::Delete, Signature::new().required("id"), ctx.handler("delete"))
            .endpoint(
                "raw",
                EndpointSpec::get().json_response(false).no_permissions(),
                Signature::new(),
                StubHandler::returning(json!("plain text")),
            )
    }

    fn alice() -> Option<Principal> {
        Some(Principal::new("alice", vec!["reader".into()]))
    }

    #[tokio::test]
    async fn binds_decoded_path_and_query_values() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        let response = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/widgets/w%2F1?detail=true").principal(alice()))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let call = ctx.last_call("get").expect("handler invoked");
        assert_eq!(call.get("id"), Some(&json!("w/1")));
        assert_eq!(call.get("detail"), Some(&json!("true")));
    }

    #[tokio::test]
    async fn optional_params_take_their_defaults() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/widgets/7").principal(alice()))
            .await
            .unwrap();
        assert_eq!(ctx.last_call("get").unwrap().get("detail"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn json_body_binds_by_name_with_201() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        let response = dispatcher
            .dispatch(
                DispatchRequest::new(HttpMethod::POST, "/api/widgets")
                    .json(&json!({"data": {"name": "gear%20box"}}))
                    .principal(alice()),
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(ctx.last_call("create").unwrap().get("data"), Some(&json!({"name": "gear%20box"})));
    }

    #[tokio::test]
    async fn body_strings_bind_verbatim() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        dispatcher
            .dispatch(
                DispatchRequest::new(HttpMethod::POST, "/api/widgets")
                    .json(&json!({"data": "gear%20box%zz%FF"}))
                    .principal(alice()),
            )
            .await
            .unwrap();
        assert_eq!(ctx.last_call("create").unwrap().get("data"), Some(&json!("gear%20box%zz%FF")));
    }

    #[tokio::test]
    async fn body_cannot_override_path_parameters() {
        let ctx = TestContext::new();
        let group = widgets(&ctx).rest(
            RestOp::Set,
            Signature::new().required("id").required("data"),
            ctx.handler("set"),
        );
        let dispatcher = ctx.dispatcher(&[group], StaticAuthorizer::allow_all());

        let err = dispatcher
            .dispatch(
                DispatchRequest::new(HttpMethod::PUT, "/api/widgets/7")
                    .json(&json!({"id": "9", "data": {}}))
                    .principal(alice()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.failed_at, DispatchStage::ParameterBound);
        assert_eq!(err.error.status_code(), 400);
        assert_eq!(ctx.call_count("set"), 0);

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/widgets/7?id=9").principal(alice()))
            .await
            .unwrap_err();
        assert_eq!(err.error.status_code(), 400);
        assert_eq!(ctx.call_count("get"), 0);
    }

    #[tokio::test]
    async fn form_bodies_are_accepted() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        dispatcher
            .dispatch(
                DispatchRequest::new(HttpMethod::POST, "/api/widgets")
                    .body(
                        Some("application/x-www-form-urlencoded".into()),
                        Bytes::from_static(b"data=a+b"),
                    )
                    .principal(alice()),
            )
            .await
            .unwrap();
        assert_eq!(ctx.last_call("create").unwrap().get("data"), Some(&json!("a b")));
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        let err = dispatcher
            .dispatch(
                DispatchRequest::new(HttpMethod::POST, "/api/widgets")
                    .body(Some("application/json".into()), Bytes::from_static(b"{not json"))
                    .principal(alice()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.failed_at, DispatchStage::ParameterBound);
        assert_eq!(err.error.status_code(), 400);
        assert!(err.error.message().starts_with("Failed to decode JSON"));
        assert_eq!(ctx.call_count("create"), 0);
    }

    #[tokio::test]
    async fn missing_and_unexpected_parameters_are_rejected() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::POST, "/api/widgets").principal(alice()))
            .await
            .unwrap_err();
        assert_eq!(err.error.error_code(), "VALIDATION_ERROR");

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/widgets/7?color=red").principal(alice()))
            .await
            .unwrap_err();
        assert_eq!(err.error.status_code(), 400);
        assert_eq!(ctx.call_count("get"), 0);
    }

    #[tokio::test]
    async fn denied_permission_never_invokes_handler() {
        let ctx = TestContext::new();
        let authorizer = StaticAuthorizer::granting("widgets", &[Permission::Read]);
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], authorizer);

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::DELETE, "/api/widgets/7").principal(alice()))
            .await
            .unwrap_err();
        assert_eq!(err.failed_at, DispatchStage::PermissionChecked);
        assert_eq!(err.error.status_code(), 403);
        assert_eq!(ctx.call_count("delete"), 0);

        // The permitted verb still goes through
        dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/widgets/7").principal(alice()))
            .await
            .unwrap();
        assert_eq!(ctx.call_count("get"), 1);
    }

    #[tokio::test]
    async fn anonymous_requests_to_secured_groups_are_unauthorized() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/widgets/7"))
            .await
            .unwrap_err();
        assert_eq!(err.error.status_code(), 401);
        assert_eq!(ctx.call_count("get"), 0);
    }

    #[tokio::test]
    async fn delete_answers_204_without_body() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        let response = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::DELETE, "/api/widgets/7").principal(alice()))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn raw_endpoints_skip_json_encoding() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::deny_all());

        let response = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/widgets/raw").principal(alice()))
            .await
            .unwrap();
        assert_eq!(response.text().as_deref(), Some("plain text"));
    }

    #[tokio::test]
    async fn handler_errors_become_structured_rejections() {
        let ctx = TestContext::new();
        let failing = ResourceGroup::api("Broken", "broken").secure(false).index(
            EndpointSpec::new(Method::Get),
            Signature::new(),
            StubHandler::failing(ApiError::conflict("busy")),
        );
        let dispatcher = ctx.dispatcher(&[failing], StaticAuthorizer::allow_all());

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/broken"))
            .await
            .unwrap_err();
        assert_eq!(err.failed_at, DispatchStage::Invoked);
        assert_eq!(err.error, ApiError::conflict("busy"));
    }

    #[tokio::test]
    async fn unknown_route_and_wrong_method() {
        let ctx = TestContext::new();
        let dispatcher = ctx.dispatcher(&[widgets(&ctx)], StaticAuthorizer::allow_all());

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::GET, "/api/nothing"))
            .await
            .unwrap_err();
        assert_eq!(err.error.status_code(), 404);

        let err = dispatcher
            .dispatch(DispatchRequest::new(HttpMethod::PUT, "/api/widgets/7"))
            .await
            .unwrap_err();
        assert_eq!(err.error.status_code(), 405);
    }

    #[test]
    fn stages_progress_linearly() {
        let mut stage = DispatchStage::Received;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(stage, DispatchStage::Responded);
    }
}
