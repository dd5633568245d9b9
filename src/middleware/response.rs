use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;

use crate::router::EndpointDescriptor;

/// Encoded handler output, before it becomes an HTTP response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Raw(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub body: ResponseBody,
}

impl DispatchResponse {
    /// Apply the endpoint's status and encoding to a handler's return value
    pub fn encode(descriptor: &EndpointDescriptor, value: Value) -> Self {
        let status = StatusCode::from_u16(descriptor.status).unwrap_or(StatusCode::OK);

        let body = if status == StatusCode::NO_CONTENT {
            ResponseBody::Empty
        } else if descriptor.json_response && !descriptor.proxy {
            ResponseBody::Json(value)
        } else {
            match value {
                Value::Null => ResponseBody::Raw(String::new()),
                Value::String(text) => ResponseBody::Raw(text),
                other => ResponseBody::Raw(other.to_string()),
            }
        };

        Self { status, body }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.body, ResponseBody::Empty)
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Body as it would appear on the wire
    pub fn text(&self) -> Option<String> {
        match &self.body {
            ResponseBody::Json(value) => Some(value.to_string()),
            ResponseBody::Raw(text) => Some(text.clone()),
            ResponseBody::Empty => None,
        }
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        match self.body {
            ResponseBody::Empty => self.status.into_response(),
            ResponseBody::Json(value) => (self.status, Json(value)).into_response(),
            ResponseBody::Raw(text) => (
                self.status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                text,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{EndpointSpec, ResourceGroup, RouteTable, Signature};
    use crate::router::handler::handler_fn;
    use crate::security::ScopeCatalog;
    use serde_json::json;
    use std::sync::Arc;

    fn descriptor(spec: EndpointSpec) -> Arc<EndpointDescriptor> {
        let group = ResourceGroup::api("Echo", "echo").secure(false).endpoint(
            "out",
            spec,
            Signature::new(),
            handler_fn(|_| async { Ok(json!(null)) }),
        );
        let mut builder = RouteTable::builder(ScopeCatalog::default());
        builder.register(&group).unwrap();
        let table = builder.build().unwrap();
        let entry = table.entries().next().unwrap().clone();
        entry.descriptor.clone()
    }

    #[test]
    fn json_endpoints_keep_structured_values() {
        let d = descriptor(EndpointSpec::get());
        let response = DispatchResponse::encode(&d, json!({"a": 1}));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json(), Some(&json!({"a": 1})));
    }

    #[test]
    fn raw_endpoints_render_text() {
        let d = descriptor(EndpointSpec::get().json_response(false));
        assert_eq!(DispatchResponse::encode(&d, json!("hello")).text().as_deref(), Some("hello"));
        assert_eq!(DispatchResponse::encode(&d, json!(null)).text().as_deref(), Some(""));
        assert_eq!(DispatchResponse::encode(&d, json!([1, 2])).text().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn no_content_drops_the_body() {
        let d = descriptor(EndpointSpec::delete().status(204));
        let response = DispatchResponse::encode(&d, json!({"ignored": true}));
        assert!(response.is_empty());
        assert_eq!(response.into_response().status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn raw_responses_are_plain_text() {
        let d = descriptor(EndpointSpec::get().json_response(false));
        let response = DispatchResponse::encode(&d, json!("x")).into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
