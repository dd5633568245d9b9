use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::security::Principal;

pub type HandlerResult = Result<Value, ApiError>;

/// Arguments bound to a handler's formal parameters for one request
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Map<String, Value>,
    principal: Option<Principal>,
    method: Option<axum::http::Method>,
}

impl Args {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Default::default()
        }
    }

    pub(crate) fn with_context(mut self, principal: Option<Principal>, method: axum::http::Method) -> Self {
        self.principal = principal;
        self.method = Some(method);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// String argument; numbers and booleans are rendered as text
    pub fn str(&self, name: &str) -> Result<String, ApiError> {
        match self.values.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(_) => Err(ApiError::field_error(name, "expected a string")),
            None => Err(ApiError::field_error(name, "missing")),
        }
    }

    /// Deserialize an argument, accepting the textual form that path and
    /// query values arrive in ("7", "true")
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> Result<T, ApiError> {
        let value = self
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::field_error(name, "missing"))?;

        match serde_json::from_value::<T>(value.clone()) {
            Ok(v) => Ok(v),
            Err(first) => match value {
                Value::String(s) => serde_json::from_str::<T>(&s)
                    .map_err(|_| ApiError::field_error(name, first.to_string())),
                _ => Err(ApiError::field_error(name, first.to_string())),
            },
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn method(&self) -> Option<&axum::http::Method> {
        self.method.as_ref()
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// An operation exposed through the route table
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Args) -> HandlerResult;
}

pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn call(&self, args: Args) -> HandlerResult {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
