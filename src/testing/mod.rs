use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};

use crate::error::ApiError;
use crate::router::{handler_fn, Dispatcher, Handler, ResourceGroup, RouteTable};
use crate::security::{Authorizer, Permission, Principal, Scope, ScopeCatalog};

type CallLog = Arc<Mutex<HashMap<String, Vec<Map<String, Value>>>>>;

/// Builds route tables from test groups and records what their handlers receive
#[derive(Clone, Default)]
pub struct TestContext {
    calls: CallLog,
}

impl TestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog() -> ScopeCatalog {
        ScopeCatalog::default().with_scope("widgets")
    }

    /// Handler that records its arguments under `name`
    pub fn handler(&self, name: &str) -> Arc<dyn Handler> {
        let calls = self.calls.clone();
        let name = name.to_string();
        handler_fn(move |args| {
            let calls = calls.clone();
            let name = name.clone();
            async move {
                calls
                    .lock()
                    .unwrap()
                    .entry(name.clone())
                    .or_default()
                    .push(args.values().clone());
                Ok(json!({ "handler": name }))
            }
        })
    }

    pub fn last_call(&self, name: &str) -> Option<Map<String, Value>> {
        self.calls.lock().unwrap().get(name).and_then(|c| c.last().cloned())
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).map(Vec::len).unwrap_or(0)
    }

    pub fn table(&self, groups: &[ResourceGroup]) -> Arc<RouteTable> {
        let mut builder = RouteTable::builder(Self::catalog());
        for group in groups {
            builder.register(group).expect("test group registers");
        }
        Arc::new(builder.build().expect("test table builds"))
    }

    pub fn dispatcher(&self, groups: &[ResourceGroup], authorizer: StaticAuthorizer) -> Dispatcher {
        Dispatcher::new(self.table(groups), Arc::new(authorizer))
    }
}

pub struct StubHandler;

impl StubHandler {
    pub fn returning(value: Value) -> Arc<dyn Handler> {
        handler_fn(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    pub fn failing(error: ApiError) -> Arc<dyn Handler> {
        handler_fn(move |_| {
            let error = error.clone();
            async move { Err(error) }
        })
    }
}

/// Grants the same fixed permissions to every principal
pub struct StaticAuthorizer {
    grants: Option<HashMap<String, Vec<Permission>>>,
}

impl StaticAuthorizer {
    pub fn allow_all() -> Self {
        Self { grants: None }
    }

    pub fn deny_all() -> Self {
        Self {
            grants: Some(HashMap::new()),
        }
    }

    pub fn granting(scope: &str, permissions: &[Permission]) -> Self {
        let mut grants = HashMap::new();
        grants.insert(scope.to_string(), permissions.to_vec());
        Self { grants: Some(grants) }
    }
}

impl Authorizer for StaticAuthorizer {
    fn authorize(&self, _principal: &Principal, scope: &Scope, permissions: &[Permission]) -> bool {
        match &self.grants {
            None => true,
            Some(grants) => grants
                .get(scope.as_str())
                .map(|held| permissions.iter().all(|p| held.contains(p)))
                .unwrap_or(false),
        }
    }
}
