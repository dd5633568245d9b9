// handlers/crash.rs - /api/crash resource group

use std::sync::Arc;

use serde_json::{json, Value};

use crate::crash::CrashStore;
use crate::error::ApiError;
use crate::router::{handler_fn, Args, CustomOp, Handler, Method, ResourceGroup, RestOp, Signature};
use crate::security::Permission;

/// Crash reports under scope `crash`:
///
/// - `GET    /api/crash`             ids of stored reports
/// - `POST   /api/crash`             store a report (`metadata`)
/// - `GET    /api/crash/{crash_id}`  one report
/// - `DELETE /api/crash/{crash_id}`  remove one report
/// - `POST   /api/crash/prune`       remove reports older than `keep` days
/// - `GET    /api/crash/stat`        age summary
/// - `GET    /api/crash/self_test`   built-in consistency check
pub fn group(store: CrashStore, default_keep_days: i64) -> ResourceGroup {
    ResourceGroup::api("Crash", "crash")
        .security_scope("crash")
        .rest(RestOp::List, Signature::new(), with_store(&store, list))
        .rest(RestOp::Create, Signature::new().required("metadata"), with_store(&store, create))
        .rest(RestOp::Get, Signature::new().required("crash_id"), with_store(&store, get))
        .rest(RestOp::Delete, Signature::new().required("crash_id"), with_store(&store, delete))
        .collection(
            "prune",
            CustomOp::new(Method::Post),
            Signature::new().optional("keep", Value::Null),
            prune_handler(store.clone(), default_keep_days),
        )
        .with_permissions("prune", [Permission::Delete])
        .collection("stat", CustomOp::new(Method::Get), Signature::new(), with_store(&store, stat))
        .collection(
            "self_test",
            CustomOp::new(Method::Get),
            Signature::new(),
            with_store(&store, self_test),
        )
}

fn with_store(store: &CrashStore, op: fn(&CrashStore, &Args) -> Result<Value, ApiError>) -> Arc<dyn Handler> {
    let store = store.clone();
    handler_fn(move |args: Args| {
        let store = store.clone();
        async move { op(&store, &args) }
    })
}

fn list(store: &CrashStore, _args: &Args) -> Result<Value, ApiError> {
    Ok(json!(store.ls()))
}

/// `metadata` may arrive as a JSON object or as the serialized document
fn create(store: &CrashStore, args: &Args) -> Result<Value, ApiError> {
    let raw = match args.get("metadata") {
        Some(Value::String(raw)) => raw.clone(),
        Some(value @ Value::Object(_)) => value.to_string(),
        _ => return Err(ApiError::field_error("metadata", "expected a JSON object")),
    };
    let crash_id = store.post(&raw)?;
    Ok(json!({ "crash_id": crash_id }))
}

fn get(store: &CrashStore, args: &Args) -> Result<Value, ApiError> {
    let raw = store.info(&args.str("crash_id")?)?;
    serde_json::from_str(&raw)
        .map_err(|e| ApiError::internal_server_error(format!("stored crash report is unreadable: {}", e)))
}

fn delete(store: &CrashStore, args: &Args) -> Result<Value, ApiError> {
    store.rm(&args.str("crash_id")?)?;
    Ok(Value::Null)
}

fn stat(store: &CrashStore, _args: &Args) -> Result<Value, ApiError> {
    let stats = store.stat()?;
    Ok(json!({
        "total": stats.total,
        "bins": stats.bins,
        "report": stats.report(),
    }))
}

fn self_test(_store: &CrashStore, _args: &Args) -> Result<Value, ApiError> {
    Ok(json!({ "result": CrashStore::self_test()? }))
}

fn prune_handler(store: CrashStore, default_keep_days: i64) -> Arc<dyn Handler> {
    handler_fn(move |args: Args| {
        let store = store.clone();
        async move { prune(&store, default_keep_days, &args) }
    })
}

/// `keep` defaults to the configured retention when absent
fn prune(store: &CrashStore, default_keep_days: i64, args: &Args) -> Result<Value, ApiError> {
    let keep = match args.get("keep") {
        None | Some(Value::Null) => default_keep_days,
        Some(_) => args.parse::<i64>("keep")?,
    };
    let removed = store.prune(keep)?;
    Ok(json!({ "removed": removed }))
}
