mod common;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use common::{test_config, write_access_file, TestApp, ADMIN_PASSWORD, HUNTER2_SHA256};

const CRASH_ID: &str = "2001-01-01 00:00:00.000000Z_d5775432-0742-44a3-a435-45095e32e6b1";
const CRASH_PATH: &str = "/api/crash/2001-01-01%2000:00:00.000000Z_d5775432-0742-44a3-a435-45095e32e6b1";

fn crash_report() -> Value {
    json!({
        "crash_id": CRASH_ID,
        "timestamp": "2001-01-01 00:00:00.000000Z",
        "entity_name": "osd.3",
    })
}

fn app_with_viewer() -> TestApp {
    let path = write_access_file(&format!(
        r#"
roles:
  crash-viewer:
    crash: [read]
users:
  viewer:
    password: "{}"
    roles: [crash-viewer]
"#,
        HUNTER2_SHA256
    ));
    let mut config = test_config();
    config.security.access_control_file = Some(path.to_string_lossy().into_owned());
    TestApp::with_config(config)
}

#[tokio::test]
async fn crash_report_lifecycle() {
    let app = TestApp::new();
    let token = app.login("admin", ADMIN_PASSWORD).await;

    let (status, body) = app
        .call(Method::POST, "/api/crash", Some(&token), Some(json!({ "metadata": crash_report() })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["crash_id"], CRASH_ID);

    let (status, body) = app.call(Method::GET, "/api/crash", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([CRASH_ID]));

    let (status, body) = app.call(Method::GET, CRASH_PATH, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entity_name"], "osd.3");

    let (status, body) = app.call(Method::GET, "/api/crash/stat", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["bins"][2]["age_days"], 7);
    assert_eq!(body["bins"][2]["crash_ids"], json!([CRASH_ID]));
    assert!(body["report"].as_str().unwrap().starts_with("1 crashes recorded"));

    let (status, body) = app
        .call(Method::POST, "/api/crash/prune", Some(&token), Some(json!({ "keep": 7 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!([CRASH_ID]));

    let (_, body) = app.call(Method::GET, "/api/crash", Some(&token), None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn prune_removes_every_expired_report() {
    let app = TestApp::new();
    let token = app.login("admin", ADMIN_PASSWORD).await;

    for id in ["a", "b", "c"] {
        let report = json!({"crash_id": id, "timestamp": "2001-01-01 00:00:00.0Z"});
        app.state.crash.post(&report.to_string()).unwrap();
    }

    let (status, body) = app.call(Method::POST, "/api/crash/prune", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn delete_and_missing_reports() {
    let app = TestApp::new();
    let token = app.login("admin", ADMIN_PASSWORD).await;
    app.state.crash.post(&crash_report().to_string()).unwrap();

    let (status, body) = app.call(Method::DELETE, CRASH_PATH, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = app.call(Method::DELETE, CRASH_PATH, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_metadata_is_a_client_error() {
    let app = TestApp::new();
    let token = app.login("admin", ADMIN_PASSWORD).await;

    let (status, body) = app
        .call(Method::POST, "/api/crash", Some(&token), Some(json!({ "metadata": {"entity": "osd.1"} })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("missing 'crash_id' field"));
}

#[tokio::test]
async fn self_test_passes() {
    let app = TestApp::new();
    let token = app.login("admin", ADMIN_PASSWORD).await;

    let (status, body) = app.call(Method::GET, "/api/crash/self_test", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "self-test succeeded");
}

#[tokio::test]
async fn read_only_role_cannot_prune_or_post() {
    let app = app_with_viewer();
    let token = app.login("viewer", "hunter2").await;
    app.state.crash.post(&crash_report().to_string()).unwrap();

    let (status, _) = app.call(Method::GET, "/api/crash/stat", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(Method::POST, "/api/crash/prune", Some(&token), Some(json!({"keep": 0}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::POST, "/api/crash", Some(&token), Some(json!({ "metadata": {"crash_id": "x"} })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Nothing was removed by the rejected prune
    let (_, body) = app.call(Method::GET, "/api/crash", Some(&token), None).await;
    assert_eq!(body, json!([CRASH_ID]));
}
