//! Health, readiness, metrics and admin-guard integration tests.

mod common;

use common::TestApp;

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "madrasha-billing");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/ready"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn metrics_endpoint_works() {
    let app = TestApp::spawn().await;

    // Generate one labelled request so the HTTP counters exist.
    app.client.get(app.url("/health")).send().await.ok();

    let response = app
        .client
        .get(app.url("/metrics"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap_or("").contains("text/plain"))
        .unwrap_or(false));

    let body = response.text().await.expect("Failed to read body");
    assert!(body.contains("madrasha_http_requests_total"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn admin_routes_require_api_key() {
    let app = TestApp::spawn().await;

    let missing = app
        .client
        .get(app.url("/admin/ledger/balances"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(missing.status().as_u16(), 401);

    let wrong = app
        .client
        .get(app.url("/admin/ledger/balances"))
        .header("X-Admin-Api-Key", "not-the-key")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(wrong.status().as_u16(), 401);

    let ok = app.admin_get("/admin/ledger/balances").await;
    assert_eq!(ok.status().as_u16(), 200);

    app.cleanup().await;
}
