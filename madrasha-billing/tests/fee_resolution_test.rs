//! Fee resolution through the admin API.

mod common;

use common::TestApp;
use madrasha_billing::models::FeeScope;
use reqwest::Method;
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn batch_default_beats_department_and_course() {
    let app = TestApp::spawn().await;
    let seeded = app
        .seed_student(Some(dec!(1000)), Some(dec!(1200)), Some(dec!(1500)))
        .await;

    let body: serde_json::Value = app
        .admin_get(&format!("/admin/students/{}/fee", seeded.student_id))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(body["enrolled"], true);
    assert_eq!(body["source"], "batch_default");
    assert_eq!(body["amount"], "1500.00");
    assert_eq!(body["billable"], true);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn tier_department_override_beats_batch_default() {
    let app = TestApp::spawn().await;
    let seeded = app
        .seed_student(Some(dec!(1000)), None, Some(dec!(1500)))
        .await;
    app.assign_tier_override(
        seeded.student_id,
        FeeScope::Department,
        seeded.department_id,
        dec!(800),
    )
    .await;

    let body: serde_json::Value = app
        .admin_get(&format!("/admin/students/{}/fee", seeded.student_id))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(body["source"], "tier_department");
    assert_eq!(body["amount"], "800.00");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn inactive_tier_is_ignored() {
    let app = TestApp::spawn().await;
    let seeded = app.seed_student(Some(dec!(1000)), None, None).await;
    let tier_id = app
        .assign_tier_override(seeded.student_id, FeeScope::Batch, seeded.batch_id, dec!(500))
        .await;

    let response = app
        .admin_send(
            Method::PATCH,
            &format!("/admin/fee-tiers/{}", tier_id),
            json!({ "is_active": false }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = app
        .admin_get(&format!("/admin/students/{}/fee", seeded.student_id))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(body["source"], "course_default");
    assert_eq!(body["tier_id"], serde_json::Value::Null);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn unenrolled_student_has_no_fee() {
    let app = TestApp::spawn().await;

    let response = app
        .admin_post(
            "/admin/students",
            json!({ "full_name": "Yusuf Ali" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let student: serde_json::Value = response.json().await.expect("Failed to parse JSON");

    let body: serde_json::Value = app
        .admin_get(&format!(
            "/admin/students/{}/fee",
            student["student_id"].as_str().expect("student_id")
        ))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(body["enrolled"], false);
    assert_eq!(body["billable"], false);
    assert_eq!(body["amount"], serde_json::Value::Null);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn negative_default_fee_is_rejected() {
    let app = TestApp::spawn().await;
    let seeded = app.seed_student(Some(dec!(1000)), None, None).await;

    let response = app
        .admin_send(
            Method::PUT,
            "/admin/fees/default",
            json!({ "scope": "course", "target_id": seeded.course_id, "monthly_fee": "-5" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    app.cleanup().await;
}
