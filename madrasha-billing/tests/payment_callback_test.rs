//! SSLCommerz initiation and callback integration tests.

mod common;

use common::{valid_validation, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

async fn session_status(app: &TestApp, tran_id: &str) -> String {
    sqlx::query_scalar::<_, String>("SELECT status FROM payment_sessions WHERE tran_id = $1")
        .bind(tran_id)
        .fetch_one(app.db.pool())
        .await
        .expect("Session not found")
}

/// A student with two UNPAID invoices of 1200 each.
async fn two_invoices(app: &TestApp) -> (Uuid, Uuid, Uuid) {
    let seeded = app.seed_student(Some(dec!(1200)), None, None).await;
    app.generate(1, 2026, false).await;
    app.generate(2, 2026, false).await;
    let a = app.invoice_for(seeded.student_id, 1, 2026).await;
    let b = app.invoice_for(seeded.student_id, 2, 2026).await;
    (seeded.student_id, a.invoice_id, b.invoice_id)
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn validated_payment_settles_every_invoice_once() {
    let app = TestApp::spawn().await;
    let (student_id, a, b) = two_invoices(&app).await;
    app.mock_initiate_success().await;

    let tran_id = app.initiate(student_id, &[a, b]).await;
    assert_eq!(session_status(&app, &tran_id).await, "PENDING");

    app.mock_validation("VAL-1", valid_validation(&tran_id, "VAL-1", "2400.00", &[a, b]))
        .await;

    let response = app
        .post_callback("success", &[("tran_id", tran_id.as_str()), ("val_id", "VAL-1"), ("status", "VALID")])
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let page = response.text().await.expect("Failed to read body");
    assert!(page.contains("https://portal.test/payments/result?status=success"));

    for invoice_id in [a, b] {
        let invoice = app
            .db
            .get_invoice(invoice_id)
            .await
            .expect("Query failed")
            .expect("Invoice missing");
        assert_eq!(invoice.status, "PAID");
        assert!(invoice.paid_utc.is_some());
        assert_eq!(app.credits_for(invoice_id).await, 1);
        assert_eq!(app.transactions_for(invoice_id).await, 1);
    }
    assert_eq!(session_status(&app, &tran_id).await, "PAID");

    let monthly: serde_json::Value = app
        .admin_get("/admin/ledger/balances")
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    let fund = monthly["balances"]
        .as_array()
        .and_then(|b| b.iter().find(|f| f["fund"] == "MONTHLY"))
        .cloned()
        .expect("MONTHLY fund missing");
    assert_eq!(fund["balance"], "2400.00");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn duplicate_delivery_writes_nothing_new() {
    let app = TestApp::spawn().await;
    let (student_id, a, b) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a, b]).await;
    app.mock_validation("VAL-2", valid_validation(&tran_id, "VAL-2", "2400.00", &[a, b]))
        .await;

    let form = [("tran_id", tran_id.as_str()), ("val_id", "VAL-2")];
    app.post_callback("success", &form).await;

    let again = app.post_callback("success", &form).await;
    let page = again.text().await.expect("Failed to read body");
    assert!(page.contains("status=already_paid"));

    let ipn = app.post_callback("ipn", &form).await;
    assert_eq!(ipn.status().as_u16(), 200);
    let body: serde_json::Value = ipn.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "already_paid");

    for invoice_id in [a, b] {
        assert_eq!(app.credits_for(invoice_id).await, 1);
        assert_eq!(app.transactions_for(invoice_id).await, 1);
    }

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn concurrent_success_and_ipn_settle_once() {
    let app = TestApp::spawn().await;
    let (student_id, a, b) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a, b]).await;
    app.mock_validation("VAL-3", valid_validation(&tran_id, "VAL-3", "2400.00", &[a, b]))
        .await;

    let form = [("tran_id", tran_id.as_str()), ("val_id", "VAL-3")];
    let (browser, ipn) = tokio::join!(
        app.post_callback("success", &form),
        app.post_callback("ipn", &form)
    );
    assert_eq!(browser.status().as_u16(), 200);
    assert_eq!(ipn.status().as_u16(), 200);

    for invoice_id in [a, b] {
        assert_eq!(app.credits_for(invoice_id).await, 1);
        assert_eq!(app.transactions_for(invoice_id).await, 1);
    }

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn invalid_validation_leaves_invoices_unpaid() {
    let app = TestApp::spawn().await;
    let (student_id, a, b) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a, b]).await;
    app.mock_validation(
        "VAL-4",
        json!({ "status": "INVALID_TRANSACTION", "tran_id": tran_id }),
    )
    .await;

    let response = app
        .post_callback("success", &[("tran_id", tran_id.as_str()), ("val_id", "VAL-4"), ("status", "VALID")])
        .await;
    let page = response.text().await.expect("Failed to read body");
    assert!(page.contains("status=invalid"));

    for invoice_id in [a, b] {
        let invoice = app.db.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, "UNPAID");
        assert_eq!(app.credits_for(invoice_id).await, 0);
    }
    assert_eq!(session_status(&app, &tran_id).await, "INVALID");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn amount_mismatch_is_rejected() {
    let app = TestApp::spawn().await;
    let (student_id, a, b) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a, b]).await;
    app.mock_validation("VAL-5", valid_validation(&tran_id, "VAL-5", "1200.00", &[a, b]))
        .await;

    app.post_callback("success", &[("tran_id", tran_id.as_str()), ("val_id", "VAL-5")])
        .await;

    assert_eq!(app.credits_for(a).await, 0);
    assert_eq!(app.credits_for(b).await, 0);
    assert_eq!(session_status(&app, &tran_id).await, "INVALID");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn cancel_closes_pending_session() {
    let app = TestApp::spawn().await;
    let (student_id, a, _) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a]).await;

    let response = app
        .post_callback("cancel", &[("tran_id", tran_id.as_str()), ("status", "CANCELLED")])
        .await;
    let page = response.text().await.expect("Failed to read body");
    assert!(page.contains("status=cancelled"));
    assert_eq!(session_status(&app, &tran_id).await, "CANCELLED");

    let invoice = app.db.get_invoice(a).await.unwrap().unwrap();
    assert_eq!(invoice.status, "UNPAID");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn unknown_transaction_is_invalid() {
    let app = TestApp::spawn().await;

    let response = app
        .post_callback("success", &[("tran_id", "MDR-does-not-exist"), ("val_id", "VAL-X")])
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let page = response.text().await.expect("Failed to read body");
    assert!(page.contains("status=invalid"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn paid_invoice_cannot_be_initiated() {
    let app = TestApp::spawn().await;
    let (student_id, a, _) = two_invoices(&app).await;
    app.mock_initiate_success().await;

    let cash = app
        .admin_post(&format!("/admin/invoices/{}/pay-cash", a), json!({}))
        .await;
    assert_eq!(cash.status().as_u16(), 200);

    let response = app
        .client
        .post(app.url("/payments/initiate"))
        .json(&json!({ "student_id": student_id, "invoice_ids": [a] }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 409);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn foreign_invoice_cannot_be_initiated() {
    let app = TestApp::spawn().await;
    let (_, a, _) = two_invoices(&app).await;
    let other = app.seed_student(Some(dec!(1000)), None, None).await;
    app.mock_initiate_success().await;

    let response = app
        .client
        .post(app.url("/payments/initiate"))
        .json(&json!({ "student_id": other.student_id, "invoice_ids": [a] }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn fail_callback_does_not_block_a_validated_ipn() {
    let app = TestApp::spawn().await;
    let (student_id, a, _) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a]).await;

    // Nothing authenticates the fail callback; it only closes the attempt provisionally.
    let fail = app
        .post_callback("fail", &[("tran_id", tran_id.as_str())])
        .await;
    let page = fail.text().await.expect("Failed to read body");
    assert!(page.contains("status=failed"));
    assert_eq!(session_status(&app, &tran_id).await, "FAILED");

    app.mock_validation("VAL-6", valid_validation(&tran_id, "VAL-6", "1200.00", &[a]))
        .await;
    let ipn = app
        .post_callback("ipn", &[("tran_id", tran_id.as_str()), ("val_id", "VAL-6")])
        .await;
    assert_eq!(ipn.status().as_u16(), 200);
    let body: serde_json::Value = ipn.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "success");

    let invoice = app.db.get_invoice(a).await.unwrap().unwrap();
    assert_eq!(invoice.status, "PAID");
    assert_eq!(app.credits_for(a).await, 1);
    assert_eq!(session_status(&app, &tran_id).await, "PAID");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn rejected_val_id_does_not_block_a_validated_ipn() {
    let app = TestApp::spawn().await;
    let (student_id, a, _) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a]).await;

    app.mock_validation("BOGUS", json!({ "status": "INVALID_TRANSACTION" }))
        .await;
    let forged = app
        .post_callback("success", &[("tran_id", tran_id.as_str()), ("val_id", "BOGUS")])
        .await;
    let page = forged.text().await.expect("Failed to read body");
    assert!(page.contains("status=invalid"));
    assert_eq!(session_status(&app, &tran_id).await, "INVALID");

    app.mock_validation("VAL-7", valid_validation(&tran_id, "VAL-7", "1200.00", &[a]))
        .await;
    let ipn = app
        .post_callback("ipn", &[("tran_id", tran_id.as_str()), ("val_id", "VAL-7")])
        .await;
    let body: serde_json::Value = ipn.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "success");

    let invoice = app.db.get_invoice(a).await.unwrap().unwrap();
    assert_eq!(invoice.status, "PAID");
    assert_eq!(app.credits_for(a).await, 1);
    assert_eq!(app.transactions_for(a).await, 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn charge_is_not_settled_when_an_invoice_was_paid_in_cash() {
    let app = TestApp::spawn().await;
    let (student_id, a, b) = two_invoices(&app).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(student_id, &[a, b]).await;

    let cash = app
        .admin_post(&format!("/admin/invoices/{}/pay-cash", a), json!({}))
        .await;
    assert_eq!(cash.status().as_u16(), 200);

    app.mock_validation("VAL-8", valid_validation(&tran_id, "VAL-8", "2400.00", &[a, b]))
        .await;
    let response = app
        .post_callback("success", &[("tran_id", tran_id.as_str()), ("val_id", "VAL-8")])
        .await;
    let page = response.text().await.expect("Failed to read body");
    assert!(page.contains("status=invalid"));

    let invoice_b = app.db.get_invoice(b).await.unwrap().unwrap();
    assert_eq!(invoice_b.status, "UNPAID");
    assert_eq!(app.credits_for(a).await, 1);
    assert_eq!(app.credits_for(b).await, 0);
    assert_eq!(app.transactions_for(b).await, 0);
    // Left VALIDATED for manual review.
    assert_eq!(session_status(&app, &tran_id).await, "VALIDATED");

    let balances: serde_json::Value = app
        .admin_get("/admin/ledger/balances")
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    let monthly = balances["balances"]
        .as_array()
        .and_then(|b| b.iter().find(|f| f["fund"] == "MONTHLY"))
        .cloned()
        .expect("MONTHLY fund missing");
    assert_eq!(monthly["balance"], "1200.00");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn charge_is_not_settled_when_an_invoice_was_repriced() {
    let app = TestApp::spawn().await;
    let seeded = app.seed_student(Some(dec!(1200)), None, None).await;
    app.generate(1, 2026, false).await;
    let invoice = app.invoice_for(seeded.student_id, 1, 2026).await;
    app.mock_initiate_success().await;
    let tran_id = app.initiate(seeded.student_id, &[invoice.invoice_id]).await;

    let response = app
        .admin_send(
            reqwest::Method::PUT,
            "/admin/fees/default",
            json!({ "scope": "course", "target_id": seeded.course_id, "monthly_fee": "1500" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 204);
    let refreshed = app.generate(1, 2026, true).await;
    assert_eq!(refreshed["updated"], 1);

    app.mock_validation(
        "VAL-9",
        valid_validation(&tran_id, "VAL-9", "1200.00", &[invoice.invoice_id]),
    )
    .await;
    let response = app
        .post_callback("success", &[("tran_id", tran_id.as_str()), ("val_id", "VAL-9")])
        .await;
    let page = response.text().await.expect("Failed to read body");
    assert!(page.contains("status=invalid"));

    let after = app.db.get_invoice(invoice.invoice_id).await.unwrap().unwrap();
    assert_eq!(after.status, "UNPAID");
    assert_eq!(after.amount, dec!(1500));
    assert_eq!(app.credits_for(invoice.invoice_id).await, 0);
    assert_eq!(session_status(&app, &tran_id).await, "VALIDATED");

    app.cleanup().await;
}
