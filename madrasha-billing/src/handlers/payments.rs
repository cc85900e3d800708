//! Payment initiation and SSLCommerz callback handlers.
//!
//! Browser callbacks always answer an auto-redirect page pointing at the
//! student portal; errors never surface as raw HTTP failures there.

use crate::dtos::{InitiatePaymentRequest, IpnResponse};
use crate::models::PaymentSessionStatus;
use crate::services::{CallbackOutcome, CallbackPayload, InitiatedPayment};
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::Html,
    Json,
};
use reqwest::Url;
use service_core::error::AppError;

/// Start a hosted checkout for some of a student's unpaid invoices.
pub async fn initiate_payment(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatedPayment>), AppError> {
    tracing::info!(
        student_id = %payload.student_id,
        invoices = payload.invoice_ids.len(),
        "Initiating payment"
    );

    let initiated = state
        .payments
        .initiate(payload.student_id, &payload.invoice_ids)
        .await?;

    Ok((StatusCode::CREATED, Json(initiated)))
}

pub async fn sslcommerz_success(
    State(state): State<AppState>,
    Form(payload): Form<CallbackPayload>,
) -> Html<String> {
    tracing::info!(
        tran_id = ?payload.tran_id,
        client_status = ?payload.status,
        "SSLCommerz success callback"
    );
    let outcome = state.payments.handle_success("success", &payload).await;
    redirect_page(&state, outcome, payload.tran_id.as_deref())
}

pub async fn sslcommerz_fail(
    State(state): State<AppState>,
    Form(payload): Form<CallbackPayload>,
) -> Html<String> {
    tracing::info!(tran_id = ?payload.tran_id, error = ?payload.error, "SSLCommerz fail callback");
    let outcome = state
        .payments
        .handle_abort("fail", &payload, PaymentSessionStatus::Failed)
        .await;
    redirect_page(&state, outcome, payload.tran_id.as_deref())
}

pub async fn sslcommerz_cancel(
    State(state): State<AppState>,
    Form(payload): Form<CallbackPayload>,
) -> Html<String> {
    tracing::info!(tran_id = ?payload.tran_id, "SSLCommerz cancel callback");
    let outcome = state
        .payments
        .handle_abort("cancel", &payload, PaymentSessionStatus::Cancelled)
        .await;
    redirect_page(&state, outcome, payload.tran_id.as_deref())
}

/// Server-to-server notification; settles exactly like the success callback.
pub async fn sslcommerz_ipn(
    State(state): State<AppState>,
    Form(payload): Form<CallbackPayload>,
) -> (StatusCode, Json<IpnResponse>) {
    tracing::info!(tran_id = ?payload.tran_id, client_status = ?payload.status, "SSLCommerz IPN");

    // Failed/cancelled notifications are recorded the same way the browser callbacks are.
    let outcome = match payload.status.as_deref() {
        Some("FAILED") => {
            state
                .payments
                .handle_abort("ipn", &payload, PaymentSessionStatus::Failed)
                .await
        }
        Some("CANCELLED") => {
            state
                .payments
                .handle_abort("ipn", &payload, PaymentSessionStatus::Cancelled)
                .await
        }
        _ => state.payments.handle_success("ipn", &payload).await,
    };

    let status = if outcome == CallbackOutcome::Error {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(IpnResponse {
            tran_id: payload.tran_id,
            status: outcome.redirect_status(),
        }),
    )
}

fn redirect_page(state: &AppState, outcome: CallbackOutcome, tran_id: Option<&str>) -> Html<String> {
    Html(render_redirect(
        &state.config.callbacks.frontend_base_url,
        outcome,
        tran_id,
    ))
}

/// Portal result URL for a callback outcome.
pub fn result_url(frontend_base_url: &str, outcome: CallbackOutcome, tran_id: Option<&str>) -> String {
    let base = format!("{}/payments/result", frontend_base_url.trim_end_matches('/'));
    let mut params = vec![("status", outcome.redirect_status())];
    if let Some(tran_id) = tran_id {
        params.push(("tran_id", tran_id));
    }

    match Url::parse_with_params(&base, &params) {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Invalid frontend base URL");
            format!("/payments/result?status={}", outcome.redirect_status())
        }
    }
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Minimal page that forwards the browser to the portal result screen.
pub fn render_redirect(frontend_base_url: &str, outcome: CallbackOutcome, tran_id: Option<&str>) -> String {
    let url = result_url(frontend_base_url, outcome, tran_id);
    let attr = escape_html(&url);
    // JSON string literal is a valid JS string; '<' is escaped so it cannot close the script.
    let script = serde_json::to_string(&url)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="0;url={attr}">
<title>Redirecting…</title>
</head>
<body>
<p>Redirecting to the payment result. <a href="{attr}">Continue</a></p>
<script>window.location.replace({script});</script>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_url_carries_status_and_tran_id() {
        let url = result_url(
            "https://portal.example.org/",
            CallbackOutcome::Paid,
            Some("MDR-abc"),
        );
        assert_eq!(
            url,
            "https://portal.example.org/payments/result?status=success&tran_id=MDR-abc"
        );
    }

    #[test]
    fn result_url_encodes_hostile_tran_id() {
        let url = result_url(
            "https://portal.example.org",
            CallbackOutcome::Invalid,
            Some("x\"><script>alert(1)</script>"),
        );
        assert!(url.starts_with("https://portal.example.org/payments/result?status=invalid&tran_id="));
        assert!(!url.contains('<'));
        assert!(!url.contains('"'));
    }

    #[test]
    fn result_url_without_tran_id() {
        let url = result_url("https://portal.example.org", CallbackOutcome::Cancelled, None);
        assert_eq!(url, "https://portal.example.org/payments/result?status=cancelled");
    }

    #[test]
    fn bad_base_url_falls_back_to_relative_path() {
        let url = result_url("not a url", CallbackOutcome::Error, Some("MDR-1"));
        assert_eq!(url, "/payments/result?status=error");
    }

    #[test]
    fn redirect_page_refreshes_and_scripts_to_result() {
        let page = render_redirect(
            "https://portal.example.org",
            CallbackOutcome::AlreadyPaid,
            Some("MDR-1"),
        );
        assert!(page.contains(
            r#"content="0;url=https://portal.example.org/payments/result?status=already_paid&amp;tran_id=MDR-1""#
        ));
        assert!(page.contains(
            r#"window.location.replace("https://portal.example.org/payments/result?status=already_paid&tran_id=MDR-1")"#
        ));
    }

    #[test]
    fn escape_html_covers_attribute_breakers() {
        assert_eq!(escape_html(r#"a&b<c>"d'"#), "a&amp;b&lt;c&gt;&quot;d&#x27;");
    }
}
