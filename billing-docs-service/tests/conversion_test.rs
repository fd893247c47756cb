//! Quote status changes, expiry and conversion to invoice.

mod common;

use billing_docs_service::services::ExpirySweeper;
use chrono::Utc;
use common::{dec, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

async fn create_expired_quote(app: &TestApp) -> Value {
    app.create_document(
        "quote",
        json!({
            "client_id": Uuid::new_v4(),
            "issue_date": "2020-01-01",
            "valid_until": "2020-01-31",
            "lines": [TestApp::line("Old offer", "1", "100")]
        }),
    )
    .await
}

#[tokio::test]
async fn convert_copies_quote_into_new_invoice() {
    let app = TestApp::spawn().await;
    app.setup_company().await;

    let quote = app
        .create_document(
            "quote",
            json!({
                "client_id": Uuid::new_v4(),
                "notes": "Thanks",
                "lines": [
                    TestApp::line("Design", "2", "100"),
                    { "description": "Build", "quantity": "1", "unit_price": "300", "discount": "50" }
                ]
            }),
        )
        .await;
    let quote_id = quote["id"].as_str().expect("id");

    let response = app
        .post(&format!("/quotes/{}/convert", quote_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let invoice: Value = response.json().await.expect("Failed to parse JSON");

    assert_eq!(invoice["document_type"], "invoice");
    assert_eq!(invoice["status"], "issued");
    assert_eq!(invoice["number"], 1);
    assert_eq!(invoice["series"], "INV");
    assert_eq!(invoice["quote_id"], quote["id"]);
    assert_eq!(invoice["client_id"], quote["client_id"]);
    assert_eq!(invoice["notes"], "Thanks");
    assert_eq!(dec(&invoice["total"]), dec(&quote["total"]));
    assert_eq!(dec(&invoice["discount"]), dec!(50));

    let lines = invoice["lines"].as_array().expect("lines");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["description"], "Design");
    assert_eq!(lines[1]["description"], "Build");
    assert_ne!(lines[0]["line_id"], quote["lines"][0]["line_id"]);

    let response = app.get(&format!("/documents/quote/{}", quote_id)).await;
    let converted: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(converted["status"], "invoiced");
    assert_eq!(converted["invoice_id"], invoice["id"]);

    app.cleanup().await;
}

#[tokio::test]
async fn invoiced_quote_cannot_be_converted_edited_or_deleted() {
    let app = TestApp::spawn().await;
    app.setup_company().await;

    let quote = app.create_simple("quote").await;
    let quote_id = quote["id"].as_str().expect("id");

    let response = app
        .post(&format!("/quotes/{}/convert", quote_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let response = app
        .post(&format!("/quotes/{}/convert", quote_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["code"], "invalid_state");
    assert_eq!(body["details"]["current_state"], "invoiced");

    let response = app
        .put(
            &format!("/documents/quote/{}", quote_id),
            &json!({
                "client_id": quote["client_id"],
                "lines": [TestApp::line("A", "1", "1")]
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app.delete(&format!("/quotes/{}", quote_id)).await;
    assert_eq!(response.status().as_u16(), 400);

    // The refused second conversion did not consume an invoice number.
    let invoice = app.create_simple("invoice").await;
    assert_eq!(invoice["number"], 2);

    app.cleanup().await;
}

#[tokio::test]
async fn expired_quote_cannot_be_converted() {
    let app = TestApp::spawn().await;
    app.setup_company().await;

    let quote = create_expired_quote(&app).await;
    assert_eq!(quote["status"], "expired");

    let response = app
        .post(&format!("/quotes/{}/convert", quote["id"].as_str().unwrap()), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["details"]["current_state"], "expired");

    app.cleanup().await;
}

#[tokio::test]
async fn rejected_quote_must_be_reopened_before_conversion() {
    let app = TestApp::spawn().await;
    app.setup_company().await;

    let quote = app.create_simple("quote").await;
    let quote_id = quote["id"].as_str().expect("id");

    let response = app
        .post(&format!("/quotes/{}/status", quote_id), &json!({ "status": "rejected" }))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post(&format!("/quotes/{}/convert", quote_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .post(&format!("/quotes/{}/status", quote_id), &json!({ "status": "pending" }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let response = app
        .post(&format!("/quotes/{}/status", quote_id), &json!({ "status": "approved" }))
        .await;
    let approved: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(approved["status"], "approved");

    let response = app
        .post(&format!("/quotes/{}/convert", quote_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    app.cleanup().await;
}

#[tokio::test]
async fn status_endpoint_refuses_system_only_targets() {
    let app = TestApp::spawn().await;
    app.setup_company().await;

    let quote = app.create_simple("quote").await;
    let quote_id = quote["id"].as_str().expect("id");

    for target in ["invoiced", "expired"] {
        let response = app
            .post(&format!("/quotes/{}/status", quote_id), &json!({ "status": target }))
            .await;
        assert_eq!(response.status().as_u16(), 400, "accepted {}", target);
    }

    app.cleanup().await;
}

#[tokio::test]
async fn sweeper_persists_expiry_and_edit_reopens_quote() {
    let app = TestApp::spawn().await;
    app.setup_company().await;

    let quote = create_expired_quote(&app).await;
    let quote_id = quote["id"].as_str().expect("id");
    let live = app.create_simple("quote").await;

    let sweeper = ExpirySweeper::new(app.db.pool().clone(), Duration::ZERO);
    let report = sweeper
        .sweep_once(Utc::now().date_naive())
        .await
        .expect("sweep failed");
    assert_eq!(report.quotes, 1);

    let stored: String = sqlx::query_scalar("SELECT status FROM quotes WHERE quote_id = $1")
        .bind(Uuid::parse_str(quote_id).unwrap())
        .fetch_one(app.db.pool())
        .await
        .expect("Failed to read quote");
    assert_eq!(stored, "expired");

    let response = app
        .get(&format!("/documents/quote/{}", live["id"].as_str().unwrap()))
        .await;
    let live: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(live["status"], "pending");

    let response = app
        .put(
            &format!("/documents/quote/{}", quote_id),
            &json!({
                "client_id": quote["client_id"],
                "issue_date": "2020-01-01",
                "valid_until": "2099-12-31",
                "lines": [TestApp::line("Renewed offer", "1", "120")]
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let reopened: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(reopened["status"], "pending");

    let response = app
        .post(&format!("/quotes/{}/convert", quote_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    app.cleanup().await;
}

#[tokio::test]
async fn pending_quote_can_be_deleted() {
    let app = TestApp::spawn().await;
    app.setup_company().await;

    let quote = app.create_simple("quote").await;
    let quote_id = quote["id"].as_str().expect("id");

    let response = app.delete(&format!("/quotes/{}", quote_id)).await;
    assert_eq!(response.status().as_u16(), 204);

    let response = app.get(&format!("/documents/quote/{}", quote_id)).await;
    assert_eq!(response.status().as_u16(), 404);

    app.cleanup().await;
}
