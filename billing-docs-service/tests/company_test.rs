//! Company billing settings.

mod common;

use common::{dec, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

#[tokio::test]
async fn settings_are_created_then_updated() {
    let app = TestApp::spawn().await;

    let response = app.get("/company").await;
    assert_eq!(response.status().as_u16(), 404);

    let created = app.setup_company().await;
    assert_eq!(created["company_id"], app.company_id.to_string());
    assert_eq!(created["invoice_series"], "INV");

    let response = app
        .put(
            "/company",
            &json!({
                "name": "Acme Billing",
                "tax_rate": "7.5",
                "currency": "usd",
                "invoice_series": "F",
                "quote_series": "P"
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app.get("/company").await;
    let company: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(company["currency"], "USD");
    assert_eq!(dec(&company["tax_rate"]), dec!(7.5));

    let invoice = app.create_simple("invoice").await;
    assert_eq!(invoice["series"], "F");
    assert_eq!(invoice["currency"], "USD");
    assert_eq!(dec(&invoice["tax"]), dec!(15));

    app.cleanup().await;
}

#[tokio::test]
async fn invalid_settings_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .put(
            "/company",
            &json!({
                "name": "",
                "tax_rate": "150",
                "currency": "EURO",
                "invoice_series": "INV",
                "quote_series": "QUO"
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["code"], "validation_error");

    app.cleanup().await;
}
