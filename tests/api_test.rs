//! HTTP surface tests: health endpoints, transfer batch semantics, and
//! depository CRUD.

mod common;

use common::TestApp;
use serde_json::{json, Value};

fn transfer_body(number: &str) -> Value {
    json!({
        "transferType": "Push",
        "amount": format!("USD {number}"),
        "originator": "originator",
        "originatorDepository": "originator-dep",
        "receiver": "receiver",
        "receiverDepository": "receiver-dep",
        "description": "paycheck",
        "standardEntryClassCode": "PPD"
    })
}

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "ach-gateway");
}

#[tokio::test]
async fn single_transfer_create_returns_bare_object() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/transfers", app.address))
        .header("x-user-id", "user")
        .json(&transfer_body("27.12"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // bare object, not wrapped in an array
    let body: Value = resp.json().await.unwrap();
    assert!(body.is_object(), "got {body}");
    assert!(body["id"].is_string());
    assert_eq!(body["amount"], "USD 27.12");
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn batch_transfer_create_returns_array() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/transfers/batch", app.address))
        .header("x-user-id", "user")
        .json(&json!([transfer_body("12.12"), transfer_body("13.13")]))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // one response element per request
    let body: Value = resp.json().await.unwrap();
    let items = body.as_array().expect("array response");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["amount"], "USD 12.12");
    assert_eq!(items[1]["amount"], "USD 13.13");
}

#[tokio::test]
async fn transfer_create_rejects_missing_fields() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/transfers", app.address))
        .header("x-user-id", "user")
        .json(&json!({ "transferType": "Push" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transfers_are_scoped_by_user() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/transfers", app.address))
        .header("x-user-id", "user-a")
        .json(&transfer_body("18.61"))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("{}/transfers", app.address))
        .header("x-user-id", "user-b")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body.as_array().map(Vec::len), Some(0));

    let resp = client
        .get(format!("{}/transfers", app.address))
        .header("x-user-id", "user-a")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn depository_create_starts_unverified() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/depositories", app.address))
        .header("x-user-id", "user")
        .json(&json!({
            "bankName": "bank name",
            "holder": "holder",
            "holderType": "Individual",
            "type": "Checking",
            "routingNumber": "121042882",
            "accountNumber": "151"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "Unverified");
    let id = body["id"].as_str().unwrap().to_string();

    // PATCH merges non-empty fields
    let resp = client
        .patch(format!("{}/depositories/{id}", app.address))
        .header("x-user-id", "user")
        .json(&json!({ "bankName": "other bank" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["bankName"], "other bank");
    assert_eq!(body["routingNumber"], "121042882");
}

#[tokio::test]
async fn missing_user_header_is_rejected() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/transfers", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}
