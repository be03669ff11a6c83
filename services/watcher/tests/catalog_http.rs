//! HTTP catalog client against a mock server.

use leasewatch_watcher::catalog::{CatalogClient, CatalogError, HttpCatalogClient};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn car(ident: &str) -> serde_json::Value {
    json!({"rentalObject": {"ident": ident, "powerHP": 150}})
}

#[tokio::test]
async fn test_fetch_all_follows_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "2"))
        .and(header("authorization", "Bearer token-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [car("c1"), car("c2")],
            "total": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [car("c3")],
            "total": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCatalogClient::new(server.uri()).unwrap();
    let items = client.fetch_all("token-a", 0, 2).await.unwrap();

    let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    assert_eq!(items[0].attributes["rentalObject"]["powerHP"], 150);
}

#[tokio::test]
async fn test_items_without_identity_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [car("c1"), {"rentalObject": {}}]
        })))
        .mount(&server)
        .await;

    let client = HttpCatalogClient::new(server.uri()).unwrap();
    let items = client.fetch_all("token-a", 0, 10).await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_rejected_credential_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/user"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = HttpCatalogClient::new(server.uri()).unwrap();
    let error = client.fetch_all("token-a", 0, 10).await.unwrap_err();
    assert!(error.is_unauthorized());
    assert!(error.to_string().contains("expired"));

    assert!(client.fetch_tier_info("token-a").await.unwrap_err().is_unauthorized());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = HttpCatalogClient::new(server.uri()).unwrap();
    let error = client.fetch_all("token-a", 0, 10).await.unwrap_err();
    assert!(matches!(error, CatalogError::Transient(_)));
}

#[tokio::test]
async fn test_fetch_tier_info() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user"))
        .and(header("authorization", "Bearer token-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "addressRole": {"roleName": "employee-gold"}
        })))
        .mount(&server)
        .await;

    let client = HttpCatalogClient::new(server.uri()).unwrap();
    let tier = client.fetch_tier_info("token-a").await.unwrap();
    assert_eq!(tier.as_str(), "employee-gold");
}

#[tokio::test]
async fn test_exchange_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .and(body_json(json!({"username": "bob", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "token-b"})))
        .mount(&server)
        .await;

    let client = HttpCatalogClient::new(server.uri()).unwrap();
    assert_eq!(
        client.exchange_credentials("bob", "secret").await.unwrap(),
        "token-b"
    );
    assert!(client
        .exchange_credentials("bob", "wrong")
        .await
        .is_err());
}
