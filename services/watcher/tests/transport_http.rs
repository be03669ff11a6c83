//! Telegram transport against a mock Bot API.

use std::time::Duration;

use leasewatch_id::{MessageId, SubscriberId};
use leasewatch_render::ComposedMessage;
use leasewatch_watcher::transport::{ChatTransport, InboundSource, TelegramTransport, TransportError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123:abc";

#[tokio::test]
async fn test_send_plain_and_markdown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .and(body_partial_json(json!({"chat_id": 42, "text": "*x*", "parse_mode": "Markdown"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"message_id": 7}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .and(body_partial_json(json!({"chat_id": 42, "text": "hello"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"message_id": 8}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = TelegramTransport::new(&server.uri(), TOKEN).unwrap();
    let to = SubscriberId::new(42);

    let markdown = ComposedMessage {
        text: "*x*".to_string(),
        markdown: true,
    };
    assert_eq!(transport.send(to, &markdown).await.unwrap(), MessageId::new(7));
    assert_eq!(
        transport.send(to, &ComposedMessage::plain("hello")).await.unwrap(),
        MessageId::new(8)
    );

    let requests = server.received_requests().await.unwrap();
    let plain: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert!(plain.get("parse_mode").is_none());
}

#[tokio::test]
async fn test_rejected_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "ok": false,
            "description": "Forbidden: bot was blocked by the user"
        })))
        .mount(&server)
        .await;

    let transport = TelegramTransport::new(&server.uri(), TOKEN).unwrap();
    let error = transport
        .send(SubscriberId::new(42), &ComposedMessage::plain("hi"))
        .await
        .unwrap_err();
    match error {
        TransportError::Rejected(message) => assert!(message.contains("blocked")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/deleteMessage")))
        .and(body_partial_json(json!({"chat_id": 42, "message_id": 9})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = TelegramTransport::new(&server.uri(), TOKEN).unwrap();
    transport
        .delete(SubscriberId::new(42), MessageId::new(9))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/deleteMessage")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: message to delete not found"
        })))
        .mount(&server)
        .await;

    let transport = TelegramTransport::new(&server.uri(), TOKEN).unwrap();
    let error = transport
        .delete(SubscriberId::new(42), MessageId::new(9))
        .await
        .unwrap_err();
    assert!(matches!(error, TransportError::Rejected(message) if message.contains("not found")));
}

#[tokio::test]
async fn test_poll_acknowledges_non_text_updates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/getUpdates")))
        .and(body_partial_json(json!({"offset": 10, "timeout": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [
                {
                    "update_id": 10,
                    "message": {
                        "message_id": 100,
                        "chat": {"id": 42},
                        "from": {"first_name": "Alice", "username": "alice"},
                        "text": "/start"
                    }
                },
                {
                    "update_id": 11,
                    "message": {
                        "message_id": 5,
                        "chat": {"id": 43},
                        "from": {"first_name": "Bob"},
                        "text": "/help"
                    }
                },
                {"update_id": 12, "message": {"message_id": 101, "chat": {"id": 42}}}
            ]
        })))
        .mount(&server)
        .await;

    let transport = TelegramTransport::new(&server.uri(), TOKEN)
        .unwrap()
        .with_poll_timeout(Duration::ZERO);
    let batch = transport.poll(10).await.unwrap();

    assert_eq!(batch.next_offset, 13);
    assert_eq!(batch.messages.len(), 2);
    assert_eq!(batch.messages[0].from, SubscriberId::new(42));
    assert_eq!(batch.messages[0].sender_name, "alice");
    assert_eq!(batch.messages[0].text, "/start");
    assert_eq!(batch.messages[0].id, MessageId::new(100));
    assert_eq!(batch.messages[1].sender_name, "Bob");
}

#[tokio::test]
async fn test_empty_poll_keeps_offset() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/getUpdates")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": []})))
        .mount(&server)
        .await;

    let transport = TelegramTransport::new(&server.uri(), TOKEN).unwrap();
    let batch = transport.poll(5).await.unwrap();
    assert_eq!(batch.next_offset, 5);
    assert!(batch.messages.is_empty());
}
