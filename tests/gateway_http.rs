//! HTTP-level tests for the event gateway.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use larkrelay::config::Config;
use larkrelay::gateway::{build_router, AppState, EventCipher};
use larkrelay::relay::Relay;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_config(server_uri: &str) -> Config {
    let mut config = Config::default();
    config.lark.app_id = "cli_app".into();
    config.lark.app_secret = "secret".into();
    config.lark.api_base = Some(format!("{server_uri}/open-apis"));
    config.completion.api_url = format!("{server_uri}/v1");
    config.completion.api_key = "sk-test".into();
    config
}

fn state_for(config: &Config) -> AppState {
    AppState::new(Arc::new(Relay::from_config(config)), config)
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
    send_with_headers(app, method, uri, &[], body).await
}

async fn send_with_headers(
    app: Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/open-apis/auth/v3/tenant_access_token/internal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "tenant_access_token": "t-test",
            "expire": 7200
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn url_verification_echoes_challenge() {
    let config = base_config("http://127.0.0.1:9");
    let app = build_router(state_for(&config));

    let (status, body) = send(
        app,
        Method::POST,
        "/",
        Some(json!({ "type": "url_verification", "challenge": "abc", "token": "vt" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "challenge": "abc" }));
}

#[tokio::test]
async fn encrypted_url_verification_is_decrypted() {
    let mut config = base_config("http://127.0.0.1:9");
    config.lark.encrypt_key = Some("encrypt-me".into());
    let app = build_router(state_for(&config));

    let envelope = EventCipher::new("encrypt-me").encrypt_with_iv(
        &json!({ "type": "url_verification", "challenge": "sealed" }).to_string(),
        [5u8; 16],
    );
    let (status, body) = send(app, Method::POST, "/", Some(json!({ "encrypt": envelope }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["challenge"], "sealed");
}

#[tokio::test]
async fn bad_envelope_is_decryption_failure() {
    let mut config = base_config("http://127.0.0.1:9");
    config.lark.encrypt_key = Some("encrypt-me".into());
    let app = build_router(state_for(&config));

    let envelope = EventCipher::new("other-key").encrypt_with_iv("{}", [5u8; 16]);
    let (status, _) = send(app, Method::POST, "/", Some(json!({ "encrypt": envelope }))).await;

    // A wrong key is a padding failure or garbage that fails to parse.
    assert!(status == StatusCode::INTERNAL_SERVER_ERROR || status == StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_verification_token_is_forbidden() {
    let mut config = base_config("http://127.0.0.1:9");
    config.lark.verification_token = Some("expected".into());
    let app = build_router(state_for(&config));

    let (status, _) = send(
        app,
        Method::POST,
        "/",
        Some(json!({ "type": "url_verification", "challenge": "abc", "token": "wrong" })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_verification_token_is_forbidden_when_configured() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/open-apis/im/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "message_id": "om_notice" }
        })))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = base_config(&server.uri());
    config.lark.verification_token = Some("expected".into());
    config.lark.notify_chat_id = Some("oc_notify".into());
    let state = state_for(&config);
    let tasks = state.tasks.clone();
    let app = build_router(state);

    let (status, _) = send(
        app.clone(),
        Method::POST,
        "/",
        Some(json!({ "action": "document.create", "resource": { "title": "Forged" } })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        app,
        Method::POST,
        "/",
        Some(json!({ "type": "url_verification", "challenge": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    tasks.close();
    tasks.wait().await;
}

#[tokio::test]
async fn matching_verification_token_is_accepted() {
    let mut config = base_config("http://127.0.0.1:9");
    config.lark.verification_token = Some("expected".into());
    let app = build_router(state_for(&config));

    let (status, body) = send(
        app,
        Method::POST,
        "/",
        Some(json!({ "type": "url_verification", "challenge": "abc", "token": "expected" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["challenge"], "abc");
}

#[tokio::test]
async fn message_event_is_acknowledged_and_answered_once() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/open-apis/im/v1/messages/om_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "items": [{
                "body": { "content": "{\"text\":\"hello\"}" },
                "sender": { "id": "ou_user" }
            }]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n",
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open-apis/im/v1/messages/om_1/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "message_id": "om_card" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/open-apis/im/v1/messages/om_card"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .mount(&server)
        .await;

    let config = base_config(&server.uri());
    let state = state_for(&config);
    let tasks = state.tasks.clone();
    let app = build_router(state);

    let event = json!({
        "schema": "2.0",
        "header": { "event_type": "im.message.receive_v1" },
        "event": { "message": {
            "message_id": "om_1",
            "chat_id": "oc_1",
            "chat_type": "p2p",
            "message_type": "text",
            "content": "{\"text\":\"hello\"}"
        }}
    });

    let (status, body) = send(app.clone(), Method::POST, "/", Some(event.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Request received successfully");

    // Platform retry of the same delivery.
    let (status, _) = send(app, Method::POST, "/", Some(event)).await;
    assert_eq!(status, StatusCode::OK);

    tasks.close();
    tasks.wait().await;

    let patched = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .any(|r| r.method.as_str() == "PATCH");
    assert!(patched);
}

#[tokio::test]
async fn webhook_sends_result_as_text() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/open-apis/im/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "message_id": "om_result" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = build_router(state_for(&base_config(&server.uri())));
    let (status, body) = send(
        app,
        Method::POST,
        "/webhook",
        Some(json!({ "chat_id": "oc_1", "result": "done" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["message"], "Result sent successfully");
    assert_eq!(body["message_id"], "om_result");
}

#[tokio::test]
async fn webhook_requires_configured_secret() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/open-apis/im/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "message_id": "om_result" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config(&server.uri());
    config.gateway.webhook_secret = Some("hook-secret".into());
    let app = build_router(state_for(&config));
    let body = json!({ "chat_id": "oc_1", "result": "done" });

    let (status, response) =
        send(app.clone(), Method::POST, "/webhook", Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(serde_json::from_str::<Value>(&response).unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("X-Webhook-Secret"));

    let (status, _) = send_with_headers(
        app.clone(),
        Method::POST,
        "/webhook",
        &[("X-Webhook-Secret", "wrong")],
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, response) = send_with_headers(
        app,
        Method::POST,
        "/webhook",
        &[("X-Webhook-Secret", "hook-secret")],
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&response).unwrap()["message_id"], "om_result");
}

#[tokio::test]
async fn webhook_rejects_bad_body() {
    let app = build_router(state_for(&base_config("http://127.0.0.1:9")));
    let (status, _) = send(app, Method::POST, "/webhook", Some(json!({ "chat_id": "oc_1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_reports_gateway_failure() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/open-apis/im/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let app = build_router(state_for(&base_config(&server.uri())));
    let (status, _) = send(
        app,
        Method::POST,
        "/webhook",
        Some(json!({ "chat_id": "oc_1", "result": "done" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn root_get_redirects_when_configured() {
    let mut config = base_config("http://127.0.0.1:9");
    let (status, body) = send(build_router(state_for(&config)), Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "larkrelay");

    config.gateway.redirect_url = Some("https://example.com/docs".into());
    let response = build_router(state_for(&config))
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://example.com/docs"
    );
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let app = build_router(state_for(&base_config("http://127.0.0.1:9")));
    let (status, _) = send(app, Method::PUT, "/", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn health_reports_ok() {
    let app = build_router(state_for(&base_config("http://127.0.0.1:9")));
    let (status, body) = send(app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "status": "ok" }));
}
