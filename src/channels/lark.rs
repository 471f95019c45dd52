use super::card::Card;
use super::content::extract_text;
use super::traits::{ChatMessage, MessageBody, MessageGateway};
use crate::auth::TenantTokenCache;
use crate::error::RelayError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

const FEISHU_BASE_URL: &str = "https://open.feishu.cn/open-apis";
const LARK_BASE_URL: &str = "https://open.larksuite.com/open-apis";

/// Feishu/Lark API business code for expired/invalid tenant access token.
const LARK_INVALID_ACCESS_TOKEN_CODE: i64 = 99_991_663;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LarkPlatform {
    Lark,
    Feishu,
}

impl LarkPlatform {
    pub fn api_base(self) -> &'static str {
        match self {
            Self::Lark => LARK_BASE_URL,
            Self::Feishu => FEISHU_BASE_URL,
        }
    }
}

fn extract_lark_response_code(body: &Value) -> Option<i64> {
    body.get("code").and_then(|c| c.as_i64())
}

fn should_invalidate_tenant_token(status: reqwest::StatusCode, body: &Value) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED
        || extract_lark_response_code(body) == Some(LARK_INVALID_ACCESS_TOKEN_CODE)
}

fn ensure_lark_success(status: reqwest::StatusCode, body: &Value) -> Result<(), RelayError> {
    let code = extract_lark_response_code(body).unwrap_or(0);
    if !status.is_success() || code != 0 {
        return Err(RelayError::Gateway {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    Ok(())
}

/// HTTP client for the Feishu/Lark IM endpoints.
#[derive(Clone)]
pub struct LarkClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Arc<TenantTokenCache>,
}

impl LarkClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, tokens: Arc<TenantTokenCache>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Build the client and its token cache from `[lark]` config.
    pub fn from_config(config: &crate::config::LarkConfig, http: reqwest::Client) -> Self {
        let api_base = config.resolved_api_base();
        let tokens = Arc::new(TenantTokenCache::new(
            http.clone(),
            &api_base,
            config.app_id.clone(),
            config.app_secret.clone(),
        ));
        Self::new(http, api_base, tokens)
    }

    pub fn tokens(&self) -> &Arc<TenantTokenCache> {
        &self.tokens
    }

    fn message_url(&self, message_id: &str) -> String {
        format!("{}/im/v1/messages/{message_id}", self.api_base)
    }

    fn send_message_url(&self) -> String {
        format!("{}/im/v1/messages?receive_id_type=chat_id", self.api_base)
    }

    fn reply_message_url(&self, message_id: &str) -> String {
        format!("{}/im/v1/messages/{message_id}/reply", self.api_base)
    }

    async fn execute(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value, RelayError> {
        let token = self.tokens.get_token().await?;
        let mut request = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json; charset=utf-8");
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<Value>(&raw)
            .unwrap_or_else(|_| serde_json::json!({ "raw": raw }));

        if should_invalidate_tenant_token(status, &parsed) {
            tracing::warn!("Lark: tenant access token rejected, dropping cached token");
            self.tokens.invalidate();
        }
        ensure_lark_success(status, &parsed)?;
        Ok(parsed)
    }
}

#[async_trait]
impl MessageGateway for LarkClient {
    async fn get_message(&self, message_id: &str) -> Result<ChatMessage, RelayError> {
        let data = self
            .execute(Method::GET, &self.message_url(message_id), None)
            .await?;

        let item = data
            .pointer("/data/items/0")
            .ok_or_else(|| RelayError::Decode(format!("message {message_id} has no items")))?;
        let raw_content = item
            .pointer("/body/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let parent_id = item
            .get("parent_id")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(String::from);
        let sender_id = item
            .pointer("/sender/id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(ChatMessage {
            content: extract_text(raw_content),
            parent_id,
            sender_id,
        })
    }

    async fn send_message(
        &self,
        chat_id: &str,
        body: &MessageBody,
        reply_to: Option<&str>,
    ) -> Result<String, RelayError> {
        let uuid = Uuid::new_v4().to_string();
        let (url, payload) = match reply_to {
            Some(parent) => (
                self.reply_message_url(parent),
                serde_json::json!({
                    "msg_type": body.msg_type(),
                    "content": body.content_json(),
                    "uuid": uuid,
                }),
            ),
            None => (
                self.send_message_url(),
                serde_json::json!({
                    "receive_id": chat_id,
                    "msg_type": body.msg_type(),
                    "content": body.content_json(),
                    "uuid": uuid,
                }),
            ),
        };

        let data = self.execute(Method::POST, &url, Some(&payload)).await?;
        data.pointer("/data/message_id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| RelayError::Decode("send response is missing data.message_id".into()))
    }

    async fn patch_message(&self, message_id: &str, card: &Card) -> Result<(), RelayError> {
        self.execute(
            Method::PATCH,
            &self.message_url(message_id),
            Some(&card.patch_body()),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn make_client(server: &MockServer) -> LarkClient {
        Mock::given(method("POST"))
            .and(path("/open-apis/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "tenant_access_token": "t-test",
                "expire": 7200
            })))
            .mount(server)
            .await;

        let http = reqwest::Client::new();
        let api_base = format!("{}/open-apis", server.uri());
        let tokens = Arc::new(TenantTokenCache::new(http.clone(), &api_base, "cli_app", "secret"));
        LarkClient::new(http, api_base, tokens)
    }

    #[test]
    fn lark_platform_api_base() {
        assert_eq!(LarkPlatform::Feishu.api_base(), FEISHU_BASE_URL);
        assert_eq!(LarkPlatform::Lark.api_base(), LARK_BASE_URL);
    }

    #[test]
    fn lark_ensure_success_rejects_non_zero_code() {
        let ok = serde_json::json!({ "code": 0 });
        let bad = serde_json::json!({ "code": 12345, "msg": "bad request" });
        assert!(ensure_lark_success(reqwest::StatusCode::OK, &ok).is_ok());
        assert!(matches!(
            ensure_lark_success(reqwest::StatusCode::OK, &bad),
            Err(RelayError::Gateway { status: 200, .. })
        ));
        assert!(ensure_lark_success(reqwest::StatusCode::BAD_REQUEST, &ok).is_err());
    }

    #[test]
    fn lark_invalid_token_detection() {
        let expired = serde_json::json!({ "code": LARK_INVALID_ACCESS_TOKEN_CODE });
        assert!(should_invalidate_tenant_token(reqwest::StatusCode::OK, &expired));
        assert!(should_invalidate_tenant_token(
            reqwest::StatusCode::UNAUTHORIZED,
            &serde_json::json!({})
        ));
        assert!(!should_invalidate_tenant_token(
            reqwest::StatusCode::OK,
            &serde_json::json!({ "code": 0 })
        ));
    }

    #[tokio::test]
    async fn lark_get_message_parses_item() {
        let server = MockServer::start().await;
        let client = make_client(&server).await;
        Mock::given(method("GET"))
            .and(path("/open-apis/im/v1/messages/om_2"))
            .and(header("Authorization", "Bearer t-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": { "items": [{
                    "body": { "content": "{\"text\":\"earlier answer\"}" },
                    "parent_id": "om_1",
                    "sender": { "id": "cli_app", "sender_type": "app" }
                }]}
            })))
            .mount(&server)
            .await;

        let message = client.get_message("om_2").await.unwrap();
        assert_eq!(
            message,
            ChatMessage {
                content: "earlier answer".into(),
                parent_id: Some("om_1".into()),
                sender_id: "cli_app".into(),
            }
        );
    }

    #[tokio::test]
    async fn lark_send_without_reply_targets_chat() {
        let server = MockServer::start().await;
        let client = make_client(&server).await;
        Mock::given(method("POST"))
            .and(path("/open-apis/im/v1/messages"))
            .and(query_param("receive_id_type", "chat_id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": { "message_id": "om_new" }
            })))
            .mount(&server)
            .await;

        let id = client
            .send_message("oc_chat", &MessageBody::Text("hello".into()), None)
            .await
            .unwrap();
        assert_eq!(id, "om_new");

        let requests = server.received_requests().await.unwrap();
        let sent = requests
            .iter()
            .find(|r| r.url.path() == "/open-apis/im/v1/messages")
            .unwrap();
        let body: Value = serde_json::from_slice(&sent.body).unwrap();
        assert_eq!(body["receive_id"], "oc_chat");
        assert_eq!(body["msg_type"], "text");
        assert_eq!(body["content"], "{\"text\":\"hello\"}");
        assert!(body["uuid"].as_str().is_some());
    }

    #[tokio::test]
    async fn lark_send_reply_uses_reply_endpoint() {
        let server = MockServer::start().await;
        let client = make_client(&server).await;
        Mock::given(method("POST"))
            .and(path("/open-apis/im/v1/messages/om_1/reply"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": { "message_id": "om_bot" }
            })))
            .mount(&server)
            .await;

        let id = client
            .send_message("oc_chat", &MessageBody::Card(Card::new("...")), Some("om_1"))
            .await
            .unwrap();
        assert_eq!(id, "om_bot");
    }

    #[tokio::test]
    async fn lark_patch_failure_is_gateway_error() {
        let server = MockServer::start().await;
        let client = make_client(&server).await;
        Mock::given(method("PATCH"))
            .and(path("/open-apis/im/v1/messages/om_bot"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": 230001,
                "msg": "message not found"
            })))
            .mount(&server)
            .await;

        let err = client
            .patch_message("om_bot", &Card::new("text"))
            .await
            .unwrap_err();
        match err {
            RelayError::Gateway { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("message not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lark_expired_token_code_invalidates_cache() {
        let server = MockServer::start().await;
        let client = make_client(&server).await;
        Mock::given(method("GET"))
            .and(path("/open-apis/im/v1/messages/om_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": LARK_INVALID_ACCESS_TOKEN_CODE,
                "msg": "invalid access token"
            })))
            .mount(&server)
            .await;

        assert!(client.get_message("om_9").await.is_err());
        assert!(client.tokens().current().is_none());
    }
}
