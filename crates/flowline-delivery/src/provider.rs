// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp Cloud-shaped provider client.
//!
//! One request per envelope: POST `{base}/{phone_number_id}/messages` with a
//! bearer token. The response's `messages[0].id` is the provider message id
//! recorded on the sent stream and in history.

use serde::Deserialize;
use tracing::debug;

use flowline_core::{FlowlineError, OutboundContent, OutboundEnvelope};

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentId>,
}

#[derive(Debug, Deserialize)]
struct SentId {
    id: String,
}

pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    phone_number_id: String,
}

impl ProviderClient {
    pub fn new(base_url: String, token: String, phone_number_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
            phone_number_id,
        }
    }

    /// Build the provider request body from the envelope's typed content.
    pub fn request_body(envelope: &OutboundEnvelope) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": envelope.to,
            "type": envelope.content.kind(),
        });
        match &envelope.content {
            OutboundContent::Text(text) => {
                body["text"] = serde_json::json!({ "body": text });
            }
            OutboundContent::Template(template) => {
                body["template"] = serde_json::from_str(template)
                    .unwrap_or_else(|_| serde_json::json!({ "name": template }));
            }
            OutboundContent::Media(media) => {
                body["media"] = serde_json::from_str(media)
                    .unwrap_or_else(|_| serde_json::json!({ "link": media }));
            }
        }
        body
    }

    /// One delivery attempt. Transient-vs-permanent is the caller's concern;
    /// any non-success status or network failure is a provider error.
    pub async fn send(&self, envelope: &OutboundEnvelope) -> Result<String, FlowlineError> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&Self::request_body(envelope))
            .send()
            .await
            .map_err(|e| FlowlineError::Provider {
                message: format!("provider unreachable: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlowlineError::Provider {
                message: format!("provider returned {status}"),
                source: None,
            });
        }
        let parsed: SendResponse = response.json().await.map_err(|e| FlowlineError::Provider {
            message: format!("unreadable provider response: {e}"),
            source: Some(Box::new(e)),
        })?;
        let id = parsed
            .messages
            .first()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        debug!(to = %envelope.to, provider_message_id = %id, "provider accepted message");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope(content: OutboundContent) -> OutboundEnvelope {
        OutboundEnvelope {
            channel_id: "wa_main".into(),
            to: "5215550001".into(),
            content,
            client_id: "auto_1".into(),
            trace_id: "t-1".into(),
            org_id: Some("org1".into()),
            requested_by: None,
            conversation_id: None,
            orig_text: None,
        }
    }

    #[test]
    fn text_request_body_shape() {
        let body = ProviderClient::request_body(&envelope(OutboundContent::Text("hola".into())));
        assert_eq!(body["messaging_product"], "whatsapp");
        assert_eq!(body["to"], "5215550001");
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"]["body"], "hola");
    }

    #[test]
    fn template_request_body_embeds_object() {
        let tpl = r#"{"name":"welcome","language":{"code":"es"},"components":[]}"#;
        let body =
            ProviderClient::request_body(&envelope(OutboundContent::Template(tpl.into())));
        assert_eq!(body["type"], "template");
        assert_eq!(body["template"]["name"], "welcome");
    }

    #[tokio::test]
    async fn send_returns_provider_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/12345/messages"))
            .and(bearer_token("tok"))
            .and(body_partial_json(serde_json::json!({"to": "5215550001"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "wamid.ABC"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(server.uri(), "tok".into(), "12345".into());
        let id = client
            .send(&envelope(OutboundContent::Text("hola".into())))
            .await
            .unwrap();
        assert_eq!(id, "wamid.ABC");
    }

    #[tokio::test]
    async fn non_success_status_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ProviderClient::new(server.uri(), "tok".into(), "12345".into());
        let err = client
            .send(&envelope(OutboundContent::Text("hola".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowlineError::Provider { .. }));
    }
}
