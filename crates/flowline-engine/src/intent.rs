// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Intent classification.
//!
//! The remote scorer is optional and best-effort: any failure (unreachable,
//! timeout, bad response shape) silently yields `None` and the caller falls
//! back to the keyword heuristic. The heuristic itself never fails.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Keyword heuristic used when no classifier answers.
pub fn keyword_intent(text: &str) -> &'static str {
    let t = text.to_lowercase();
    if t.contains("precio") || t.contains("costo") {
        return "pricing";
    }
    if t.contains("hola") || t.contains("buenas") {
        return "greeting";
    }
    "default"
}

/// Canned reply for a heuristic intent, used by the interpreter's fallback.
pub fn fallback_reply(intent: &str) -> &'static str {
    match intent {
        "pricing" => "Gracias por preguntar sobre precios. Nuestro plan starter cuesta $9/mes.",
        "greeting" => "Hola! ¿En qué puedo ayudarte hoy?",
        _ => "Gracias por tu mensaje. Un agente te responderá pronto.",
    }
}

/// Seam for the external intent-scoring service.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify `text` into an intent label, or `None` when unavailable.
    async fn classify(&self, text: &str) -> Option<String>;
}

/// Always-absent classifier; callers degrade to [`keyword_intent`].
pub struct NoClassifier;

#[async_trait]
impl IntentClassifier for NoClassifier {
    async fn classify(&self, _text: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    intent: String,
}

/// HTTP classifier: POST `{text}` to the configured endpoint, expecting
/// `{intent, ...}` back.
pub struct RemoteClassifier {
    client: reqwest::Client,
    url: String,
}

impl RemoteClassifier {
    pub fn new(url: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl IntentClassifier for RemoteClassifier {
    async fn classify(&self, text: &str) -> Option<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<IntentResponse>().await {
                Ok(body) if !body.intent.is_empty() => Some(body.intent),
                Ok(_) => None,
                Err(e) => {
                    debug!(error = %e, "classifier returned unusable body");
                    None
                }
            },
            Ok(resp) => {
                debug!(status = %resp.status(), "classifier returned non-success");
                None
            }
            Err(e) => {
                debug!(error = %e, "classifier unreachable");
                None
            }
        }
    }
}
