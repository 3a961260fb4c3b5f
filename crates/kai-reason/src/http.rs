//! HTTP client for OpenAI-compatible chat-completion APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use kai_core::{KaiError, ReasoningConfig, ReasoningService, Result, TurnMessage};

/// Reasoning service backed by `/v1/chat/completions`.
pub struct HttpReasoner {
    config: ReasoningConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpReasoner {
    pub fn new(config: ReasoningConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout())
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| KaiError::reasoning(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> KaiError {
        if e.is_timeout() {
            KaiError::timeout("chat completion", self.config.timeout_secs * 1000)
        } else {
            KaiError::reasoning(format!("Request failed: {}", e))
        }
    }
}

fn build_request<'a>(
    config: &'a ReasoningConfig,
    system_prompt: &'a str,
    messages: &'a [TurnMessage],
) -> ChatRequest<'a> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage {
        role: "system",
        content: system_prompt,
    });
    out.extend(messages.iter().map(|m| ChatMessage {
        role: m.role.as_str(),
        content: &m.content,
    }));
    ChatRequest {
        model: &config.model,
        messages: out,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        stream: false,
    }
}

fn extract_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| KaiError::reasoning("empty completion"))
}

#[async_trait]
impl ReasoningService for HttpReasoner {
    async fn complete(&self, system_prompt: &str, messages: &[TurnMessage]) -> Result<String> {
        let body = build_request(&self.config, system_prompt, messages);

        let mut request = self.client.post(self.url("/v1/chat/completions")).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KaiError::reasoning(format!(
                "HTTP {} from OpenAI-compatible API",
                status
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let content = extract_content(parsed)?;
        debug!("Completion received: {} chars", content.len());
        Ok(content)
    }

    /// GET `/v1/models`; any success status counts as healthy.
    async fn health(&self) -> Result<()> {
        let mut request = self.client.get(self.url("/v1/models"));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        if !response.status().is_success() {
            return Err(KaiError::reasoning(format!(
                "HTTP {} from {}",
                response.status(),
                self.config.endpoint
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a random local port.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(endpoint: String) -> ReasoningConfig {
        ReasoningConfig {
            endpoint,
            timeout_secs: 2,
            ..ReasoningConfig::default()
        }
    }

    #[test]
    fn test_request_shape() {
        let config = ReasoningConfig::default();
        let history = vec![TurnMessage::user("Привіт"), TurnMessage::assistant("Вітаю")];
        let body = build_request(&config, "system", &history);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][2]["role"], "assistant");
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_extract_content_rejects_empty() {
        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(extract_content(empty).is_err());
        let blank: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert!(extract_content(blank).is_err());
    }

    #[tokio::test]
    async fn test_complete_against_local_server() {
        let endpoint = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"ok\":true}"}}]}"#,
        )
        .await;
        let reasoner = HttpReasoner::new(config(endpoint)).unwrap();
        let text = reasoner
            .complete("sys", &[TurnMessage::user("q")])
            .await
            .unwrap();
        assert_eq!(text, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let endpoint = serve_once("503 Service Unavailable", "{}").await;
        let reasoner = HttpReasoner::new(config(endpoint)).unwrap();
        let err = reasoner.complete("sys", &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "REASONING_ERROR");
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_health_checks_models_endpoint() {
        let endpoint = serve_once("200 OK", r#"{"data":[]}"#).await;
        let reasoner = HttpReasoner::new(config(endpoint)).unwrap();
        reasoner.health().await.unwrap();

        let endpoint = serve_once("401 Unauthorized", "{}").await;
        let reasoner = HttpReasoner::new(config(endpoint)).unwrap();
        let err = reasoner.health().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let reasoner = HttpReasoner::new(config(format!("http://{}", addr))).unwrap();
        let err = reasoner.complete("sys", &[]).await.unwrap_err();
        assert!(err.is_transient());
    }
}
