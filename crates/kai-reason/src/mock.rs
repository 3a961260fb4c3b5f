//! Scripted reasoning service for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use kai_core::{KaiError, ReasoningService, Result, TurnMessage};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Fail with a transport error.
    Error(String),
    /// Reply after a delay.
    Delayed(Duration, String),
    /// Never reply.
    Hang,
}

impl MockReply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Serialize a JSON value as the reply body.
    pub fn json(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

/// A recorded request.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub system_prompt: String,
    pub messages: Vec<TurnMessage>,
}

/// Replies come from a FIFO script; once it is empty the fallback reply is
/// used, or an error when there is none.
pub struct MockReasoner {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<MockReply>,
    requests: Mutex<Vec<MockRequest>>,
    down: bool,
}

impl MockReasoner {
    pub fn new(script: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            down: false,
        }
    }

    /// Every call answers with `reply`.
    pub fn always(reply: MockReply) -> Self {
        Self::new(Vec::new()).with_fallback(reply)
    }

    /// Every call fails as if the service were down.
    pub fn unavailable() -> Self {
        let mut mock = Self::always(MockReply::Error("connection refused".to_string()));
        mock.down = true;
        mock
    }

    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Append to the script.
    pub fn push(&self, reply: MockReply) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ReasoningService for MockReasoner {
    async fn complete(&self, system_prompt: &str, messages: &[TurnMessage]) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockRequest {
                system_prompt: system_prompt.to_string(),
                messages: messages.to_vec(),
            });

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .or_else(|| self.fallback.clone());

        match next {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Error(message)) => Err(KaiError::reasoning(message)),
            Some(MockReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(KaiError::reasoning("mock script exhausted")),
        }
    }

    async fn health(&self) -> Result<()> {
        if self.down {
            return Err(KaiError::reasoning("connection refused"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockReasoner::new(vec![MockReply::text("one"), MockReply::Error("boom".into())])
            .with_fallback(MockReply::text("again"));
        assert_eq!(mock.complete("s", &[]).await.unwrap(), "one");
        assert!(mock.complete("s", &[]).await.is_err());
        assert_eq!(mock.complete("s", &[]).await.unwrap(), "again");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_health_follows_availability() {
        assert!(MockReasoner::unavailable().health().await.is_err());
        assert!(MockReasoner::always(MockReply::Hang).health().await.is_ok());
        assert_eq!(MockReasoner::unavailable().calls(), 0);
    }

    #[tokio::test]
    async fn test_records_requests() {
        let mock = MockReasoner::always(MockReply::json(serde_json::json!({"a": 1})));
        let reply = mock
            .complete("route", &[TurnMessage::user("Хто декан?")])
            .await
            .unwrap();
        assert_eq!(reply, r#"{"a":1}"#);
        let reqs = mock.requests();
        assert_eq!(reqs[0].system_prompt, "route");
        assert_eq!(reqs[0].messages[0].content, "Хто декан?");
    }

    #[tokio::test]
    async fn test_unavailable() {
        let mock = MockReasoner::unavailable();
        let err = mock.complete("s", &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "REASONING_ERROR");
    }

    #[tokio::test]
    async fn test_empty_script_errors() {
        let mock = MockReasoner::new(Vec::new());
        assert!(mock.complete("s", &[]).await.is_err());
        mock.push(MockReply::text("late"));
        assert_eq!(mock.complete("s", &[]).await.unwrap(), "late");
    }
}
