//! Structured completion with bounded retry.
//!
//! One generic routine asks the reasoning service for a JSON object of a
//! given shape and retries malformed, failed or timed-out replies a fixed
//! number of times. Callers map [`StructuredOutcome::Unparseable`] to their
//! own fallback.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use kai_core::{KaiError, ReasoningConfig, ReasoningService, Result, TurnMessage};

/// A reply shape the model is asked to produce.
pub trait StructuredReply: DeserializeOwned {
    /// Semantic checks beyond deserialization. An `Err` counts as malformed.
    fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Attempt budget and per-call deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            call_timeout,
        }
    }

    pub fn from_config(config: &ReasoningConfig) -> Self {
        Self::new(config.max_retries, config.call_timeout())
    }
}

/// Result of [`complete_structured`].
#[derive(Debug)]
pub enum StructuredOutcome<T> {
    Parsed { value: T, attempts: u32 },
    Unparseable { attempts: u32, last_error: KaiError },
}

impl<T> StructuredOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Parsed { attempts, .. } | Self::Unparseable { attempts, .. } => *attempts,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Parsed { value, .. } => Some(value),
            Self::Unparseable { .. } => None,
        }
    }
}

/// First balanced `{...}` in `text`, skipping braces inside JSON strings.
///
/// Tolerates markdown fences and prose around the object.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&text[start..]) {
            return Some(&text[start..start + end]);
        }
        search_from = start + 1;
    }
    None
}

/// Byte length of the balanced object starting at `s[0] == '{'`.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse one reply into `T`.
pub fn parse_reply<T: StructuredReply>(reply: &str) -> Result<T> {
    let json = extract_json_object(reply)
        .ok_or_else(|| KaiError::malformed("no JSON object in reply"))?;
    let value: T = serde_json::from_str(json).map_err(|e| KaiError::malformed(e.to_string()))?;
    value.check().map_err(KaiError::malformed)?;
    Ok(value)
}

/// Ask for a `T`, retrying up to `policy.max_attempts` times.
///
/// Every attempt sends the same request. Transport errors, timeouts and
/// malformed replies each consume one attempt.
pub async fn complete_structured<T: StructuredReply>(
    service: &dyn ReasoningService,
    system_prompt: &str,
    messages: &[TurnMessage],
    policy: RetryPolicy,
) -> StructuredOutcome<T> {
    let millis = policy.call_timeout.as_millis() as u64;
    let mut last_error = KaiError::internal("no attempt made");

    for attempt in 1..=policy.max_attempts {
        let reply = tokio::time::timeout(policy.call_timeout, service.complete(system_prompt, messages))
            .await
            .map_err(|_| KaiError::timeout(format!("{} completion", service.name()), millis))
            .and_then(|r| r);

        match reply.and_then(|text| parse_reply::<T>(&text)) {
            Ok(value) => {
                debug!("Structured reply parsed on attempt {}", attempt);
                return StructuredOutcome::Parsed {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) => {
                warn!(
                    "Structured completion attempt {}/{} failed: {}",
                    attempt, policy.max_attempts, e
                );
                last_error = e;
            }
        }
    }

    StructuredOutcome::Unparseable {
        attempts: policy.max_attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_reason::{MockReasoner, MockReply};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        reasoning: String,
        score: f32,
    }

    impl StructuredReply for Verdict {
        fn check(&self) -> std::result::Result<(), String> {
            if (0.0..=1.0).contains(&self.score) {
                Ok(())
            } else {
                Err(format!("score {} out of range", self.score))
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(200))
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object(r#"{"a":1}"#), Some(r#"{"a":1}"#));
        assert_eq!(
            extract_json_object("Here you go:\n```json\n{\"a\": {\"b\": 2}}\n```\nDone"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(
            extract_json_object(r#"{"text": "brace } inside \" quote"}"#),
            Some(r#"{"text": "brace } inside \" quote"}"#)
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{ unbalanced"), None);
    }

    #[test]
    fn test_parse_reply_errors_are_malformed() {
        let missing = parse_reply::<Verdict>(r#"{"reasoning": "x"}"#).unwrap_err();
        assert_eq!(missing.error_code(), "MALFORMED_OUTPUT");
        let range = parse_reply::<Verdict>(r#"{"reasoning": "x", "score": 3}"#).unwrap_err();
        assert!(range.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn test_parsed_after_retries() {
        let mock = MockReasoner::new(vec![
            MockReply::text("not json"),
            MockReply::Error("connection reset".into()),
            MockReply::text(r#"```json {"reasoning": "ok", "score": 0.9} ```"#),
        ]);
        let outcome = complete_structured::<Verdict>(&mock, "sys", &[], policy()).await;
        assert_eq!(outcome.attempts(), 3);
        let value = outcome.into_value().unwrap();
        assert_eq!(value.score, 0.9);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_after_budget() {
        let mock = MockReasoner::always(MockReply::text("{}"));
        let outcome = complete_structured::<Verdict>(&mock, "sys", &[], policy()).await;
        match outcome {
            StructuredOutcome::Unparseable { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.error_code(), "MALFORMED_OUTPUT");
            }
            other => panic!("expected unparseable, got {:?}", other),
        }
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_hanging_service_times_out() {
        let mock = MockReasoner::always(MockReply::Hang);
        let outcome =
            complete_structured::<Verdict>(&mock, "sys", &[], RetryPolicy::new(2, Duration::from_millis(20))).await;
        match outcome {
            StructuredOutcome::Unparseable { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error.error_code(), "TIMEOUT");
            }
            other => panic!("expected unparseable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_request_every_attempt() {
        let mock = MockReasoner::always(MockReply::text("nope"));
        let messages = vec![TurnMessage::user("питання")];
        let _ = complete_structured::<Verdict>(&mock, "sys", &messages, policy()).await;
        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.messages == messages && r.system_prompt == "sys"));
    }
}
