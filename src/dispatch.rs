//! Dispatch bridge
//!
//! Sends a transcript to the command endpoint and normalizes whatever comes
//! back into a [`DispatchOutcome`]. No retries.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::voice::Tone;

/// Spoken when a non-2xx response carries no usable error text
pub const PROCESSING_ERROR: &str = "Error processing your command.";

/// Spoken when the endpoint cannot be reached or answers garbage
pub const COMMUNICATION_ERROR: &str = "Error communicating with the server.";

/// Status for a successful action without speech
pub const SUCCESS_STATUS: &str = "Command executed successfully.";

/// Status for an unsuccessful action without speech
pub const FAILURE_STATUS: &str = "Sorry, I couldn't understand that.";

/// Remote `response_type` marking a completed action
const ACTION_DONE: &str = "action_done";

/// Normalized result of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The action was carried out; speech may be empty
    Success(String),
    /// Well-formed but unsuccessful remote outcome; speech may be empty
    Failure(String),
    /// The endpoint refused the command with error text, which is spoken
    Rejected(String),
    /// The endpoint could not be reached or gave an unusable answer
    NetworkError(String),
}

impl DispatchOutcome {
    /// Text to speak back, empty for none
    #[must_use]
    pub fn speech_text(&self) -> &str {
        match self {
            Self::Success(s) | Self::Failure(s) | Self::Rejected(s) | Self::NetworkError(s) => s,
        }
    }

    /// Cue played once the response is done
    #[must_use]
    pub const fn cue(&self) -> Tone {
        match self {
            Self::Success(_) => Tone::Success,
            Self::Failure(_) | Self::Rejected(_) | Self::NetworkError(_) => Tone::Error,
        }
    }

    /// Status line shown for this outcome
    #[must_use]
    pub fn status_message(&self) -> &str {
        match self {
            Self::Success(s) if s.is_empty() => SUCCESS_STATUS,
            Self::Failure(s) if s.is_empty() => FAILURE_STATUS,
            Self::Rejected(_) => PROCESSING_ERROR,
            Self::Success(s) | Self::Failure(s) | Self::NetworkError(s) => s,
        }
    }
}

/// Sends transcripts somewhere that acts on them
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Dispatch one transcript; never fails, errors become outcomes
    async fn dispatch(&self, text: &str) -> DispatchOutcome;
}

#[derive(Deserialize)]
struct CommandResponse {
    response: Option<ResponseBody>,
}

#[derive(Deserialize)]
struct ResponseBody {
    response_type: Option<String>,
    speech: Option<Speech>,
}

#[derive(Deserialize)]
struct Speech {
    plain: Option<PlainSpeech>,
}

#[derive(Deserialize)]
struct PlainSpeech {
    speech: Option<String>,
}

/// Map an endpoint reply to an outcome
#[must_use]
pub fn classify(status: StatusCode, body: &[u8]) -> DispatchOutcome {
    if !status.is_success() {
        let error = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(error_text));
        return match error {
            Some(text) => DispatchOutcome::Rejected(text),
            None => DispatchOutcome::NetworkError(PROCESSING_ERROR.to_string()),
        };
    }

    let Ok(parsed) = serde_json::from_slice::<CommandResponse>(body) else {
        return DispatchOutcome::NetworkError(COMMUNICATION_ERROR.to_string());
    };

    let response = parsed.response;
    let speech = response
        .as_ref()
        .and_then(|r| r.speech.as_ref())
        .and_then(|s| s.plain.as_ref())
        .and_then(|p| p.speech.clone())
        .unwrap_or_default();

    let done = response
        .as_ref()
        .and_then(|r| r.response_type.as_deref())
        == Some(ACTION_DONE);

    if done {
        DispatchOutcome::Success(speech)
    } else {
        DispatchOutcome::Failure(speech)
    }
}

/// Error text from an `{ error }` envelope: a string, or a wrapped upstream
/// body's `message` or `error`
fn error_text(error: &Value) -> Option<String> {
    match error {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => ["message", "error"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .map(str::to_owned),
        _ => None,
    }
}

/// Posts transcripts to the relay's command endpoint
pub struct DispatchBridge {
    client: reqwest::Client,
    endpoint: String,
}

impl DispatchBridge {
    /// Create a bridge for the relay at `base_url`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self::with_endpoint(format!("{}/api/home-assistant", base_url.trim_end_matches('/')))
    }

    /// Create a bridge posting to `endpoint` verbatim
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// The URL commands are posted to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommandDispatcher for DispatchBridge {
    async fn dispatch(&self, text: &str) -> DispatchOutcome {
        tracing::debug!(endpoint = %self.endpoint, "dispatching command");

        let response = match self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "command endpoint unreachable");
                return DispatchOutcome::NetworkError(COMMUNICATION_ERROR.to_string());
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to read command response");
                return DispatchOutcome::NetworkError(COMMUNICATION_ERROR.to_string());
            }
        };

        let outcome = classify(status, &body);
        tracing::info!(status = %status, ?outcome, "command dispatched");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_done_is_success() {
        let body = br#"{"response":{"response_type":"action_done",
            "speech":{"plain":{"speech":"Lights on"}}}}"#;
        let outcome = classify(StatusCode::OK, body);
        assert_eq!(outcome, DispatchOutcome::Success("Lights on".into()));
        assert_eq!(outcome.cue(), Tone::Success);
    }

    #[test]
    fn test_error_envelope_carries_message() {
        let outcome = classify(StatusCode::INTERNAL_SERVER_ERROR, br#"{"error":"boom"}"#);
        assert_eq!(outcome, DispatchOutcome::Rejected("boom".into()));
        assert_eq!(outcome.speech_text(), "boom");
        assert_eq!(outcome.status_message(), PROCESSING_ERROR);
        assert_eq!(outcome.cue(), Tone::Error);
    }

    #[test]
    fn test_wrapped_upstream_error_object() {
        let body = br#"{"error":{"message":"Invalid token"}}"#;
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, body),
            DispatchOutcome::Rejected("Invalid token".into())
        );

        let body = br#"{"error":{"error":"boom"}}"#;
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, body),
            DispatchOutcome::Rejected("boom".into())
        );
    }

    #[test]
    fn test_non_2xx_without_error_text() {
        for body in [
            &b"not json"[..],
            &br#"{"detail":"x"}"#[..],
            &br#"{"error":{}}"#[..],
        ] {
            assert_eq!(
                classify(StatusCode::BAD_GATEWAY, body),
                DispatchOutcome::NetworkError(PROCESSING_ERROR.into())
            );
        }
    }

    #[test]
    fn test_other_response_type_is_failure() {
        let body = br#"{"response":{"response_type":"error",
            "speech":{"plain":{"speech":"Sorry"}}}}"#;
        assert_eq!(
            classify(StatusCode::OK, body),
            DispatchOutcome::Failure("Sorry".into())
        );

        let outcome = classify(StatusCode::OK, br#"{"response":{"response_type":"query_answer"}}"#);
        assert_eq!(outcome, DispatchOutcome::Failure(String::new()));
        assert_eq!(outcome.status_message(), FAILURE_STATUS);
    }

    #[test]
    fn test_malformed_success_body() {
        assert_eq!(
            classify(StatusCode::OK, b"<html>"),
            DispatchOutcome::NetworkError(COMMUNICATION_ERROR.into())
        );
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(DispatchOutcome::Success(String::new()).status_message(), SUCCESS_STATUS);
        assert_eq!(DispatchOutcome::Success("Done".into()).status_message(), "Done");
    }

    #[test]
    fn test_bridge_invalid_endpoint_is_communication_error() {
        let bridge = DispatchBridge::with_endpoint("not a url");
        assert_eq!(
            tokio_test::block_on(bridge.dispatch("lights on")),
            DispatchOutcome::NetworkError(COMMUNICATION_ERROR.into())
        );
    }

    #[test]
    fn test_bridge_endpoint() {
        let bridge = DispatchBridge::new("http://127.0.0.1:3000/");
        assert_eq!(bridge.endpoint(), "http://127.0.0.1:3000/api/home-assistant");
    }
}
