//! Completion client: refusal-aware generation with bounded retry,
//! temperature decay, and premium escalation, plus reaction classification.

use crate::config::CompletionConfig;
pub use crate::error::CompletionError;
use crate::text;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default sampling temperature for generation calls.
pub const DEFAULT_TEMPERATURE: f64 = 0.1777;

/// Temperature drop applied after each refusal.
const TEMPERATURE_DECREMENT: f64 = 0.05;

/// Generation stops retrying once temperature falls below this floor.
const MIN_TEMPERATURE: f64 = 0.05;

/// Maximum backend invocations per generation call.
const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Maximum backend invocations per reaction classification.
const MAX_REACTION_ATTEMPTS: u32 = 3;

/// Reaction classification starting temperature and per-retry increase.
const REACTION_TEMPERATURE: f64 = 0.7;
const REACTION_TEMPERATURE_STEP: f64 = 0.1;

/// Returned when the backend never produced any text at all.
const TRANSPORT_APOLOGY: &str = "I'm sorry, I couldn't process your request at this time.";

/// The two logical completion backends.
///
/// Escalation from standard to premium happens inside the retry loop; the
/// selector travels through it explicitly rather than living on a shared
/// client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Standard,
    Premium,
}

/// Role of a chat message on the completion wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Metadata attached to generation requests for upstream request logging.
#[derive(Debug, Clone, Serialize)]
pub struct RequestTags {
    pub user_id: String,
    pub channel_id: String,
    pub server_id: String,
    pub interaction_type: &'static str,
    pub prompt_id: &'static str,
}

/// A single completion invocation.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub tags: Option<RequestTags>,
}

/// Transport boundary to the completion service.
///
/// Implementations select the concrete model and credentials for each
/// backend; tests substitute a scripted stub.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(
        &self,
        backend: Backend,
        request: CompletionRequest,
    ) -> Result<String, CompletionError>;
}

/// Completion client wrapping the two backends behind a uniform call.
pub struct CompletionClient {
    transport: Arc<dyn CompletionTransport>,
}

impl CompletionClient {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self { transport }
    }

    /// Generate a reply for the given context.
    ///
    /// Up to three attempts. A refusal lowers the temperature by 0.05 and,
    /// when still on the standard backend, escalates to premium for the
    /// remaining attempts. Never fails loudly: exhausted retries return the
    /// last non-empty response (refusal or not), and a transport failure
    /// with nothing banked returns a fixed apology.
    pub async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        tags: RequestTags,
        initial_temperature: f64,
        use_premium: bool,
    ) -> String {
        let mut backend = if use_premium { Backend::Premium } else { Backend::Standard };
        let mut temperature = initial_temperature;
        let mut attempts = 0;
        let mut last_response: Option<String> = None;

        while attempts < MAX_GENERATION_ATTEMPTS && temperature >= MIN_TEMPERATURE {
            let request = CompletionRequest {
                messages: messages.clone(),
                temperature,
                tags: Some(tags.clone()),
            };
            match self.transport.complete(backend, request).await {
                Ok(response) => {
                    let response = response.trim().to_string();
                    last_response = Some(response.clone());
                    if !text::is_refusal(&response) {
                        return response;
                    }
                    tracing::warn!(temperature, ?backend, "refusal detected, retrying");
                    attempts += 1;
                    temperature -= TEMPERATURE_DECREMENT;
                    if backend == Backend::Standard {
                        tracing::info!("escalating to the premium backend after refusal");
                        backend = Backend::Premium;
                    }
                }
                Err(error) => {
                    tracing::error!(%error, "completion transport error");
                    break;
                }
            }
        }

        match last_response {
            Some(response) if !response.is_empty() => {
                tracing::warn!("retries exhausted, returning the last response");
                response
            }
            _ => TRANSPORT_APOLOGY.to_string(),
        }
    }

    /// Classify a single emoji reaction for a message.
    ///
    /// Up to three attempts with rising temperature. A candidate is accepted
    /// only when it looks like a bare glyph; transport failures and
    /// exhausted retries yield `None`.
    pub async fn classify_reaction(&self, messages: Vec<ChatMessage>) -> Option<String> {
        let mut temperature = REACTION_TEMPERATURE;
        let mut attempts = 0;

        while attempts < MAX_REACTION_ATTEMPTS {
            let request = CompletionRequest {
                messages: messages.clone(),
                temperature,
                tags: None,
            };
            match self.transport.complete(Backend::Standard, request).await {
                Ok(response) => {
                    let response = response.trim().to_string();
                    if text::is_reaction_glyph(&response) {
                        return Some(response);
                    }
                    tracing::warn!(candidate = %response, "invalid reaction candidate, retrying");
                    attempts += 1;
                    temperature += REACTION_TEMPERATURE_STEP;
                }
                Err(error) => {
                    tracing::error!(%error, "reaction transport error");
                    return None;
                }
            }
        }

        tracing::warn!("no valid reaction obtained after retries");
        None
    }
}

/// HTTP transport against the OpenPipe chat-completions endpoint.
pub struct OpenPipeTransport {
    http: reqwest::Client,
    config: CompletionConfig,
}

impl OpenPipeTransport {
    pub fn new(config: CompletionConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    openpipe: Option<WireOpenPipe<'a>>,
}

#[derive(Serialize)]
struct WireOpenPipe<'a> {
    tags: &'a RequestTags,
    log_request: bool,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

#[async_trait]
impl CompletionTransport for OpenPipeTransport {
    async fn complete(
        &self,
        backend: Backend,
        request: CompletionRequest,
    ) -> Result<String, CompletionError> {
        let (api_key, model) = match backend {
            Backend::Standard => (&self.config.standard_api_key, &self.config.standard_model),
            Backend::Premium => (&self.config.premium_api_key, &self.config.premium_model),
        };

        let body = WireRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            openpipe: request
                .tags
                .as_ref()
                .map(|tags| WireOpenPipe { tags, log_request: true }),
        };

        let response = self
            .http
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: WireResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CompletionError::MalformedResponse("response carried no choices".into()))?;

        Ok(choice.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StubTransport {
        responses: Mutex<Vec<Result<String, CompletionError>>>,
        calls: Mutex<Vec<(Backend, f64)>>,
    }

    impl StubTransport {
        fn new(responses: Vec<Result<String, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Backend, f64)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CompletionTransport for StubTransport {
        async fn complete(
            &self,
            backend: Backend,
            request: CompletionRequest,
        ) -> Result<String, CompletionError> {
            self.calls.lock().push((backend, request.temperature));
            let mut responses = self.responses.lock();
            assert!(!responses.is_empty(), "stub exhausted");
            responses.remove(0)
        }
    }

    fn tags() -> RequestTags {
        RequestTags {
            user_id: "1".into(),
            channel_id: "2".into(),
            server_id: "3".into(),
            interaction_type: "trigger_chat",
            prompt_id: "sydney_v1.0",
        }
    }

    fn refusal() -> Result<String, CompletionError> {
        Ok("I'm sorry, I won't do that.".to_string())
    }

    fn transport_error() -> Result<String, CompletionError> {
        Err(CompletionError::MalformedResponse("boom".into()))
    }

    fn assert_temperature(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected temperature {expected}, got {actual}"
        );
    }

    #[tokio::test]
    async fn test_persistent_refusal_escalates_and_returns_last_response() {
        let transport = StubTransport::new(vec![refusal(), refusal(), refusal()]);
        let client = CompletionClient::new(transport.clone());

        let response = client
            .generate(vec![ChatMessage::user("hi")], tags(), DEFAULT_TEMPERATURE, false)
            .await;

        assert_eq!(response, "I'm sorry, I won't do that.");
        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, Backend::Standard);
        assert_eq!(calls[1].0, Backend::Premium);
        assert_eq!(calls[2].0, Backend::Premium);
        assert_temperature(calls[0].1, 0.1777);
        assert_temperature(calls[1].1, 0.1277);
        assert_temperature(calls[2].1, 0.0777);
    }

    #[tokio::test]
    async fn test_non_refusal_returns_after_single_call() {
        let transport = StubTransport::new(vec![Ok("hello there".to_string())]);
        let client = CompletionClient::new(transport.clone());

        let response = client
            .generate(vec![ChatMessage::user("hi")], tags(), DEFAULT_TEMPERATURE, false)
            .await;

        assert_eq!(response, "hello there");
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_temperature_floor_stops_retries_early() {
        let transport = StubTransport::new(vec![refusal(), refusal()]);
        let client = CompletionClient::new(transport.clone());

        let response = client
            .generate(vec![ChatMessage::user("hi")], tags(), 0.12, false)
            .await;

        // 0.12 → 0.07 → 0.02, which is below the floor, so only two calls.
        assert_eq!(response, "I'm sorry, I won't do that.");
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_temperature(calls[0].1, 0.12);
        assert_temperature(calls[1].1, 0.07);
    }

    #[tokio::test]
    async fn test_premium_start_never_switches_backend() {
        let transport = StubTransport::new(vec![refusal(), refusal(), refusal()]);
        let client = CompletionClient::new(transport.clone());

        client
            .generate(vec![ChatMessage::user("hi")], tags(), DEFAULT_TEMPERATURE, true)
            .await;

        assert!(transport.calls().iter().all(|(backend, _)| *backend == Backend::Premium));
    }

    #[tokio::test]
    async fn test_transport_failure_with_no_response_returns_apology() {
        let transport = StubTransport::new(vec![transport_error()]);
        let client = CompletionClient::new(transport.clone());

        let response = client
            .generate(vec![ChatMessage::user("hi")], tags(), DEFAULT_TEMPERATURE, false)
            .await;

        assert_eq!(response, TRANSPORT_APOLOGY);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_after_refusal_returns_banked_response() {
        let transport = StubTransport::new(vec![refusal(), transport_error()]);
        let client = CompletionClient::new(transport.clone());

        let response = client
            .generate(vec![ChatMessage::user("hi")], tags(), DEFAULT_TEMPERATURE, false)
            .await;

        assert_eq!(response, "I'm sorry, I won't do that.");
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_reaction_glyph_accepted_immediately() {
        let transport = StubTransport::new(vec![Ok("!!".to_string())]);
        let client = CompletionClient::new(transport.clone());

        let reaction = client
            .classify_reaction(vec![ChatMessage::user("great news")])
            .await;

        assert_eq!(reaction.as_deref(), Some("!!"));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_prose_reaction_retries_with_rising_temperature_then_none() {
        let transport = StubTransport::new(vec![
            Ok("ok".to_string()),
            Ok("ok".to_string()),
            Ok("ok".to_string()),
        ]);
        let client = CompletionClient::new(transport.clone());

        let reaction = client
            .classify_reaction(vec![ChatMessage::user("great news")])
            .await;

        assert_eq!(reaction, None);
        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_temperature(calls[0].1, 0.7);
        assert_temperature(calls[1].1, 0.8);
        assert_temperature(calls[2].1, 0.9);
        assert!(calls.iter().all(|(backend, _)| *backend == Backend::Standard));
    }

    #[tokio::test]
    async fn test_reaction_transport_failure_returns_none_immediately() {
        let transport = StubTransport::new(vec![transport_error()]);
        let client = CompletionClient::new(transport.clone());

        let reaction = client
            .classify_reaction(vec![ChatMessage::user("great news")])
            .await;

        assert_eq!(reaction, None);
        assert_eq!(transport.calls().len(), 1);
    }
}
