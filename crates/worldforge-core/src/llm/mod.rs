//! LLM client: plain and schema-strict structured completions.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint (OpenRouter in
//! production). Every call is gated by the shared LLM permit, guarded by a
//! circuit breaker, priced from reported token usage, and recorded in the
//! API audit log. Retrying is the activity layer's job, not the client's.

pub mod pricing;
pub mod schema;
pub mod template;

use std::sync::Arc;
use std::time::Instant;

use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::LlmError;
use crate::net::breaker::CircuitBreaker;
use crate::schemas::ResponseSchema;
use crate::storage::models::{ApiRequestHistory, ApiType};
use crate::storage::Storage;

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    pub input_tokens: u32,
    /// Number of tokens in the completion.
    pub output_tokens: u32,
}

/// Result of a plain text completion.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub text: String,
    pub finish_reason: String,
    pub model: String,
    pub usage: TokenUsage,
    /// Estimated spend for this call, USD.
    pub cost: f64,
}

/// Result of a structured completion: the parsed, schema-validated value.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    pub value: Value,
    pub model: String,
    pub usage: TokenUsage,
    /// Estimated spend for this call, USD.
    pub cost: f64,
}

/// Parameters for one completion call.
#[derive(Debug, Clone, Copy)]
pub struct LlmCall<'a> {
    pub prompt: &'a str,
    /// `None` uses the configured default model.
    pub model: Option<&'a str>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Originating task, for the audit trail.
    pub task_id: &'a str,
    pub world_id: &'a str,
}

/// Client for the chat-completions API.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    permits: Arc<Semaphore>,
    storage: Option<Storage>,
    content_breaker: CircuitBreaker,
    structured_breaker: CircuitBreaker,
}

impl LlmClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        permits: Arc<Semaphore>,
        storage: Option<Storage>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            permits,
            storage,
            content_breaker: CircuitBreaker::standard("llm_content"),
            structured_breaker: CircuitBreaker::standard("llm_structured"),
        }
    }

    /// Plain text completion.
    pub async fn generate_content(&self, call: LlmCall<'_>) -> Result<GeneratedText, LlmError> {
        let _permit = self.permit().await;
        let model = call.model.unwrap_or(&self.default_model).to_string();
        let started = Instant::now();

        tracing::debug!(
            model = %model,
            max_tokens = call.max_output_tokens,
            task_id = call.task_id,
            "LLM request",
        );

        let result = self
            .content_breaker
            .call(|| self.complete(&model, call, None))
            .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let request_data = doc! {
            "prompt": call.prompt,
            "model": &model,
            "temperature": f64::from(call.temperature),
            "max_output_tokens": i64::from(call.max_output_tokens),
        };

        let outcome = result.and_then(|raw| extract_text(raw, &model));
        match outcome {
            Ok(output) => {
                self.audit(
                    &call,
                    "generate_content",
                    request_data,
                    Some(doc! {
                        "text": &output.text,
                        "model": &output.model,
                        "finish_reason": &output.finish_reason,
                    }),
                    None,
                    duration_ms,
                )
                .await;
                tracing::debug!(
                    input_tokens = output.usage.input_tokens,
                    output_tokens = output.usage.output_tokens,
                    duration_ms,
                    "LLM response",
                );
                Ok(output)
            }
            Err(err) => {
                self.audit(
                    &call,
                    "generate_content",
                    request_data,
                    None,
                    Some(err.to_string()),
                    duration_ms,
                )
                .await;
                Err(err)
            }
        }
    }

    /// Structured completion validated against a registered schema.
    ///
    /// `schema_name` is the symbolic name from [`ResponseSchema`]; workflow
    /// code passes strings so it never depends on concrete schema types.
    pub async fn generate_structured(
        &self,
        call: LlmCall<'_>,
        schema_name: &str,
    ) -> Result<StructuredOutput, LlmError> {
        let schema = ResponseSchema::from_name(schema_name)
            .ok_or_else(|| LlmError::UnknownSchema(schema_name.to_string()))?;

        let _permit = self.permit().await;
        let model = call.model.unwrap_or(&self.default_model).to_string();
        let started = Instant::now();

        tracing::debug!(
            model = %model,
            schema = schema_name,
            max_tokens = call.max_output_tokens,
            task_id = call.task_id,
            "structured LLM request",
        );

        let result = self
            .structured_breaker
            .call(|| self.complete(&model, call, Some(schema)))
            .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let request_data = doc! {
            "prompt": call.prompt,
            "model": &model,
            "temperature": f64::from(call.temperature),
            "max_output_tokens": i64::from(call.max_output_tokens),
            "response_schema": schema_name,
        };

        let outcome = match result {
            Ok(raw) => parse_structured(raw, &model, schema, schema_name),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(output) => {
                self.audit(
                    &call,
                    "generate_structured_content",
                    request_data,
                    Some(doc! {
                        "model": &output.model,
                        "structured_data": output.value.to_string(),
                    }),
                    None,
                    duration_ms,
                )
                .await;
                tracing::debug!(
                    schema = schema_name,
                    input_tokens = output.usage.input_tokens,
                    output_tokens = output.usage.output_tokens,
                    duration_ms,
                    "structured LLM response",
                );
                Ok(output)
            }
            Err(err) => {
                self.audit(
                    &call,
                    "generate_structured_content",
                    request_data,
                    None,
                    Some(err.to_string()),
                    duration_ms,
                )
                .await;
                Err(err)
            }
        }
    }

    async fn complete(
        &self,
        model: &str,
        call: LlmCall<'_>,
        schema: Option<ResponseSchema>,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let response_format = schema.map(|schema| ResponseFormat {
            kind: "json_schema",
            json_schema: JsonSchemaFormat {
                name: "response",
                strict: true,
                schema: schema.normalized_schema().clone(),
            },
        });

        let request = ChatCompletionRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: call.prompt,
            }],
            temperature: call.temperature,
            max_tokens: call.max_output_tokens,
            response_format,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("invalid completion payload: {e}")))
    }

    async fn permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("LLM permit semaphore closed")
    }

    async fn audit(
        &self,
        call: &LlmCall<'_>,
        request_type: &str,
        request_data: mongodb::bson::Document,
        response_data: Option<mongodb::bson::Document>,
        error: Option<String>,
        duration_ms: i64,
    ) {
        let Some(storage) = &self.storage else { return };
        let mut entry = ApiRequestHistory::new(
            ApiType::Llm,
            call.task_id,
            call.world_id,
            request_type,
            request_data,
        );
        entry.response_data = response_data;
        entry.error = error;
        entry.duration_ms = duration_ms;
        storage.log_api_request(entry).await;
    }
}

fn extract_text(response: ChatCompletionResponse, fallback_model: &str) -> Result<GeneratedText, LlmError> {
    let model = effective_model(&response, fallback_model);
    let usage = usage_of(&response);
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::MissingField { field: "choices[0]" })?;
    let finish_reason = choice
        .finish_reason
        .unwrap_or_else(|| "unknown".to_string());
    let text = choice
        .message
        .and_then(|m| m.content)
        .ok_or(LlmError::MissingField {
            field: "choices[0].message.content",
        })?;
    let cost = pricing::lookup(&model).compute_cost(usage.input_tokens, usage.output_tokens);
    Ok(GeneratedText {
        text,
        finish_reason,
        model,
        usage,
        cost,
    })
}

fn parse_structured(
    response: ChatCompletionResponse,
    fallback_model: &str,
    schema: ResponseSchema,
    schema_name: &str,
) -> Result<StructuredOutput, LlmError> {
    let output = extract_text(response, fallback_model)?;
    let value: Value = serde_json::from_str(&output.text)
        .map_err(|e| LlmError::Parse(format!("content is not valid JSON: {e}")))?;
    schema.validate(&value).map_err(|message| LlmError::Validation {
        schema: schema_name.to_string(),
        message,
    })?;
    Ok(StructuredOutput {
        value,
        model: output.model,
        usage: output.usage,
        cost: output.cost,
    })
}

fn effective_model(response: &ChatCompletionResponse, fallback: &str) -> String {
    if response.model.is_empty() {
        fallback.to_string()
    } else {
        response.model.clone()
    }
}

fn usage_of(response: &ChatCompletionResponse) -> TokenUsage {
    response.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
        input_tokens: u.prompt_tokens.unwrap_or(0),
        output_tokens: u.completion_tokens.unwrap_or(0),
    })
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Clone, Copy)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlmClient {
        LlmClient::new(
            reqwest::Client::new(),
            server.uri(),
            "test-key",
            "google/gemini-flash-1.5-8b",
            Arc::new(Semaphore::new(4)),
            None,
        )
    }

    fn call() -> LlmCall<'static> {
        LlmCall {
            prompt: "describe a world",
            model: None,
            temperature: 0.8,
            max_output_tokens: 1024,
            task_id: "task-1",
            world_id: "world-1",
        }
    }

    #[tokio::test]
    async fn generate_content_success() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "choices": [{"message": {"content": "Hello world"}, "finish_reason": "stop"}],
            "model": "google/gemini-flash-1.5-8b",
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let output = client_for(&server)
            .generate_content(call())
            .await
            .expect("complete");
        assert_eq!(output.text, "Hello world");
        assert_eq!(output.finish_reason, "stop");
        assert_eq!(output.usage.input_tokens, 12);
        assert!(output.cost > 0.0);
    }

    #[tokio::test]
    async fn structured_request_carries_strict_schema() {
        let server = MockServer::start().await;
        let content = serde_json::json!({"prompt": "a portrait of a fog-sailor"}).to_string();
        let body = serde_json::json!({
            "choices": [{"message": {"content": content}}],
            "model": "google/gemini-flash-1.5-8b"
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {"name": "response", "strict": true}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let output = client_for(&server)
            .generate_structured(call(), "PostImagePromptResponse")
            .await
            .expect("structured");
        assert_eq!(output.value["prompt"], "a portrait of a fog-sailor");
    }

    #[tokio::test]
    async fn structured_rejects_non_json_content() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "choices": [{"message": {"content": "not json at all"}}],
            "model": "m"
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_structured(call(), "PostImagePromptResponse")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)), "got: {err}");
    }

    #[tokio::test]
    async fn structured_rejects_schema_mismatch() {
        let server = MockServer::start().await;
        let content = serde_json::json!({"wrong_field": 1}).to_string();
        let body = serde_json::json!({
            "choices": [{"message": {"content": content}}],
            "model": "m"
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_structured(call(), "PostImagePromptResponse")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Validation { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn unknown_schema_fails_without_a_request() {
        let server = MockServer::start().await;
        // No mock mounted: a request would 404 and fail differently.
        let err = client_for(&server)
            .generate_structured(call(), "NotARealResponse")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::UnknownSchema(_)));
    }

    #[tokio::test]
    async fn error_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .append_header("retry-after", "30")
                    .set_body_string("rate limited"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).generate_content(call()).await.unwrap_err();
        match err {
            LlmError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 30),
            other => panic!("expected RateLimited, got: {other}"),
        }
    }

    #[tokio::test]
    async fn error_500_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let err = client_for(&server).generate_content(call()).await.unwrap_err();
        match err {
            LlmError::Api { status, .. } => assert_eq!(status, 500),
            other => panic!("expected Api, got: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_a_missing_field() {
        let server = MockServer::start().await;
        let body = serde_json::json!({"choices": [], "model": "m"});
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let err = client_for(&server).generate_content(call()).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingField { field: "choices[0]" }));
    }

    #[tokio::test]
    async fn repeated_failures_open_the_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server);
        for _ in 0..3 {
            let _ = client.generate_content(call()).await;
        }
        let err = client.generate_content(call()).await.unwrap_err();
        assert!(matches!(err, LlmError::CircuitOpen(_)), "got: {err}");

        // The breaker short-circuits, so only the three real attempts hit the server.
        let requests = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r: &&Request| r.url.path() == "/chat/completions")
            .count();
        assert_eq!(requests, 3);
    }
}
