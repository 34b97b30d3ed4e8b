//! Gemini generation client with multi-model fallback.
//!
//! The fixed system instruction loads once per process; each request sends it
//! together with the assembled content parts to `generateContent`. A
//! transient failure (capacity, unavailability) falls through to the next
//! configured model immediately, with no backoff, so total latency stays
//! bounded when the caller itself sits on a reply timeout. Anything else
//! surfaces at once.

use crate::config::GeminiConfig;
use crate::error::GenerationError;
use crate::ContentUnit;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

/// Closed classification for generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    NonTransient,
}

/// Surface the mention pipeline needs from the generative model.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        units: &[ContentUnit],
    ) -> impl std::future::Future<Output = Result<String, GenerationError>> + Send;
}

/// Gemini API client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    /// Preferred model first, then the configured fallbacks, tried in order.
    models: Vec<String>,
    system_instruction_path: std::path::PathBuf,
    /// Loaded once per process; read-only afterwards. The OnceCell makes the
    /// first load single-flight across concurrent requests.
    system_instruction: OnceCell<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        let mut models = vec![config.model];
        models.extend(config.fallback_models);
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base,
            api_key: config.api_key,
            models,
            system_instruction_path: config.system_instruction_path,
            system_instruction: OnceCell::new(),
        }
    }

    async fn system_instruction(&self) -> Result<&str, GenerationError> {
        self.system_instruction
            .get_or_try_init(|| async {
                let path = &self.system_instruction_path;
                let text = tokio::fs::read_to_string(path).await.map_err(|source| {
                    GenerationError::SystemInstruction {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                tracing::info!(
                    path = %path.display(),
                    bytes = text.len(),
                    "system instruction loaded"
                );
                Ok(text.trim().to_string())
            })
            .await
            .map(String::as_str)
    }

    async fn call_model(&self, model: &str, body: &Value) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            model
        );
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|source| GenerationError::Http {
                model: model.to_string(),
                source,
            })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|source| GenerationError::Http {
                model: model.to_string(),
                source,
            })?;

        if !status.is_success() {
            return Err(GenerationError::HttpStatus {
                model: model.to_string(),
                status: status.as_u16(),
                message: api_error_message(&raw),
            });
        }

        parse_response_text(model, &raw)
    }
}

impl Generator for GeminiClient {
    async fn generate(&self, units: &[ContentUnit]) -> Result<String, GenerationError> {
        let system_instruction = self.system_instruction().await?;
        let body = build_request_body(system_instruction, units);
        run_model_chain(&self.models, |model| {
            let body = body.clone();
            async move { self.call_model(&model, &body).await }
        })
        .await
    }
}

/// Try each model in order. Transient failures fall through to the next model
/// with no delay; a non-transient failure aborts the chain. If every model
/// fails transiently, the last error surfaces.
pub(crate) async fn run_model_chain<F, Fut>(
    models: &[String],
    mut attempt: F,
) -> Result<String, GenerationError>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<String, GenerationError>>,
{
    let mut last_error = None;
    for model in models {
        match attempt(model.clone()).await {
            Ok(text) => {
                if last_error.is_some() {
                    tracing::info!(model = %model, "fallback model succeeded");
                }
                return Ok(text);
            }
            Err(error) => match classify(&error) {
                ErrorClass::NonTransient => return Err(error),
                ErrorClass::Transient => {
                    tracing::warn!(
                        model = %model,
                        %error,
                        "transient generation failure, trying next model"
                    );
                    last_error = Some(error);
                }
            },
        }
    }
    Err(last_error.unwrap_or(GenerationError::NoModels))
}

/// Classify a generation failure. Capacity and availability problems are
/// worth trying another model; everything else is a caller or payload problem
/// that a different model won't fix.
pub fn classify(error: &GenerationError) -> ErrorClass {
    match error {
        GenerationError::HttpStatus {
            status, message, ..
        } => {
            if is_capacity_status(*status) || is_capacity_message(message) {
                ErrorClass::Transient
            } else {
                ErrorClass::NonTransient
            }
        }
        GenerationError::Http { source, .. } => {
            if source.is_timeout() || source.is_connect() {
                ErrorClass::Transient
            } else {
                ErrorClass::NonTransient
            }
        }
        _ => ErrorClass::NonTransient,
    }
}

fn is_capacity_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 503 | 504)
}

fn is_capacity_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("resource_exhausted")
        || lower.contains("unavailable")
        || lower.contains("overloaded")
        || lower.contains("rate limit")
        || lower.contains("quota")
}

fn build_request_body(system_instruction: &str, units: &[ContentUnit]) -> Value {
    let parts: Vec<Value> = units
        .iter()
        .map(|unit| match unit {
            ContentUnit::Text(text) => json!({ "text": text }),
            ContentUnit::InlineImage { data, mime_type } => json!({
                "inlineData": { "mimeType": mime_type, "data": data }
            }),
        })
        .collect();

    json!({
        "systemInstruction": { "parts": [{ "text": system_instruction }] },
        "contents": [{ "role": "user", "parts": parts }],
    })
}

/// Concatenated text of the first candidate. An empty body or an empty
/// candidate list is a valid empty reply, not an error.
fn parse_response_text(model: &str, raw: &str) -> Result<String, GenerationError> {
    if raw.trim().is_empty() {
        return Ok(String::new());
    }

    let parsed: GenerateContentResponse =
        serde_json::from_str(raw).map_err(|error| GenerationError::InvalidResponse {
            model: model.to_string(),
            message: error.to_string(),
        })?;

    let Some(candidate) = parsed
        .candidates
        .and_then(|mut candidates| {
            if candidates.is_empty() {
                None
            } else {
                Some(candidates.remove(0))
            }
        })
    else {
        return Ok(String::new());
    };

    let parts = candidate
        .content
        .and_then(|content| content.parts)
        .unwrap_or_default();
    Ok(parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join(""))
}

fn api_error_message(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| truncate_body(raw).to_string())
}

/// Truncate a response body for error messages to avoid dumping megabytes of HTML.
fn truncate_body(body: &str) -> &str {
    let limit = 500;
    if body.len() <= limit { body } else { &body[..limit] }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<GenerateContentCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: Option<GenerateContentContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentContent {
    parts: Option<Vec<GenerateContentPart>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn http_status(model: &str, status: u16, message: &str) -> GenerationError {
        GenerationError::HttpStatus {
            model: model.to_string(),
            status,
            message: message.to_string(),
        }
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn capacity_statuses_are_transient() {
        for status in [429, 500, 503, 504] {
            assert_eq!(
                classify(&http_status("m", status, "err")),
                ErrorClass::Transient,
                "status {status}"
            );
        }
    }

    #[test]
    fn caller_errors_are_non_transient() {
        for status in [400, 401, 403, 404] {
            assert_eq!(
                classify(&http_status("m", status, "err")),
                ErrorClass::NonTransient,
                "status {status}"
            );
        }
    }

    #[test]
    fn capacity_message_overrides_status() {
        let error = http_status("m", 400, "RESOURCE_EXHAUSTED: out of quota");
        assert_eq!(classify(&error), ErrorClass::Transient);
    }

    #[test]
    fn malformed_responses_are_non_transient() {
        let error = GenerationError::InvalidResponse {
            model: "m".into(),
            message: "bad json".into(),
        };
        assert_eq!(classify(&error), ErrorClass::NonTransient);
    }

    #[tokio::test]
    async fn capacity_error_falls_back_without_delay() {
        let attempts = RefCell::new(Vec::new());
        let result = run_model_chain(&models(&["gemini-2.0-flash", "model-b"]), |model| {
            attempts.borrow_mut().push(model.clone());
            let outcome = if model == "model-b" {
                Ok("ok".to_string())
            } else {
                Err(http_status(&model, 429, "model is overloaded"))
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.expect("fallback succeeds"), "ok");
        assert_eq!(*attempts.borrow(), vec!["gemini-2.0-flash", "model-b"]);
    }

    #[tokio::test]
    async fn later_fallbacks_are_not_tried_after_success() {
        let attempts = RefCell::new(Vec::new());
        let result = run_model_chain(&models(&["a", "b", "c"]), |model| {
            attempts.borrow_mut().push(model.clone());
            let outcome = if model == "b" {
                Ok("from b".to_string())
            } else {
                Err(http_status(&model, 503, "unavailable"))
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.expect("succeeds"), "from b");
        assert_eq!(*attempts.borrow(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn non_transient_error_aborts_the_chain() {
        let attempts = RefCell::new(Vec::new());
        let result = run_model_chain(&models(&["a", "b"]), |model| {
            attempts.borrow_mut().push(model.clone());
            let outcome: Result<String, _> = Err(http_status(&model, 400, "bad request"));
            async move { outcome }
        })
        .await;

        assert!(matches!(
            result,
            Err(GenerationError::HttpStatus { status: 400, .. })
        ));
        assert_eq!(*attempts.borrow(), vec!["a"]);
    }

    #[tokio::test]
    async fn exhausted_chain_surfaces_the_last_error() {
        let result = run_model_chain(&models(&["a", "b"]), |model| {
            let outcome: Result<String, _> = Err(http_status(&model, 503, "unavailable"));
            async move { outcome }
        })
        .await;

        let Err(GenerationError::HttpStatus { model, .. }) = result else {
            panic!("expected the last transient error");
        };
        assert_eq!(model, "b");
    }

    #[tokio::test]
    async fn empty_model_list_is_an_error() {
        let result = run_model_chain(&[], |_model| async { Ok("unreachable".to_string()) }).await;
        assert!(matches!(result, Err(GenerationError::NoModels)));
    }

    #[test]
    fn request_body_carries_system_instruction_and_ordered_parts() {
        let units = vec![
            ContentUnit::Text("Ada: check this receipt".into()),
            ContentUnit::InlineImage {
                data: "aW1hZ2U=".into(),
                mime_type: "image/png".into(),
            },
            ContentUnit::Text("Assistant: looking".into()),
        ];
        let body = build_request_body("be helpful", &units);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be helpful");
        let parts = body["contents"][0]["parts"].as_array().expect("parts array");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "Ada: check this receipt");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "aW1hZ2U=");
        assert_eq!(parts[2]["text"], "Assistant: looking");
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn parses_text_out_of_a_generate_content_response() {
        let raw = r#"{
            "candidates": [{
                "content": { "parts": [{"text": "Hello "}, {"text": "there"}] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 2 }
        }"#;
        assert_eq!(parse_response_text("m", raw).expect("parses"), "Hello there");
    }

    #[test]
    fn empty_body_is_a_valid_empty_reply() {
        assert_eq!(parse_response_text("m", "").expect("ok"), "");
        assert_eq!(parse_response_text("m", "   ").expect("ok"), "");
    }

    #[test]
    fn missing_candidates_is_a_valid_empty_reply() {
        assert_eq!(parse_response_text("m", "{}").expect("ok"), "");
        assert_eq!(
            parse_response_text("m", r#"{"candidates": []}"#).expect("ok"),
            ""
        );
    }

    #[test]
    fn malformed_json_is_an_invalid_response() {
        let result = parse_response_text("m", "{not json");
        assert!(matches!(
            result,
            Err(GenerationError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn api_error_message_prefers_the_nested_field() {
        let raw = r#"{"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(api_error_message(raw), "Resource has been exhausted");
    }

    #[test]
    fn api_error_message_falls_back_to_the_raw_body() {
        assert_eq!(api_error_message("<html>502</html>"), "<html>502</html>");
    }
}
