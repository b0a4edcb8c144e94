//! Text-generation client used by every action handler.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Failure kinds of the generation service. The payload is the service's message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    ModelUnavailable(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unknown(String),
}

impl ServiceError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ServiceError::Unauthenticated(message),
            400 if message.contains("API key") => ServiceError::Unauthenticated(message),
            400 => ServiceError::BadRequest(message),
            404 | 503 => ServiceError::ModelUnavailable(message),
            429 => ServiceError::RateLimited(message),
            _ => ServiceError::Unknown(message),
        }
    }

    /// Translation key of the user-facing message template.
    pub fn message_key(&self) -> &'static str {
        match self {
            ServiceError::Unauthenticated(_) => "error.unauthenticated",
            ServiceError::ModelUnavailable(_) => "error.model_unavailable",
            ServiceError::RateLimited(_) => "error.rate_limited",
            ServiceError::BadRequest(_) => "error.bad_request",
            ServiceError::Unknown(_) => "error.failed",
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited(_) | ServiceError::ModelUnavailable(_) | ServiceError::Unknown(_)
        )
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ServiceError::from_status(status.as_u16(), err.to_string()),
            None => ServiceError::Unknown(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { model: "gemini-2.0-flash".to_string(), temperature: 0.7, max_tokens: 2048 }
    }
}

impl GenerationOptions {
    pub fn with_temperature(&self, temperature: f32) -> Self {
        Self { temperature, ..self.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub usage: Option<Usage>,
}

/// One element of a streamed response. The element with `is_final` ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub text: String,
    pub is_final: bool,
}

impl Delta {
    pub fn partial(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_final: false }
    }

    pub fn end() -> Self {
        Self { text: String::new(), is_final: true }
    }
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, ServiceError>> + Send>>;

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generated, ServiceError>;

    /// Lazy, forward-only sequence of deltas. No retries happen here.
    async fn stream_generate(&self, prompt: &str, options: &GenerationOptions) -> Result<DeltaStream, ServiceError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: RequestConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl ResponseChunk {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

/// Gemini REST client.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { http, api_key: api_key.into(), base_url: GEMINI_BASE_URL.to_string() })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn body<'a>(prompt: &'a str, options: &GenerationOptions) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![RequestContent { role: "user", parts: vec![RequestPart { text: prompt }] }],
            generation_config: RequestConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        }
    }

    async fn post(&self, method: &str, query: &str, prompt: &str, options: &GenerationOptions) -> Result<reqwest::Response, ServiceError> {
        let url = format!("{}/models/{}:{}?{}", self.base_url, options.model, method, query);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(prompt, options))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(ServiceError::from_status(status.as_u16(), message))
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generated, ServiceError> {
        debug!(model = %options.model, "gemini generateContent");
        let response = self.post("generateContent", "", prompt, options).await?;
        let chunk: ResponseChunk = response
            .json()
            .await
            .map_err(|e| ServiceError::Unknown(format!("failed to parse response: {e}")))?;
        if let Some(err) = chunk.error {
            return Err(ServiceError::from_status(err.code, err.message));
        }
        Ok(Generated {
            text: chunk.text().trim().to_string(),
            usage: chunk.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
        })
    }

    async fn stream_generate(&self, prompt: &str, options: &GenerationOptions) -> Result<DeltaStream, ServiceError> {
        debug!(model = %options.model, "gemini streamGenerateContent");
        let response = self.post("streamGenerateContent", "alt=sse", prompt, options).await?;

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(b) => {
                        buffer.extend_from_slice(&b);
                        for data in drain_sse_events(&mut buffer) {
                            match parse_event(&data) {
                                Ok(Some(text)) => yield Ok(Delta::partial(text)),
                                Ok(None) => {}
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ServiceError::from(e));
                        return;
                    }
                }
            }
            buffer.extend_from_slice(b"\n\n");
            for data in drain_sse_events(&mut buffer) {
                match parse_event(&data) {
                    Ok(Some(text)) => yield Ok(Delta::partial(text)),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            yield Ok(Delta::end());
        };

        Ok(Box::pin(stream))
    }
}

/// Removes every complete server-sent event from `buffer` and returns the
/// joined `data:` payloads.
pub(crate) fn drain_sse_events(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut events = Vec::new();
    loop {
        let boundary = find_boundary(buffer);
        let Some((end, sep_len)) = boundary else { break };
        let raw: Vec<u8> = buffer.drain(..end + sep_len).take(end).collect();
        let raw = String::from_utf8_lossy(&raw);
        let data: Vec<&str> = raw
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if !data.is_empty() {
            events.push(data.join("\n"));
        }
    }
    events
}

fn find_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_event(data: &str) -> Result<Option<String>, ServiceError> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }
    let chunk: ResponseChunk = serde_json::from_str(data)
        .map_err(|e| ServiceError::Unknown(format!("malformed stream chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(ServiceError::from_status(err.code, err.message));
    }
    let text = chunk.text();
    Ok(if text.is_empty() { None } else { Some(text) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(texts: &[&str]) -> String {
        texts
            .iter()
            .map(|t| {
                format!(
                    "data: {}\r\n\r\n",
                    serde_json::json!({"candidates": [{"content": {"role": "model", "parts": [{"text": t}]}}]})
                )
            })
            .collect()
    }

    #[test]
    fn maps_status_codes_to_kinds() {
        assert!(matches!(ServiceError::from_status(401, "x".into()), ServiceError::Unauthenticated(_)));
        assert!(matches!(
            ServiceError::from_status(400, "API key not valid".into()),
            ServiceError::Unauthenticated(_)
        ));
        assert!(matches!(ServiceError::from_status(400, "bad".into()), ServiceError::BadRequest(_)));
        assert!(matches!(ServiceError::from_status(404, "x".into()), ServiceError::ModelUnavailable(_)));
        assert!(matches!(ServiceError::from_status(429, "x".into()), ServiceError::RateLimited(_)));
        assert!(matches!(ServiceError::from_status(500, "x".into()), ServiceError::Unknown(_)));
    }

    #[test]
    fn drains_only_complete_events() {
        let mut buffer = b"data: {\"a\":1}\n\ndata: {\"b\"".to_vec();
        assert_eq!(drain_sse_events(&mut buffer), vec!["{\"a\":1}".to_string()]);
        assert_eq!(buffer, b"data: {\"b\"".to_vec());
        buffer.extend_from_slice(b":2}\r\n\r\n");
        assert_eq!(drain_sse_events(&mut buffer), vec!["{\"b\":2}".to_string()]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn streams_deltas_then_final_marker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse(&["This", " fox", " jumps fast."])))
            .mount(&server)
            .await;

        let client = GeminiClient::new("test-key").unwrap().with_base_url(server.uri());
        let mut stream = client.stream_generate("hi", &GenerationOptions::default()).await.unwrap();

        let mut text = String::new();
        let mut saw_final = false;
        while let Some(delta) = stream.next().await {
            let delta = delta.unwrap();
            if delta.is_final {
                saw_final = true;
                break;
            }
            text.push_str(&delta.text);
        }
        assert!(saw_final);
        assert_eq!(text, "This fox jumps fast.");
    }

    #[tokio::test]
    async fn surfaces_api_errors_as_kinds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED"}
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("test-key").unwrap().with_base_url(server.uri());
        let err = client.generate("hi", &GenerationOptions::default()).await.unwrap_err();
        assert_eq!(err, ServiceError::RateLimited("quota exceeded".into()));
    }

    #[tokio::test]
    async fn generate_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]}}],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("test-key").unwrap().with_base_url(server.uri());
        let out = client.generate("hi", &GenerationOptions::default()).await.unwrap();
        assert_eq!(out.text, "Hello there");
        assert_eq!(out.usage.unwrap().total_tokens, 5);
    }
}
