//! Extraction clients: one page image in, the model's raw text out.
//!
//! [`PageExtractor`] is the seam between the batch loop and the model. Two
//! backends implement it:
//!
//! * [`LlmExtractor`] — any vision provider supported by `edgequake-llm`.
//! * [`GeminiRestExtractor`] — direct calls to Gemini's `generateContent`.
//!
//! Neither backend retries. A failed call becomes a [`PageError`] and the
//! batch loop records a sentinel for that page.

use crate::config::{Backend, ExtractionConfig};
use crate::error::{InvoiceOcrError, PageError};
use crate::prompts::INVOICE_EXTRACTION_PROMPT;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default model for [`Backend::Llm`] when a provider is named without one.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1-nano";

/// Default model for [`Backend::GeminiRest`].
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sends one page image with the extraction instruction and returns the
/// model's raw text reply.
///
/// Implementations must not panic on bad responses; every failure is a
/// [`PageError`] carrying the page number.
pub trait PageExtractor: Send + Sync {
    fn extract_page(
        &self,
        page_num: usize,
        image: &ImageData,
    ) -> impl Future<Output = Result<String, PageError>> + Send;
}

// ── edgequake-llm backend ────────────────────────────────────────────────────

/// Vision chat call through an [`LLMProvider`].
pub struct LlmExtractor {
    provider: Arc<dyn LLMProvider>,
    prompt: String,
    options: CompletionOptions,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            prompt: instruction(config).to_string(),
            options: build_options(config),
        }
    }
}

impl PageExtractor for LlmExtractor {
    async fn extract_page(&self, page_num: usize, image: &ImageData) -> Result<String, PageError> {
        // Instruction and image travel together in a single user turn.
        let messages = vec![ChatMessage::user_with_images(
            self.prompt.as_str(),
            vec![image.clone()],
        )];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| PageError::Request {
                page: page_num,
                detail: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {} chars",
            page_num,
            response.prompt_tokens,
            response.completion_tokens,
            response.content.len()
        );
        Ok(response.content)
    }
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Gemini REST backend ──────────────────────────────────────────────────────

/// Direct `generateContent` calls with the API key in the query string.
pub struct GeminiRestExtractor {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    prompt: String,
    max_tokens: usize,
    timeout_secs: u64,
}

impl GeminiRestExtractor {
    pub fn new(api_key: impl Into<String>, config: &ExtractionConfig) -> Result<Self, InvoiceOcrError> {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| InvoiceOcrError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{GEMINI_BASE_URL}/models/{model}:generateContent"),
            api_key: api_key.into(),
            prompt: instruction(config).to_string(),
            max_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
        })
    }

    /// Point the client at a different `generateContent` URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl PageExtractor for GeminiRestExtractor {
    async fn extract_page(&self, page_num: usize, image: &ImageData) -> Result<String, PageError> {
        let body = gemini_request_body(&self.prompt, image, self.max_tokens);

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PageError::Timeout {
                        page: page_num,
                        secs: self.timeout_secs,
                    }
                } else {
                    PageError::Request {
                        page: page_num,
                        detail: e.without_url().to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PageError::HttpStatus {
                page: page_num,
                status: status.as_u16(),
            });
        }

        let envelope: Value = response.json().await.map_err(|e| PageError::MalformedResponse {
            page: page_num,
            detail: e.without_url().to_string(),
        })?;

        let text = gemini_response_text(&envelope).ok_or_else(|| PageError::MalformedResponse {
            page: page_num,
            detail: "response has no candidates[0].content.parts[0].text".to_string(),
        })?;
        debug!("Page {}: {} chars from Gemini", page_num, text.len());
        Ok(text.to_string())
    }
}

/// `contents[0].parts = [instruction, inline PNG]` plus the output token limit.
pub fn gemini_request_body(prompt: &str, image: &ImageData, max_tokens: usize) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inline_data": { "mime_type": image.mime_type, "data": image.data } }
            ]
        }],
        "generationConfig": { "maxOutputTokens": max_tokens }
    })
}

/// `candidates[0].content.parts[0].text`, if present.
pub fn gemini_response_text(envelope: &Value) -> Option<&str> {
    envelope
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
}

// ── Backend selection ────────────────────────────────────────────────────────

/// The extractor a config asks for.
pub enum ConfiguredExtractor {
    Llm(LlmExtractor),
    GeminiRest(GeminiRestExtractor),
}

impl ConfiguredExtractor {
    /// Build the backend named by `config.backend`.
    ///
    /// Fails with [`InvoiceOcrError::ProviderNotConfigured`] before any page
    /// is rendered when credentials are missing.
    pub async fn from_config(config: &ExtractionConfig) -> Result<Self, InvoiceOcrError> {
        match config.backend {
            Backend::Llm => {
                let provider = resolve_provider(config).await?;
                Ok(Self::Llm(LlmExtractor::new(provider, config)))
            }
            Backend::GeminiRest => {
                let key = config
                    .gemini_api_key
                    .clone()
                    .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| InvoiceOcrError::ProviderNotConfigured {
                        provider: "gemini-rest".to_string(),
                        hint: "Set GEMINI_API_KEY or pass --gemini-api-key.".to_string(),
                    })?;
                Ok(Self::GeminiRest(GeminiRestExtractor::new(key, config)?))
            }
        }
    }
}

impl PageExtractor for ConfiguredExtractor {
    async fn extract_page(&self, page_num: usize, image: &ImageData) -> Result<String, PageError> {
        match self {
            Self::Llm(e) => e.extract_page(page_num, image).await,
            Self::GeminiRest(e) => e.extract_page(page_num, image).await,
        }
    }
}

fn instruction(config: &ExtractionConfig) -> &str {
    config.prompt.as_deref().unwrap_or(INVOICE_EXTRACTION_PROMPT)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, InvoiceOcrError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceOcrError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, most specific first:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI, when `OPENAI_API_KEY` is set.
/// 5. [`ProviderFactory::from_env`] auto-detection.
pub async fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<Arc<dyn LLMProvider>, InvoiceOcrError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_LLM_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_LLM_MODEL);
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoiceOcrError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> ImageData {
        ImageData::new("aGVsbG8=", "image/png")
    }

    #[test]
    fn options_follow_config() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[test]
    fn gemini_body_carries_prompt_image_and_token_limit() {
        let body = gemini_request_body("extract", &png(), 8192);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "extract");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "aGVsbG8=");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn gemini_text_is_read_from_first_candidate() {
        let envelope = json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\": 1}"}]}}]
        });
        assert_eq!(gemini_response_text(&envelope), Some("{\"a\": 1}"));
        assert_eq!(gemini_response_text(&json!({"candidates": []})), None);
        assert_eq!(gemini_response_text(&json!({"error": {"code": 400}})), None);
    }

    #[test]
    fn custom_prompt_overrides_default() {
        let config = ExtractionConfig::builder().prompt("only totals").build().unwrap();
        assert_eq!(instruction(&config), "only totals");
        assert_eq!(
            instruction(&ExtractionConfig::default()),
            INVOICE_EXTRACTION_PROMPT
        );
    }

    #[test]
    fn gemini_endpoint_uses_configured_model() {
        let config = ExtractionConfig::builder()
            .backend(Backend::GeminiRest)
            .model("gemini-2.5-pro")
            .build()
            .unwrap();
        let client = GeminiRestExtractor::new("k", &config).unwrap();
        assert!(client.endpoint.ends_with("/models/gemini-2.5-pro:generateContent"));
    }

    #[tokio::test]
    async fn gemini_rest_without_key_is_not_configured() {
        if std::env::var("GEMINI_API_KEY").is_ok() {
            return;
        }
        let config = ExtractionConfig::builder()
            .backend(Backend::GeminiRest)
            .build()
            .unwrap();
        let err = ConfiguredExtractor::from_config(&config).await.err().unwrap();
        assert!(matches!(err, InvoiceOcrError::ProviderNotConfigured { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_error() {
        let config = ExtractionConfig::builder()
            .backend(Backend::GeminiRest)
            .api_timeout_secs(5)
            .build()
            .unwrap();
        let client = GeminiRestExtractor::new("k", &config)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/generateContent");
        let err = client.extract_page(3, &png()).await.unwrap_err();
        assert_eq!(err.page(), 3);
        assert!(matches!(
            err,
            PageError::Request { .. } | PageError::Timeout { .. }
        ));
    }
}
