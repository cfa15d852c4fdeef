//! Configuration types for invoice extraction.
//!
//! All batch behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. One struct per batch keeps runs
//! reproducible: the same config over the same document sends the same
//! requests in the same order.

use crate::error::InvoiceOcrError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for one extraction batch (one document, one page range).
///
/// # Example
/// ```rust
/// use edgequake_invoice::{ExtractionConfig, PageRange};
///
/// let config = ExtractionConfig::builder()
///     .pages(PageRange::new(1, 4))
///     .page_delay_ms(3000)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI. Range: 72–600. Default: 300.
    ///
    /// The page matrix is scaled by `dpi / 72`; 300 DPI keeps small Thai and
    /// Latin glyphs on tax invoices legible to the model.
    pub dpi: u32,

    /// Pages to process. `None` means the whole document.
    pub pages: Option<PageRange>,

    /// Which extraction client talks to the model.
    pub backend: Backend,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-mini".
    /// If None, uses the backend default.
    pub model: Option<String>,

    /// LLM provider name for the [`Backend::Llm`] backend
    /// (e.g. "openai", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// API key for [`Backend::GeminiRest`]. Falls back to `GEMINI_API_KEY`.
    pub gemini_api_key: Option<String>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 8192.
    ///
    /// Long line-item tables easily exceed 2 000 output tokens; a truncated
    /// response has no closing brace and the page falls into the error path.
    pub max_tokens: usize,

    /// Fixed pause after every page, success or failure. Default: 3000 ms.
    ///
    /// This is the only rate-limit handling; there is no retry.
    pub page_delay_ms: u64,

    /// Caller-side timeout for a single page call in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom extraction instruction. If None, uses
    /// [`crate::prompts::INVOICE_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            pages: None,
            backend: Backend::default(),
            model: None,
            provider_name: None,
            provider: None,
            gemini_api_key: None,
            temperature: 0.0,
            max_tokens: 8192,
            page_delay_ms: 3000,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            password: None,
            prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("pages", &self.pages)
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("page_delay_ms", &self.page_delay_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Rendering zoom applied to the native (72 DPI) page matrix.
    pub fn zoom(&self) -> f32 {
        self.dpi as f32 / 72.0
    }

    /// The configured page range, or the whole document.
    pub fn range_for(&self, page_count: usize) -> PageRange {
        self.pages.unwrap_or_else(|| PageRange::whole(page_count))
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.config.fmt(f)
    }
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn pages(mut self, range: PageRange) -> Self {
        self.config.pages = Some(range);
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.gemini_api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(256);
        self
    }

    pub fn page_delay_ms(mut self, ms: u64) -> Self {
        self.config.page_delay_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// The page range is only checked for internal consistency here; the
    /// upper bound against the real page count is checked once the document
    /// is open.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceOcrError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(InvoiceOcrError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if let Some(range) = c.pages {
            if range.start < 1 || range.start > range.end {
                return Err(InvoiceOcrError::InvalidConfig(format!(
                    "Page range must satisfy 1 <= start <= end, got {}-{}",
                    range.start, range.end
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Extraction client used for each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backend {
    /// Any vision provider supported by `edgequake-llm` (default).
    #[default]
    Llm,
    /// Direct calls to the Gemini `generateContent` REST endpoint.
    GeminiRest,
}

/// A 1-indexed, inclusive page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Every page of a `page_count`-page document.
    pub fn whole(page_count: usize) -> Self {
        Self::new(1, page_count)
    }

    /// Number of pages in the range (0 when inverted).
    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 1-indexed page numbers in ascending order.
    pub fn pages(&self) -> impl Iterator<Item = usize> {
        self.start..=self.end
    }
}
