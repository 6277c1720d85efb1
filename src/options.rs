//! Typed engine configuration.
//!
//! The marker engine takes a flat key/value configuration with a few hundred
//! possible keys. Instead of passing caller dictionaries through and filtering
//! them by name, every recognised option lives in a typed field here, grouped
//! the way the engine documents them. [`EngineConfig::to_engine_options`]
//! produces the flat map the engine reads, so key spellings exist in exactly
//! one place.
//!
//! Instances are produced by [`crate::pipeline::normalize::normalize`]; the
//! invariants below are established there and preserved by the private
//! worker field.
//!
//! * `pdftext_workers` is always 1.
//! * Batch sizes are never zero.
//! * `llm` is `None` whenever LLM enhancement is off, and then no LLM key is
//!   emitted at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::num::NonZeroU32;
use std::path::Path;

/// Worker count the engine is pinned to.
pub const SINGLE_WORKER: u32 = 1;

/// Directory under the working dir that receives the engine's debug dumps.
pub const DEBUG_DATA_DIR: &str = "debug_data";

/// Configuration handed to the engine for one conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    /// Output renderer. Default: [`OutputFormat::Markdown`].
    pub output_format: OutputFormat,

    /// Page range expression understood by the engine, e.g. `"0,5-10,20"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,

    /// Engine-wide debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,

    #[serde(flatten)]
    pub ocr: OcrOptions,

    #[serde(flatten)]
    pub layout: LayoutOptions,

    #[serde(flatten)]
    pub tables: TableOptions,

    #[serde(flatten)]
    pub performance: PerformanceOptions,

    #[serde(flatten)]
    pub output: OutputOptions,

    #[serde(flatten)]
    pub debug_dumps: DebugOptions,

    /// LLM enhancement. `None` means disabled.
    #[serde(skip)]
    pub llm: Option<LlmConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            page_range: None,
            debug: None,
            ocr: OcrOptions::default(),
            layout: LayoutOptions::default(),
            tables: TableOptions::default(),
            performance: PerformanceOptions::default(),
            output: OutputOptions::default(),
            debug_dumps: DebugOptions::default(),
            llm: None,
        }
    }
}

impl EngineConfig {
    /// Number of text-extraction workers the engine will use. Always 1.
    pub fn worker_count(&self) -> u32 {
        self.performance.pdftext_workers
    }

    /// Whether LLM enhancement is active for this conversion.
    pub fn llm_enabled(&self) -> bool {
        self.llm.is_some()
    }

    /// Build the flat option map the engine reads, pointing all artifact
    /// output at `output_dir`.
    ///
    /// Debug dumps always go to `output_dir/debug_data`, whatever folder the
    /// caller asked for; a caller-supplied path never leaves the working dir.
    pub fn to_engine_options(&self, output_dir: &Path) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Plain data with string keys always serialises to an object.
            _ => Map::new(),
        };
        map.insert("disable_multiprocessing".into(), Value::Bool(true));
        map.insert(
            "output_dir".into(),
            Value::String(output_dir.to_string_lossy().into_owned()),
        );
        map.insert(
            "debug_data_folder".into(),
            Value::String(output_dir.join(DEBUG_DATA_DIR).to_string_lossy().into_owned()),
        );
        if let Some(ref llm) = self.llm {
            llm.write_engine_options(&mut map);
        }
        map
    }

    pub(crate) fn pin_single_worker(&mut self) {
        self.performance.pdftext_workers = SINGLE_WORKER;
    }
}

// ── Option groups ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_ocr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_existing_ocr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_ocr: Option<bool>,
    /// OCR languages, e.g. `["en", "nl"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_space_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_newline_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_alphanum_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lowres_image_dpi: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highres_image_dpi: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_coverage_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ocr_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detect_boxes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_table_rows: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_split_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_gap_ratio: Option<f64>,
}

/// Throughput knobs.
///
/// Batch sizes are `NonZeroU32` because the engine divides by them; a zero
/// from the caller is treated as "unset" during normalisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceOptions {
    pdftext_workers: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<NonZeroU32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition_batch_size: Option<NonZeroU32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_batch_size: Option<NonZeroU32>,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            pdftext_workers: SINGLE_WORKER,
            batch_size: None,
            recognition_batch_size: None,
            detection_batch_size: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paginate_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_links: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_layout_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_pdf_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_json: Option<bool>,
    /// Accepted for compatibility; the engine always receives
    /// `<working dir>/debug_data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_data_folder: Option<String>,
}

// ── Output format ────────────────────────────────────────────────────────

/// Renderer the engine uses for the primary output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain Markdown text. (default)
    #[default]
    Markdown,
    /// Structured HTML markup.
    Html,
    /// Block-tree JSON.
    Json,
}

impl OutputFormat {
    /// Parse the engine's selector string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Some(OutputFormat::Markdown),
            "html" => Some(OutputFormat::Html),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }

    /// File extension of the primary output file.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── LLM enhancement ──────────────────────────────────────────────────────

/// LLM enhancement settings. Present only when enhancement is on and the
/// selected provider's credential was supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub tuning: LlmTuning,
    pub features: LlmFeatures,
    pub prompts: LlmPrompts,
    pub thresholds: LlmThresholds,
}

impl LlmConfig {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            tuning: LlmTuning::default(),
            features: LlmFeatures::default(),
            prompts: LlmPrompts::default(),
            thresholds: LlmThresholds::default(),
        }
    }

    fn write_engine_options(&self, map: &mut Map<String, Value>) {
        map.insert("use_llm".into(), Value::Bool(true));
        map.insert(
            "llm_service".into(),
            Value::String(self.provider.kind().service_id().into()),
        );
        self.provider.write_engine_options(map);
        for group in [
            serde_json::to_value(&self.tuning),
            serde_json::to_value(&self.features),
            serde_json::to_value(&self.prompts),
            serde_json::to_value(&self.thresholds),
        ] {
            if let Ok(Value::Object(fields)) = group {
                map.extend(fields);
            }
        }
    }
}

/// Provider selector, as spelled in the option bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Azure,
    /// Self-hosted; needs no credential. (default)
    #[default]
    Ollama,
    Custom,
}

impl LlmProviderKind {
    pub const ALL: [LlmProviderKind; 6] = [
        LlmProviderKind::Gemini,
        LlmProviderKind::OpenAi,
        LlmProviderKind::Anthropic,
        LlmProviderKind::Azure,
        LlmProviderKind::Ollama,
        LlmProviderKind::Custom,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(LlmProviderKind::Gemini),
            "openai" => Some(LlmProviderKind::OpenAi),
            "anthropic" => Some(LlmProviderKind::Anthropic),
            "azure" => Some(LlmProviderKind::Azure),
            "ollama" => Some(LlmProviderKind::Ollama),
            "custom" => Some(LlmProviderKind::Custom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LlmProviderKind::Gemini => "gemini",
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::Anthropic => "anthropic",
            LlmProviderKind::Azure => "azure",
            LlmProviderKind::Ollama => "ollama",
            LlmProviderKind::Custom => "custom",
        }
    }

    /// Option key holding this provider's mandatory secret, if any.
    pub fn credential_key(self) -> Option<&'static str> {
        match self {
            LlmProviderKind::Gemini => Some("google_api_key"),
            LlmProviderKind::OpenAi => Some("openai_api_key"),
            LlmProviderKind::Anthropic => Some("anthropic_api_key"),
            LlmProviderKind::Azure => Some("azure_api_key"),
            LlmProviderKind::Ollama => None,
            LlmProviderKind::Custom => Some("custom_api_key"),
        }
    }

    /// Every option key that belongs to this provider.
    pub fn option_keys(self) -> &'static [&'static str] {
        match self {
            LlmProviderKind::Gemini => &["google_api_key", "gemini_model_name"],
            LlmProviderKind::OpenAi => &["openai_api_key", "openai_model_name", "openai_base_url"],
            LlmProviderKind::Anthropic => &["anthropic_api_key", "anthropic_model_name"],
            LlmProviderKind::Azure => &[
                "azure_api_key",
                "azure_endpoint",
                "azure_deployment",
                "azure_api_version",
            ],
            LlmProviderKind::Ollama => &["ollama_base_url", "ollama_model_name"],
            LlmProviderKind::Custom => &["custom_api_key", "custom_base_url", "custom_model_name"],
        }
    }

    /// Service identifier the engine uses to load the provider client.
    pub fn service_id(self) -> &'static str {
        match self {
            LlmProviderKind::Gemini => "marker.services.gemini.GoogleGeminiService",
            LlmProviderKind::OpenAi => "marker.services.openai.OpenAIService",
            LlmProviderKind::Anthropic => "marker.services.claude.ClaudeService",
            LlmProviderKind::Azure => "marker.services.azure_openai.AzureOpenAIService",
            LlmProviderKind::Ollama => "marker.services.ollama.OllamaService",
            LlmProviderKind::Custom => "custom",
        }
    }
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2:latest";

/// The selected provider with its own credential and model fields.
///
/// Being an enum, it cannot carry another provider's fields.
#[derive(Clone, PartialEq)]
pub enum LlmProvider {
    Gemini {
        api_key: String,
        model: String,
    },
    OpenAi {
        api_key: String,
        model: String,
        base_url: Option<String>,
    },
    Anthropic {
        api_key: String,
        model: String,
    },
    Azure {
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: String,
    },
    Ollama {
        base_url: String,
        model: String,
    },
    Custom {
        api_key: String,
        base_url: String,
        model: String,
    },
}

impl LlmProvider {
    pub fn kind(&self) -> LlmProviderKind {
        match self {
            LlmProvider::Gemini { .. } => LlmProviderKind::Gemini,
            LlmProvider::OpenAi { .. } => LlmProviderKind::OpenAi,
            LlmProvider::Anthropic { .. } => LlmProviderKind::Anthropic,
            LlmProvider::Azure { .. } => LlmProviderKind::Azure,
            LlmProvider::Ollama { .. } => LlmProviderKind::Ollama,
            LlmProvider::Custom { .. } => LlmProviderKind::Custom,
        }
    }

    /// Model (or Azure deployment) the provider will be asked to use.
    pub fn model(&self) -> &str {
        match self {
            LlmProvider::Gemini { model, .. }
            | LlmProvider::OpenAi { model, .. }
            | LlmProvider::Anthropic { model, .. }
            | LlmProvider::Ollama { model, .. }
            | LlmProvider::Custom { model, .. } => model,
            LlmProvider::Azure { deployment, .. } => deployment,
        }
    }

    fn write_engine_options(&self, map: &mut Map<String, Value>) {
        let mut put = |k: &str, v: &str| {
            map.insert(k.to_string(), Value::String(v.to_string()));
        };
        match self {
            LlmProvider::Gemini { api_key, model } => {
                put("google_api_key", api_key);
                put("gemini_model_name", model);
            }
            LlmProvider::OpenAi {
                api_key,
                model,
                base_url,
            } => {
                put("openai_api_key", api_key);
                put("openai_model_name", model);
                if let Some(url) = base_url {
                    put("openai_base_url", url);
                }
            }
            LlmProvider::Anthropic { api_key, model } => {
                put("anthropic_api_key", api_key);
                put("anthropic_model_name", model);
            }
            LlmProvider::Azure {
                api_key,
                endpoint,
                deployment,
                api_version,
            } => {
                put("azure_api_key", api_key);
                put("azure_endpoint", endpoint);
                put("azure_deployment", deployment);
                put("azure_api_version", api_version);
            }
            LlmProvider::Ollama { base_url, model } => {
                put("ollama_base_url", base_url);
                put("ollama_model", model);
            }
            LlmProvider::Custom {
                api_key,
                base_url,
                model,
            } => {
                put("custom_api_key", api_key);
                put("custom_base_url", base_url);
                put("custom_model_name", model);
            }
        }
    }
}

// Credentials never reach log output.
impl fmt::Debug for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmProvider")
            .field("kind", &self.kind())
            .field("model", &self.model())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Generic request-shaping knobs applied to whichever provider is selected.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmTuning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    /// Per-request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Per-capability enable flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_layout: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_table: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_equation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_handwriting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_complex_region: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_form: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_image_description: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_table_merge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm_text: Option<bool>,
}

/// Custom prompt overrides; `None` keeps the engine's built-in prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmPrompts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equation_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handwriting_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complex_relabeling_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_rewriting_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_merge_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_description_prompt: Option<String>,
}

/// Thresholds used by the LLM processors when deciding what to send.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmThresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_height_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_equation_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equation_image_expansion_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows_per_batch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_image_expansion_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_height_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_start_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_table_height_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_table_distance_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_table_width_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_table_distance_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_gap_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_expansion_ratio: Option<f64>,
}
