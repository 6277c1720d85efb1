//! Configuration normalisation: flat caller option bag → [`EngineConfig`].
//!
//! Callers (the agent tool surface, the web form, the CLI `--set` flags)
//! hand over a loosely typed JSON object. Values arrive in whatever shape the
//! front end produced: numbers as strings, booleans as `"true"`, languages as
//! `"en, nl"`. This stage reads every recognised key into its typed field and
//! never fails on a bad value: it drops it and records an [`OptionWarning`].
//!
//! ## Rules
//!
//! 1. Null values, empty strings and unrecognised keys are dropped.
//! 2. A zero batch size is treated as unset (the engine divides by it).
//! 3. LLM enhancement is on only if `use_llm` is true *and* the selected
//!    provider's credential is present; otherwise every LLM key is dropped.
//! 4. Only the selected provider's fields are kept.
//! 5. The worker count is pinned to 1 as the very last step.
//!
//! The only error is a raw input that is not a JSON object at all.

use crate::error::ServiceError;
use crate::options::{
    EngineConfig, LlmConfig, LlmFeatures, LlmPrompts, LlmProvider, LlmProviderKind, LlmThresholds,
    LlmTuning, OutputFormat, DEFAULT_ANTHROPIC_MODEL, DEFAULT_AZURE_API_VERSION,
    DEFAULT_GEMINI_MODEL, DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_MODEL,
    SINGLE_WORKER,
};
use serde_json::{Map, Value};
use std::fmt;
use std::num::NonZeroU32;
use tracing::{debug, warn};

/// Engine keys accepted regardless of LLM settings.
pub const BASIC_KEYS: &[&str] = &[
    "output_format",
    "page_range",
    "debug",
    "force_ocr",
    "strip_existing_ocr",
    "disable_ocr",
    "languages",
    "ocr_space_threshold",
    "ocr_newline_threshold",
    "ocr_alphanum_threshold",
    "lowres_image_dpi",
    "highres_image_dpi",
    "layout_coverage_threshold",
    "document_ocr_threshold",
    "detect_boxes",
    "max_table_rows",
    "row_split_threshold",
    "column_gap_ratio",
    "pdftext_workers",
    "batch_size",
    "recognition_batch_size",
    "detection_batch_size",
    "extract_images",
    "paginate_output",
    "page_separator",
    "disable_links",
    "debug_layout_images",
    "debug_pdf_images",
    "debug_json",
    "debug_data_folder",
];

/// Provider-independent LLM keys, kept only while LLM enhancement is on.
pub const LLM_KEYS: &[&str] = &[
    "max_retries",
    "max_concurrency",
    "timeout",
    "temperature",
    "max_tokens",
    "use_llm_layout",
    "use_llm_table",
    "use_llm_equation",
    "use_llm_handwriting",
    "use_llm_complex_region",
    "use_llm_form",
    "use_llm_image_description",
    "use_llm_table_merge",
    "use_llm_text",
    "layout_prompt",
    "table_prompt",
    "equation_prompt",
    "handwriting_prompt",
    "complex_relabeling_prompt",
    "table_rewriting_prompt",
    "table_merge_prompt",
    "image_description_prompt",
    "confidence_threshold",
    "picture_height_threshold",
    "min_equation_height",
    "equation_image_expansion_ratio",
    "max_rows_per_batch",
    "table_image_expansion_ratio",
    "table_height_threshold",
    "table_start_threshold",
    "vertical_table_height_threshold",
    "vertical_table_distance_threshold",
    "horizontal_table_width_threshold",
    "horizontal_table_distance_threshold",
    "column_gap_threshold",
    "image_expansion_ratio",
];

/// Keys that steer normalisation itself.
pub const CONTROL_KEYS: &[&str] = &["use_llm", "llm_provider"];

/// Keys read by [`crate::pipeline::archive::BatchOptions::from_options`].
pub const BATCH_KEYS: &[&str] = &["include_debug_in_zip", "include_images_in_zip"];

const WORKER_KEY: &str = "pdftext_workers";

/// Something the normaliser dropped or overrode.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionWarning {
    /// Key is not part of any allow-list.
    UnknownKey(String),
    /// Value had the wrong shape for its key.
    InvalidValue { key: String, expected: &'static str },
    /// A batch size of zero was treated as unset.
    ZeroBatchSize(String),
    /// A caller-supplied worker count was replaced by 1.
    WorkerCountOverridden(String),
    /// LLM enhancement was requested but the credential was missing.
    LlmMissingCredential {
        provider: LlmProviderKind,
        key: &'static str,
    },
    /// LLM enhancement was requested with an unrecognised provider.
    LlmUnknownProvider(String),
}

impl OptionWarning {
    /// Whether this warning changes what the caller asked for in a way they
    /// are likely to notice (as opposed to a dropped stray key).
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            OptionWarning::LlmMissingCredential { .. } | OptionWarning::LlmUnknownProvider(_)
        )
    }
}

impl fmt::Display for OptionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionWarning::UnknownKey(k) => write!(f, "ignoring unrecognised option '{k}'"),
            OptionWarning::InvalidValue { key, expected } => {
                write!(f, "ignoring option '{key}': expected {expected}")
            }
            OptionWarning::ZeroBatchSize(k) => write!(f, "option '{k}' is 0, treated as unset"),
            OptionWarning::WorkerCountOverridden(v) => {
                write!(f, "{WORKER_KEY}={v} overridden to {SINGLE_WORKER}")
            }
            OptionWarning::LlmMissingCredential { provider, key } => write!(
                f,
                "LLM enhancement disabled: provider '{provider}' requires '{key}'"
            ),
            OptionWarning::LlmUnknownProvider(p) => {
                write!(f, "LLM enhancement disabled: unknown provider '{p}'")
            }
        }
    }
}

/// Normalise a raw option bag, logging anything that was dropped.
pub fn normalize(raw: &Value) -> Result<EngineConfig, ServiceError> {
    let (config, warnings) = normalize_with_warnings(raw)?;
    for w in &warnings {
        if w.is_degradation() {
            warn!("{}", w);
        } else {
            debug!("{}", w);
        }
    }
    Ok(config)
}

/// Normalise a raw option bag and return the warnings alongside the config.
pub fn normalize_with_warnings(
    raw: &Value,
) -> Result<(EngineConfig, Vec<OptionWarning>), ServiceError> {
    let map = raw.as_object().ok_or_else(|| ServiceError::InvalidOptions {
        found: json_kind(raw).to_string(),
    })?;

    let mut r = Reader::new(map);
    let mut config = EngineConfig::default();

    // ── Basic options ────────────────────────────────────────────────────
    if let Some(s) = r.string("output_format") {
        match OutputFormat::parse(&s) {
            Some(fmt) => config.output_format = fmt,
            None => r.invalid("output_format", "one of markdown, html, json"),
        }
    }
    config.page_range = r.string("page_range");
    config.debug = r.boolean("debug");

    config.ocr.force_ocr = r.boolean("force_ocr");
    config.ocr.strip_existing_ocr = r.boolean("strip_existing_ocr");
    config.ocr.disable_ocr = r.boolean("disable_ocr");
    config.ocr.languages = r.string_list("languages");
    config.ocr.ocr_space_threshold = r.float("ocr_space_threshold");
    config.ocr.ocr_newline_threshold = r.float("ocr_newline_threshold");
    config.ocr.ocr_alphanum_threshold = r.float("ocr_alphanum_threshold");

    config.layout.lowres_image_dpi = r.uint("lowres_image_dpi");
    config.layout.highres_image_dpi = r.uint("highres_image_dpi");
    config.layout.layout_coverage_threshold = r.float("layout_coverage_threshold");
    config.layout.document_ocr_threshold = r.float("document_ocr_threshold");

    config.tables.detect_boxes = r.boolean("detect_boxes");
    config.tables.max_table_rows = r.uint("max_table_rows");
    config.tables.row_split_threshold = r.float("row_split_threshold");
    config.tables.column_gap_ratio = r.float("column_gap_ratio");

    config.performance.batch_size = r.batch_size("batch_size");
    config.performance.recognition_batch_size = r.batch_size("recognition_batch_size");
    config.performance.detection_batch_size = r.batch_size("detection_batch_size");

    config.output.extract_images = r.boolean("extract_images");
    config.output.paginate_output = r.boolean("paginate_output");
    config.output.page_separator = r.raw_string("page_separator");
    config.output.disable_links = r.boolean("disable_links");

    config.debug_dumps.debug_layout_images = r.boolean("debug_layout_images");
    config.debug_dumps.debug_pdf_images = r.boolean("debug_pdf_images");
    config.debug_dumps.debug_json = r.boolean("debug_json");
    config.debug_dumps.debug_data_folder = r.string("debug_data_folder");

    // ── LLM enhancement ──────────────────────────────────────────────────
    if r.boolean("use_llm").unwrap_or(false) {
        config.llm = resolve_llm(&mut r);
    }

    // ── Unknown keys ─────────────────────────────────────────────────────
    for (key, value) in map {
        if !value.is_null() && !is_known_key(key) {
            r.warnings.push(OptionWarning::UnknownKey(key.clone()));
        }
    }

    // ── Worker pinning (must stay last) ──────────────────────────────────
    if let Some(v) = r.value(WORKER_KEY) {
        if v.as_u64() != Some(u64::from(SINGLE_WORKER)) {
            r.warnings
                .push(OptionWarning::WorkerCountOverridden(v.to_string()));
        }
    }
    config.pin_single_worker();

    Ok((config, r.warnings))
}

fn resolve_llm(r: &mut Reader<'_>) -> Option<LlmConfig> {
    let kind = match r.string("llm_provider") {
        None => LlmProviderKind::default(),
        Some(name) => match LlmProviderKind::parse(&name) {
            Some(kind) => kind,
            None => {
                r.warnings.push(OptionWarning::LlmUnknownProvider(name));
                return None;
            }
        },
    };

    let credential = match kind.credential_key() {
        Some(key) => match r.string(key) {
            Some(secret) => secret,
            None => {
                r.warnings.push(OptionWarning::LlmMissingCredential {
                    provider: kind,
                    key,
                });
                return None;
            }
        },
        None => String::new(),
    };

    let or = |v: Option<String>, default: &str| v.unwrap_or_else(|| default.to_string());
    let provider = match kind {
        LlmProviderKind::Gemini => LlmProvider::Gemini {
            api_key: credential,
            model: or(r.string("gemini_model_name"), DEFAULT_GEMINI_MODEL),
        },
        LlmProviderKind::OpenAi => LlmProvider::OpenAi {
            api_key: credential,
            model: or(r.string("openai_model_name"), DEFAULT_OPENAI_MODEL),
            base_url: r.string("openai_base_url"),
        },
        LlmProviderKind::Anthropic => LlmProvider::Anthropic {
            api_key: credential,
            model: or(r.string("anthropic_model_name"), DEFAULT_ANTHROPIC_MODEL),
        },
        LlmProviderKind::Azure => LlmProvider::Azure {
            api_key: credential,
            endpoint: or(r.string("azure_endpoint"), ""),
            deployment: or(r.string("azure_deployment"), ""),
            api_version: or(r.string("azure_api_version"), DEFAULT_AZURE_API_VERSION),
        },
        LlmProviderKind::Ollama => LlmProvider::Ollama {
            base_url: or(r.string("ollama_base_url"), DEFAULT_OLLAMA_BASE_URL),
            model: or(r.string("ollama_model_name"), DEFAULT_OLLAMA_MODEL),
        },
        LlmProviderKind::Custom => LlmProvider::Custom {
            api_key: credential,
            base_url: or(r.string("custom_base_url"), ""),
            model: or(r.string("custom_model_name"), ""),
        },
    };
    debug!("LLM enhancement on: {} / {}", kind, provider.model());

    Some(LlmConfig {
        provider,
        tuning: LlmTuning {
            max_retries: r.uint("max_retries"),
            max_concurrency: r.uint("max_concurrency"),
            timeout: r.uint("timeout"),
            temperature: r.float("temperature"),
            max_tokens: r.uint("max_tokens"),
        },
        features: LlmFeatures {
            use_llm_layout: r.boolean("use_llm_layout"),
            use_llm_table: r.boolean("use_llm_table"),
            use_llm_equation: r.boolean("use_llm_equation"),
            use_llm_handwriting: r.boolean("use_llm_handwriting"),
            use_llm_complex_region: r.boolean("use_llm_complex_region"),
            use_llm_form: r.boolean("use_llm_form"),
            use_llm_image_description: r.boolean("use_llm_image_description"),
            use_llm_table_merge: r.boolean("use_llm_table_merge"),
            use_llm_text: r.boolean("use_llm_text"),
        },
        prompts: LlmPrompts {
            layout_prompt: r.raw_string("layout_prompt"),
            table_prompt: r.raw_string("table_prompt"),
            equation_prompt: r.raw_string("equation_prompt"),
            handwriting_prompt: r.raw_string("handwriting_prompt"),
            complex_relabeling_prompt: r.raw_string("complex_relabeling_prompt"),
            table_rewriting_prompt: r.raw_string("table_rewriting_prompt"),
            table_merge_prompt: r.raw_string("table_merge_prompt"),
            image_description_prompt: r.raw_string("image_description_prompt"),
        },
        thresholds: LlmThresholds {
            confidence_threshold: r.float("confidence_threshold"),
            picture_height_threshold: r.float("picture_height_threshold"),
            min_equation_height: r.float("min_equation_height"),
            equation_image_expansion_ratio: r.float("equation_image_expansion_ratio"),
            max_rows_per_batch: r.float("max_rows_per_batch"),
            table_image_expansion_ratio: r.float("table_image_expansion_ratio"),
            table_height_threshold: r.float("table_height_threshold"),
            table_start_threshold: r.float("table_start_threshold"),
            vertical_table_height_threshold: r.float("vertical_table_height_threshold"),
            vertical_table_distance_threshold: r.float("vertical_table_distance_threshold"),
            horizontal_table_width_threshold: r.float("horizontal_table_width_threshold"),
            horizontal_table_distance_threshold: r.float("horizontal_table_distance_threshold"),
            column_gap_threshold: r.float("column_gap_threshold"),
            image_expansion_ratio: r.float("image_expansion_ratio"),
        },
    })
}

fn is_known_key(key: &str) -> bool {
    BASIC_KEYS.contains(&key)
        || LLM_KEYS.contains(&key)
        || CONTROL_KEYS.contains(&key)
        || BATCH_KEYS.contains(&key)
        || LlmProviderKind::ALL
            .iter()
            .any(|kind| kind.option_keys().contains(&key))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Lenient value reader ─────────────────────────────────────────────────

/// Typed accessors over the raw map that coerce UI-style values and record
/// a warning instead of failing.
pub(crate) struct Reader<'a> {
    map: &'a Map<String, Value>,
    pub(crate) warnings: Vec<OptionWarning>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(map: &'a Map<String, Value>) -> Self {
        Self {
            map,
            warnings: Vec::new(),
        }
    }

    /// The value for `key`, treating null and blank strings as absent.
    fn value(&self, key: &str) -> Option<&'a Value> {
        match self.map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        }
    }

    fn invalid(&mut self, key: &str, expected: &'static str) {
        self.warnings.push(OptionWarning::InvalidValue {
            key: key.to_string(),
            expected,
        });
    }

    /// A trimmed string; numbers are accepted and rendered.
    fn string(&mut self, key: &str) -> Option<String> {
        self.raw_string(key).map(|s| s.trim().to_string())
    }

    /// A string kept verbatim (separators and prompts keep their whitespace).
    fn raw_string(&mut self, key: &str) -> Option<String> {
        match self.value(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => {
                self.invalid(key, "a string");
                None
            }
        }
    }

    pub(crate) fn boolean(&mut self, key: &str) -> Option<bool> {
        match self.value(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => {
                    self.invalid(key, "a boolean");
                    None
                }
            },
            _ => {
                self.invalid(key, "a boolean");
                None
            }
        }
    }

    fn float(&mut self, key: &str) -> Option<f64> {
        let parsed = match self.value(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(f) if f.is_finite() => Some(f),
            _ => {
                self.invalid(key, "a number");
                None
            }
        }
    }

    fn uint(&mut self, key: &str) -> Option<u32> {
        let parsed = match self.value(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().and_then(integral_f64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<u64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
            }
            _ => None,
        };
        match parsed.and_then(|n| u32::try_from(n).ok()) {
            Some(n) => Some(n),
            None => {
                self.invalid(key, "a non-negative integer");
                None
            }
        }
    }

    fn batch_size(&mut self, key: &str) -> Option<NonZeroU32> {
        let n = self.uint(key)?;
        let nz = NonZeroU32::new(n);
        if nz.is_none() {
            self.warnings.push(OptionWarning::ZeroBatchSize(key.to_string()));
        }
        nz
    }

    fn string_list(&mut self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = match self.value(key)? {
            Value::String(s) => s
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
            Value::Array(values) => {
                let strings: Option<Vec<String>> = values
                    .iter()
                    .map(|v| v.as_str().map(|s| s.trim().to_string()))
                    .collect();
                match strings {
                    Some(list) => list.into_iter().filter(|s| !s.is_empty()).collect(),
                    None => {
                        self.invalid(key, "a list of strings");
                        return None;
                    }
                }
            }
            _ => {
                self.invalid(key, "a list of strings");
                return None;
            }
        };
        if items.is_empty() {
            None
        } else {
            Some(items)
        }
    }
}

fn integral_f64(f: f64) -> Option<u64> {
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn engine_keys(config: &EngineConfig) -> Map<String, Value> {
        config.to_engine_options(Path::new("/work"))
    }

    #[test]
    fn rejects_non_object_input() {
        for raw in [json!(null), json!([1, 2]), json!("markdown"), json!(3)] {
            let err = normalize(&raw).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidOptions { .. }), "{raw}");
        }
    }

    #[test]
    fn empty_object_yields_defaults() {
        let config = normalize(&json!({})).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn worker_count_is_always_one() {
        for workers in [json!(4), json!(8), json!(1), json!(0), json!("16"), json!(null)] {
            let raw = json!({ "pdftext_workers": workers });
            let config = normalize(&raw).unwrap();
            assert_eq!(config.worker_count(), 1, "input {workers}");
            assert_eq!(engine_keys(&config)["pdftext_workers"], 1);
        }
    }

    #[test]
    fn worker_override_is_reported() {
        let (_, warnings) = normalize_with_warnings(&json!({ "pdftext_workers": 4 })).unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, OptionWarning::WorkerCountOverridden(v) if v == "4")));

        let (_, warnings) = normalize_with_warnings(&json!({ "pdftext_workers": 1 })).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn zero_batch_sizes_are_omitted() {
        let raw = json!({
            "batch_size": 0,
            "recognition_batch_size": "0",
            "detection_batch_size": 0.0,
        });
        let (config, warnings) = normalize_with_warnings(&raw).unwrap();
        let keys = engine_keys(&config);
        for key in ["batch_size", "recognition_batch_size", "detection_batch_size"] {
            assert!(!keys.contains_key(key), "{key} leaked");
        }
        assert_eq!(
            warnings
                .iter()
                .filter(|w| matches!(w, OptionWarning::ZeroBatchSize(_)))
                .count(),
            3
        );
    }

    #[test]
    fn non_zero_batch_sizes_survive() {
        let config = normalize(&json!({ "detection_batch_size": 12 })).unwrap();
        assert_eq!(engine_keys(&config)["detection_batch_size"], 12);
    }

    #[test]
    fn null_and_blank_values_are_dropped() {
        let raw = json!({ "page_range": null, "languages": "", "force_ocr": null });
        let (config, warnings) = normalize_with_warnings(&raw).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored_with_warning() {
        let raw = json!({ "output_dir": "/etc", "frobnicate": true, "force_ocr": true });
        let (config, warnings) = normalize_with_warnings(&raw).unwrap();
        assert_eq!(config.ocr.force_ocr, Some(true));
        assert!(!engine_keys(&config).contains_key("frobnicate"));
        assert_eq!(engine_keys(&config)["output_dir"], "/work");
        let unknown: Vec<_> = warnings
            .iter()
            .filter_map(|w| match w {
                OptionWarning::UnknownKey(k) => Some(k.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(unknown.len(), 2);
        assert!(unknown.contains(&"output_dir"));
        assert!(unknown.contains(&"frobnicate"));
    }

    #[test]
    fn coerces_ui_style_values() {
        let raw = json!({
            "output_format": "HTML",
            "languages": "en, nl ,,de",
            "ocr_space_threshold": "0.7",
            "highres_image_dpi": "192",
            "max_table_rows": 150.0,
            "paginate_output": "true",
            "disable_links": 0,
            "page_separator": "\n---\n",
        });
        let config = normalize(&raw).unwrap();
        assert_eq!(config.output_format, OutputFormat::Html);
        assert_eq!(
            config.ocr.languages,
            Some(vec!["en".to_string(), "nl".to_string(), "de".to_string()])
        );
        assert_eq!(config.ocr.ocr_space_threshold, Some(0.7));
        assert_eq!(config.layout.highres_image_dpi, Some(192));
        assert_eq!(config.tables.max_table_rows, Some(150));
        assert_eq!(config.output.paginate_output, Some(true));
        assert_eq!(config.output.disable_links, Some(false));
        assert_eq!(config.output.page_separator.as_deref(), Some("\n---\n"));
    }

    #[test]
    fn malformed_values_are_dropped_not_fatal() {
        let raw = json!({
            "output_format": "docx",
            "lowres_image_dpi": -5,
            "ocr_newline_threshold": "lots",
            "force_ocr": "maybe",
            "languages": [1, 2],
        });
        let (config, warnings) = normalize_with_warnings(&raw).unwrap();
        assert_eq!(config.output_format, OutputFormat::Markdown);
        assert_eq!(config.layout.lowres_image_dpi, None);
        assert_eq!(config.ocr.ocr_newline_threshold, None);
        assert_eq!(config.ocr.force_ocr, None);
        assert_eq!(config.ocr.languages, None);
        assert_eq!(warnings.len(), 5, "{warnings:?}");
    }

    #[test]
    fn llm_disabled_drops_every_llm_key() {
        let raw = json!({
            "use_llm": false,
            "llm_provider": "openai",
            "openai_api_key": "sk-test",
            "temperature": 0.3,
            "use_llm_table": true,
            "table_prompt": "be careful",
        });
        let (config, warnings) = normalize_with_warnings(&raw).unwrap();
        assert!(!config.llm_enabled());
        let keys = engine_keys(&config);
        for key in LLM_KEYS.iter().chain(["use_llm", "llm_service", "openai_api_key"].iter()) {
            assert!(!keys.contains_key(*key), "{key} leaked");
        }
        assert!(warnings.is_empty(), "recognised keys must not warn: {warnings:?}");
    }

    #[test]
    fn missing_credential_degrades_to_disabled() {
        for provider in ["gemini", "openai", "anthropic", "azure", "custom"] {
            let raw = json!({
                "use_llm": true,
                "llm_provider": provider,
                "ollama_base_url": "http://gpu-box:11434",
                "temperature": 0.5,
            });
            let (config, warnings) = normalize_with_warnings(&raw).unwrap();
            assert!(!config.llm_enabled(), "{provider}");
            let keys = engine_keys(&config);
            assert!(!keys.contains_key("use_llm"));
            assert!(!keys.contains_key("temperature"));
            for kind in LlmProviderKind::ALL {
                for key in kind.option_keys() {
                    assert!(!keys.contains_key(*key), "{provider}: {key} leaked");
                }
            }
            assert!(warnings.iter().any(OptionWarning::is_degradation));
        }
    }

    #[test]
    fn selected_provider_fields_only() {
        let raw = json!({
            "use_llm": true,
            "llm_provider": "gemini",
            "google_api_key": "g-key",
            "openai_api_key": "sk-other",
            "anthropic_api_key": "sk-ant",
            "ollama_model_name": "qwen",
        });
        let config = normalize(&raw).unwrap();
        let keys = engine_keys(&config);
        assert_eq!(keys["google_api_key"], "g-key");
        assert_eq!(keys["gemini_model_name"], DEFAULT_GEMINI_MODEL);
        assert_eq!(keys["llm_service"], "marker.services.gemini.GoogleGeminiService");
        assert!(!keys.contains_key("openai_api_key"));
        assert!(!keys.contains_key("anthropic_api_key"));
        assert!(!keys.contains_key("ollama_model"));
    }

    #[test]
    fn ollama_is_default_provider_and_needs_no_credential() {
        let config = normalize(&json!({ "use_llm": true })).unwrap();
        match config.llm.as_ref().map(|l| &l.provider) {
            Some(LlmProvider::Ollama { base_url, model }) => {
                assert_eq!(base_url, DEFAULT_OLLAMA_BASE_URL);
                assert_eq!(model, DEFAULT_OLLAMA_MODEL);
            }
            other => panic!("expected ollama, got {other:?}"),
        }
    }

    #[test]
    fn provider_defaults_fill_optional_fields() {
        let raw = json!({
            "use_llm": "true",
            "llm_provider": "azure",
            "azure_api_key": "az",
            "azure_endpoint": "https://example.openai.azure.com",
        });
        let keys = engine_keys(&normalize(&raw).unwrap());
        assert_eq!(keys["azure_api_version"], DEFAULT_AZURE_API_VERSION);
        assert_eq!(keys["azure_deployment"], "");
        assert_eq!(keys["azure_endpoint"], "https://example.openai.azure.com");
    }

    #[test]
    fn openai_base_url_is_omitted_when_unset() {
        let raw = json!({ "use_llm": true, "llm_provider": "openai", "openai_api_key": "sk" });
        let keys = engine_keys(&normalize(&raw).unwrap());
        assert_eq!(keys["openai_model_name"], DEFAULT_OPENAI_MODEL);
        assert!(!keys.contains_key("openai_base_url"));
    }

    #[test]
    fn unknown_provider_disables_llm() {
        let raw = json!({ "use_llm": true, "llm_provider": "mistral" });
        let (config, warnings) = normalize_with_warnings(&raw).unwrap();
        assert!(!config.llm_enabled());
        assert!(matches!(
            warnings.as_slice(),
            [OptionWarning::LlmUnknownProvider(p)] if p == "mistral"
        ));
    }

    #[test]
    fn llm_tuning_and_prompts_carry_through() {
        let raw = json!({
            "use_llm": true,
            "llm_provider": "anthropic",
            "anthropic_api_key": "sk-ant",
            "anthropic_model_name": "claude-sonnet-4-20250514",
            "max_retries": 2,
            "timeout": "30",
            "use_llm_equation": true,
            "equation_prompt": "  keep LaTeX  ",
            "confidence_threshold": 0.8,
        });
        let config = normalize(&raw).unwrap();
        let llm = config.llm.expect("llm enabled");
        assert_eq!(llm.provider.model(), "claude-sonnet-4-20250514");
        assert_eq!(llm.tuning.max_retries, Some(2));
        assert_eq!(llm.tuning.timeout, Some(30));
        assert_eq!(llm.features.use_llm_equation, Some(true));
        assert_eq!(llm.prompts.equation_prompt.as_deref(), Some("  keep LaTeX  "));
        assert_eq!(llm.thresholds.confidence_threshold, Some(0.8));
    }
}
