//! Configuration types for the document pipeline.
//!
//! All pipeline behaviour is controlled through [`AgentConfig`], one nested
//! struct per component. Every field has a default, so a YAML file only
//! needs to mention what it changes; unknown sections are ignored.
//!
//! # Sources
//! Lowest to highest precedence:
//! 1. built-in defaults ([`AgentConfig::default`]);
//! 2. a YAML file: the explicit path, else `$CONFIG_FILE`, else
//!    `./config.yaml` when it exists ([`AgentConfig::load`]);
//! 3. programmatic overrides via [`AgentConfigBuilder`] (the CLI uses this
//!    for its flags).
//!
//! # Validation is eager
//! [`AgentConfig::validate`] runs on every load and in
//! [`AgentConfigBuilder::build`]. A bad value is reported at startup, never
//! halfway through a batch.

use crate::document::DocumentType;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// OCR engine identifiers accepted in `ocr.primary_engine` / `ocr.fallback_engine`.
///
/// `paddle` and `tesseract` need the crate features of the same name; a
/// build without them reports the engine as unavailable at startup.
pub const KNOWN_ENGINES: [&str; 3] = ["paddle", "tesseract", "vision"];

/// Upper bound for `llm.max_retries`.
pub const MAX_LLM_RETRIES: u32 = 10;

/// Contrast methods accepted in `preprocessing.contrast_method`.
pub const CONTRAST_METHODS: [&str; 2] = ["clahe", "global"];

/// Name of the implicit config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub general: GeneralConfig,
    pub input: InputConfig,
    pub preprocessing: PreprocessConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    pub output: OutputConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level when neither `RUST_LOG` nor a CLI flag sets one.
    pub log_level: String,
    /// Optional plain-text log file, appended to alongside stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Accepted file extensions, lowercase, without the dot.
    pub supported_formats: Vec<String>,
    /// Size ceiling in megabytes.
    pub max_file_size_mb: u64,
    /// Rasterisation DPI for PDF pages. Range: 72–600.
    pub min_resolution_dpi: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            supported_formats: ["jpg", "jpeg", "png", "tiff", "tif", "bmp", "pdf"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_file_size_mb: 20,
            min_resolution_dpi: 150,
        }
    }
}

impl InputConfig {
    pub fn supports(&self, extension: &str) -> bool {
        let ext = extension.to_lowercase();
        self.supported_formats.iter().any(|f| f.eq_ignore_ascii_case(&ext))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub denoise: bool,
    /// Median filter window size; the radius is `(strength - 1) / 2`, at least 1.
    pub denoise_strength: u32,
    pub deskew: bool,
    /// Minimum median skew, in degrees, before a rotation is applied.
    pub deskew_threshold: f32,
    pub enhance_contrast: bool,
    /// `clahe` (tiled adaptive) or `global` histogram equalisation.
    pub contrast_method: String,
    pub binarize: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            denoise: true,
            denoise_strength: 3,
            deskew: true,
            deskew_threshold: 0.5,
            enhance_contrast: true,
            contrast_method: "clahe".into(),
            binarize: false,
        }
    }
}

impl PreprocessConfig {
    /// Every stage switched off; preprocessing becomes the identity.
    pub fn disabled() -> Self {
        Self {
            denoise: false,
            deskew: false,
            enhance_contrast: false,
            binarize: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub primary_engine: String,
    /// `None` disables fallback.
    pub fallback_engine: Option<String>,
    /// Tesseract language code(s), e.g. `spa` or `spa+eng`.
    pub language: String,
    /// Blocks below this confidence are dropped. Range: 0–1.
    pub confidence_threshold: f32,
    pub paddle: PaddleConfig,
    pub tesseract: TesseractConfig,
    pub vision: VisionOcrConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            primary_engine: "paddle".into(),
            fallback_engine: Some("tesseract".into()),
            language: "spa".into(),
            confidence_threshold: 0.7,
            paddle: PaddleConfig::default(),
            tesseract: TesseractConfig::default(),
            vision: VisionOcrConfig::default(),
        }
    }
}

/// PaddleOCR ONNX models for the `paddle` engine (detection + recognition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddleConfig {
    pub detection_model: PathBuf,
    pub recognition_model: PathBuf,
    /// Character dictionary of the recognition model, one symbol per line.
    pub character_dict: PathBuf,
    /// Whole-page 0/90/180/270° classifier. Optional.
    pub document_orientation_model: Option<PathBuf>,
    /// Per-line 0/180° classifier. Optional.
    pub text_line_orientation_model: Option<PathBuf>,
    /// Text regions recognised per inference batch.
    pub region_batch_size: usize,
}

impl Default for PaddleConfig {
    fn default() -> Self {
        Self {
            detection_model: PathBuf::from("models/paddle/det.onnx"),
            recognition_model: PathBuf::from("models/paddle/rec.onnx"),
            character_dict: PathBuf::from("models/paddle/dict.txt"),
            document_orientation_model: None,
            text_line_orientation_model: None,
            region_batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Page segmentation mode (`tessedit_pageseg_mode`).
    pub psm: u8,
    /// Directory holding `<lang>.traineddata`; `None` uses the library default.
    pub data_path: Option<PathBuf>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            psm: 3,
            data_path: None,
        }
    }
}

/// Vision-model OCR settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionOcrConfig {
    /// Provider name; `None` reuses `llm.provider`.
    pub provider: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    /// Image detail hint passed to providers that support it.
    pub detail: String,
    /// Longest image side sent to the model, in pixels.
    pub max_image_side: u32,
    /// Per-page deadline for the vision call.
    pub timeout_seconds: u64,
}

impl Default for VisionOcrConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: "llava:13b".into(),
            max_tokens: 4096,
            detail: "high".into(),
            max_image_side: 2000,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    /// Exported as `OLLAMA_HOST` by the CLI when that variable is unset.
    pub base_url: String,
    /// Per-call deadline.
    pub timeout_seconds: u64,
    /// Transport-level retries after the first call fails.
    pub max_retries: u32,
    /// Initial backoff; doubles on each retry.
    pub retry_backoff_ms: u64,
    /// Sampling temperature. Range: 0–2.
    pub temperature: f32,
    pub classification: ClassificationConfig,
    pub extraction: ExtractionConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: "llama3:8b".into(),
            base_url: "http://localhost:11434".into(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
            temperature: 0.1,
            classification: ClassificationConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Confidence below which a warning is attached to the result.
    pub confidence_threshold: f32,
    /// Per-type overrides of `confidence_threshold`.
    pub type_thresholds: BTreeMap<DocumentType, f32>,
    /// OCR text is cut to this many characters before classification.
    pub max_chars: usize,
    pub max_tokens: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            type_thresholds: BTreeMap::new(),
            max_chars: 2000,
            max_tokens: 100,
        }
    }
}

impl ClassificationConfig {
    /// Threshold that applies to `doc_type`.
    pub fn threshold_for(&self, doc_type: DocumentType) -> f32 {
        self.type_thresholds
            .get(&doc_type)
            .copied()
            .unwrap_or(self.confidence_threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// OCR text is cut to this many characters before extraction.
    pub max_chars: usize,
    /// Attempts of the validate-and-retry loop, including the first.
    pub max_attempts: u32,
    pub max_tokens: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chars: 3000,
            max_attempts: 2,
            max_tokens: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Only `json` is supported.
    pub format: String,
    pub pretty_print: bool,
    pub include_raw_ocr: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "json".into(),
            pretty_print: true,
            include_raw_ocr: true,
        }
    }
}

/// Declared for compatibility with existing config files; batches run
/// sequentially and nothing is cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_workers: usize,
    pub enable_caching: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            enable_caching: true,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

impl AgentConfig {
    /// Create a new builder starting from defaults.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AgentError> {
        // An empty file is a valid "all defaults" config.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| AgentError::InvalidConfig(format!("YAML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AgentError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Resolve the config file and load it.
    ///
    /// An explicit path, or one named by `$CONFIG_FILE`, must exist. The
    /// implicit `./config.yaml` is optional: without it, defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AgentError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(env_path) = std::env::var_os("CONFIG_FILE").filter(|v| !v.is_empty()) {
            return Self::from_file(Path::new(&env_path));
        }
        let implicit = Path::new(DEFAULT_CONFIG_FILE);
        if implicit.is_file() {
            return Self::from_file(implicit);
        }
        Ok(Self::default())
    }

    /// Check every constraint, reporting the first violation.
    pub fn validate(&self) -> Result<(), AgentError> {
        let fail = |msg: String| Err(AgentError::InvalidConfig(msg));

        let i = &self.input;
        if i.supported_formats.is_empty() {
            return fail("input.supported_formats must not be empty".into());
        }
        if i.max_file_size_mb == 0 {
            return fail("input.max_file_size_mb must be ≥ 1".into());
        }
        if !(72..=600).contains(&i.min_resolution_dpi) {
            return fail(format!(
                "input.min_resolution_dpi must be 72–600, got {}",
                i.min_resolution_dpi
            ));
        }

        let p = &self.preprocessing;
        if p.denoise && p.denoise_strength == 0 {
            return fail("preprocessing.denoise_strength must be ≥ 1 when denoise is on".into());
        }
        if !(p.deskew_threshold >= 0.0) {
            return fail(format!(
                "preprocessing.deskew_threshold must be ≥ 0, got {}",
                p.deskew_threshold
            ));
        }
        if !CONTRAST_METHODS.contains(&p.contrast_method.as_str()) {
            return fail(format!(
                "preprocessing.contrast_method '{}' is not one of: {}",
                p.contrast_method,
                CONTRAST_METHODS.join(", ")
            ));
        }

        let o = &self.ocr;
        if !(0.0..=1.0).contains(&o.confidence_threshold) {
            return fail(format!(
                "ocr.confidence_threshold must be 0–1, got {}",
                o.confidence_threshold
            ));
        }
        if !KNOWN_ENGINES.contains(&o.primary_engine.as_str()) {
            return fail(format!(
                "ocr.primary_engine '{}' is not one of: {}",
                o.primary_engine,
                KNOWN_ENGINES.join(", ")
            ));
        }
        if o.paddle.region_batch_size == 0 {
            return fail("ocr.paddle.region_batch_size must be ≥ 1".into());
        }
        if o.tesseract.psm > 13 {
            return fail(format!("ocr.tesseract.psm must be 0–13, got {}", o.tesseract.psm));
        }
        if let Some(fb) = &o.fallback_engine {
            if !KNOWN_ENGINES.contains(&fb.as_str()) {
                return fail(format!(
                    "ocr.fallback_engine '{fb}' is not one of: {}",
                    KNOWN_ENGINES.join(", ")
                ));
            }
            if *fb == o.primary_engine {
                return fail(format!(
                    "ocr.fallback_engine must differ from primary_engine ('{fb}')"
                ));
            }
        }

        let l = &self.llm;
        if l.timeout_seconds == 0 {
            return fail("llm.timeout_seconds must be ≥ 1".into());
        }
        if l.max_retries > MAX_LLM_RETRIES {
            return fail(format!(
                "llm.max_retries must be at most {MAX_LLM_RETRIES}, got {}",
                l.max_retries
            ));
        }
        if !(0.0..=2.0).contains(&l.temperature) {
            return fail(format!("llm.temperature must be 0–2, got {}", l.temperature));
        }
        let c = &l.classification;
        if !(0.0..=1.0).contains(&c.confidence_threshold) {
            return fail(format!(
                "llm.classification.confidence_threshold must be 0–1, got {}",
                c.confidence_threshold
            ));
        }
        for (doc_type, t) in &c.type_thresholds {
            if !(0.0..=1.0).contains(t) {
                return fail(format!(
                    "llm.classification.type_thresholds.{doc_type} must be 0–1, got {t}"
                ));
            }
        }
        if l.extraction.max_attempts == 0 {
            return fail("llm.extraction.max_attempts must be ≥ 1".into());
        }

        if !self.output.format.eq_ignore_ascii_case("json") {
            return fail(format!(
                "output.format '{}' is not supported (only json)",
                self.output.format
            ));
        }
        Ok(())
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`AgentConfig`].
///
/// ```rust
/// use logistics_agent::AgentConfig;
///
/// let config = AgentConfig::builder()
///     .model("llama3:8b")
///     .fallback_engine(None)
///     .extraction_attempts(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.llm.extraction.max_attempts, 3);
/// ```
#[derive(Debug)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Start from an already-loaded config (e.g. a YAML file).
    pub fn from_config(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.general.log_level = level.into();
        self
    }

    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.input.max_file_size_mb = mb;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.input.min_resolution_dpi = dpi;
        self
    }

    pub fn preprocessing(mut self, p: PreprocessConfig) -> Self {
        self.config.preprocessing = p;
        self
    }

    pub fn primary_engine(mut self, name: impl Into<String>) -> Self {
        self.config.ocr.primary_engine = name.into();
        self
    }

    pub fn fallback_engine(mut self, name: Option<&str>) -> Self {
        self.config.ocr.fallback_engine = name.map(String::from);
        self
    }

    pub fn ocr_confidence_threshold(mut self, t: f32) -> Self {
        self.config.ocr.confidence_threshold = t;
        self
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.config.llm.provider = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = model.into();
        self
    }

    pub fn timeout_seconds(mut self, secs: u64) -> Self {
        self.config.llm.timeout_seconds = secs;
        self
    }

    pub fn llm_max_retries(mut self, n: u32) -> Self {
        self.config.llm.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.llm.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.llm.temperature = t;
        self
    }

    pub fn classification_threshold(mut self, t: f32) -> Self {
        self.config.llm.classification.confidence_threshold = t;
        self
    }

    pub fn extraction_attempts(mut self, n: u32) -> Self {
        self.config.llm.extraction.max_attempts = n;
        self
    }

    pub fn pretty_print(mut self, v: bool) -> Self {
        self.config.output.pretty_print = v;
        self
    }

    pub fn include_raw_ocr(mut self, v: bool) -> Self {
        self.config.output.include_raw_ocr = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
