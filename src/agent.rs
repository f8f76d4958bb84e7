//! Document pipeline: the orchestrator that runs every stage for one document.
//!
//! ```text
//! [1/7] validate ─▶ [2/7] load + frame checks ─▶ [3/7] preprocess
//!   ─▶ [4/7] OCR (primary, then fallback) ─▶ [5/7] classify
//!   ─▶ [6/7] extract (feedback loop) ─▶ [7/7] assemble ─▶ optional JSON
//! ```
//!
//! Any stage error is fatal for the document: it is logged with the elapsed
//! time, reported to the observer and returned. Nothing is written for a
//! failed document. Stage warnings (low resolution, low variance, a
//! low-confidence classification) are collected on the result instead.
//!
//! ## Why one pipeline object
//!
//! OCR engines and the LLM client are built once in [`Pipeline::new`] and
//! reused for every document; a batch pays their start-up cost once. All
//! per-document state lives in locals of [`Pipeline::process_document`], so
//! documents never share data.

use crate::config::AgentConfig;
use crate::document::{average_confidence, concatenate_text, OcrResult};
use crate::error::AgentError;
use crate::output::{round2, ProcessedDocument, ValidationStatus, AGENT_VERSION};
use crate::pipeline::classify::Classifier;
use crate::pipeline::extract::Extractor;
use crate::pipeline::input::InputValidator;
use crate::pipeline::llm::{LlmClient, ProviderGenerator, TextGenerator};
use crate::pipeline::load::{DocumentLoader, FrameDecoder};
use crate::pipeline::ocr::{build_engine, OcrEngine};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::Stage;
use crate::progress::{NoopObserver, SharedObserver};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Span};

pub struct Pipeline {
    config: AgentConfig,
    validator: InputValidator,
    loader: DocumentLoader,
    preprocessor: Arc<Preprocessor>,
    primary: Box<dyn OcrEngine>,
    fallback: Option<Box<dyn OcrEngine>>,
    classifier: Classifier,
    extractor: Extractor,
    observer: SharedObserver,
    span: Span,
}

impl Pipeline {
    /// Build a pipeline with the configured engines and LLM provider.
    ///
    /// If the primary OCR engine cannot be initialised the fallback takes
    /// its place and no fallback remains. Fails when neither engine starts
    /// or the LLM provider cannot be created.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let span = info_span!("pipeline");
        let (primary, fallback) = Self::init_engines(&config, &span)?;
        let generator: Arc<dyn TextGenerator> = Arc::new(ProviderGenerator::from_config(&config.llm)?);
        Ok(Self::assemble(config, primary, fallback, generator, span))
    }

    /// Build a pipeline from ready-made capabilities.
    pub fn from_parts(
        config: AgentConfig,
        primary: Box<dyn OcrEngine>,
        fallback: Option<Box<dyn OcrEngine>>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let span = info_span!("pipeline");
        Ok(Self::assemble(config, primary, fallback, generator, span))
    }

    /// Replace the frame decoder (image crate + pdfium by default).
    pub fn with_decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.loader = DocumentLoader::with_decoder(
            self.config.input.clone(),
            decoder,
            info_span!(parent: &self.span, "loader"),
        );
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Names of the active primary and fallback engines.
    pub fn engines(&self) -> (&str, Option<&str>) {
        (self.primary.name(), self.fallback.as_deref().map(|e| e.name()))
    }

    fn init_engines(
        config: &AgentConfig,
        span: &Span,
    ) -> Result<(Box<dyn OcrEngine>, Option<Box<dyn OcrEngine>>), AgentError> {
        let ocr = &config.ocr;
        let engine_span = |name: &str| info_span!(parent: span, "ocr", engine = name);

        let fallback = match &ocr.fallback_engine {
            Some(name) => match build_engine(name, ocr, &config.llm, engine_span(name)) {
                Ok(engine) => Some(engine),
                Err(e) => {
                    warn!(parent: span, "Fallback OCR engine unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        match build_engine(&ocr.primary_engine, ocr, &config.llm, engine_span(&ocr.primary_engine)) {
            Ok(primary) => {
                info!(
                    parent: span,
                    "OCR engines: primary={} fallback={}",
                    primary.name(),
                    fallback.as_ref().map_or("none", |f| f.name())
                );
                Ok((primary, fallback))
            }
            Err(e) => match fallback {
                Some(promoted) => {
                    warn!(
                        parent: span,
                        "Primary OCR engine unavailable ({}); using {} as primary",
                        e,
                        promoted.name()
                    );
                    Ok((promoted, None))
                }
                None => Err(AgentError::OcrFailed {
                    detail: format!("no OCR engine could be initialised: {e}"),
                }),
            },
        }
    }

    fn assemble(
        config: AgentConfig,
        primary: Box<dyn OcrEngine>,
        fallback: Option<Box<dyn OcrEngine>>,
        generator: Arc<dyn TextGenerator>,
        span: Span,
    ) -> Self {
        let llm = Arc::new(LlmClient::new(
            generator,
            &config.llm,
            info_span!(parent: &span, "llm"),
        ));
        Self {
            validator: InputValidator::new(
                config.input.clone(),
                info_span!(parent: &span, "validator"),
            ),
            loader: DocumentLoader::new(config.input.clone(), info_span!(parent: &span, "loader")),
            preprocessor: Arc::new(Preprocessor::new(
                config.preprocessing.clone(),
                info_span!(parent: &span, "preprocess"),
            )),
            primary,
            fallback,
            classifier: Classifier::new(
                Arc::clone(&llm),
                config.llm.classification.clone(),
                info_span!(parent: &span, "classifier"),
            ),
            extractor: Extractor::new(
                llm,
                config.llm.extraction.clone(),
                info_span!(parent: &span, "extractor"),
            ),
            observer: Arc::new(NoopObserver),
            config,
            span,
        }
    }

    // ── OCR with fallback ────────────────────────────────────────────────

    /// Run the primary engine; on an error or zero blocks, run the fallback.
    ///
    /// Returns the blocks and the name of the engine that produced them.
    pub async fn run_ocr(
        &self,
        frame: &DynamicImage,
    ) -> Result<(Vec<OcrResult>, String), AgentError> {
        let threshold = self.config.ocr.confidence_threshold;

        let primary_problem = match self.primary.extract(frame, threshold).await {
            Ok(blocks) if !blocks.is_empty() => {
                info!(
                    parent: &self.span,
                    "OCR ({}): {} block(s)",
                    self.primary.name(),
                    blocks.len()
                );
                return Ok((blocks, self.primary.name().to_string()));
            }
            Ok(_) => format!("{} detected no text", self.primary.name()),
            Err(e) => e.to_string(),
        };
        warn!(parent: &self.span, "Primary OCR failed: {}", primary_problem);

        let Some(fallback) = &self.fallback else {
            return Err(AgentError::OcrFailed {
                detail: primary_problem,
            });
        };
        info!(parent: &self.span, "Trying fallback OCR engine: {}", fallback.name());

        match fallback.extract(frame, threshold).await {
            Ok(blocks) if !blocks.is_empty() => {
                info!(
                    parent: &self.span,
                    "OCR ({}): {} block(s)",
                    fallback.name(),
                    blocks.len()
                );
                Ok((blocks, fallback.name().to_string()))
            }
            Ok(_) => Err(AgentError::OcrFailed {
                detail: format!(
                    "{primary_problem}; {} detected no text",
                    fallback.name()
                ),
            }),
            Err(e) => Err(AgentError::OcrFailed {
                detail: format!("{primary_problem}; {e}"),
            }),
        }
    }

    // ── Documents ────────────────────────────────────────────────────────

    /// Process one document and, when `output` is given, write its JSON
    /// there. Nothing is written if any stage fails.
    pub async fn process_document(
        &self,
        path: &Path,
        output: Option<&Path>,
    ) -> Result<ProcessedDocument, AgentError> {
        let start = Instant::now();
        info!(parent: &self.span, "Processing document: {}", path.display());
        self.observer.on_document_start(path);

        match self.run_stages(path, output, start).await {
            Ok(doc) => {
                info!(
                    parent: &self.span,
                    "Document processed in {:.2}s: {} ({})",
                    doc.processing_time_seconds,
                    doc.document_type,
                    doc.validation_status.as_str()
                );
                self.observer
                    .on_document_complete(path, start.elapsed().as_secs_f64());
                Ok(doc)
            }
            Err(e) => {
                let elapsed = start.elapsed().as_secs_f64();
                error!(
                    parent: &self.span,
                    "Failed to process {} after {:.2}s: {}",
                    path.display(),
                    elapsed,
                    e
                );
                self.observer.on_document_error(path, &e.to_string());
                Err(e)
            }
        }
    }

    fn enter(&self, path: &Path, stage: Stage) {
        info!(parent: &self.span, "{}", stage);
        self.observer.on_stage(path, stage);
    }

    async fn run_stages(
        &self,
        path: &Path,
        output: Option<&Path>,
        start: Instant,
    ) -> Result<ProcessedDocument, AgentError> {
        let mut warnings: Vec<String> = Vec::new();

        self.enter(path, Stage::Validate);
        let input = self.validator.validate(path)?;

        self.enter(path, Stage::Load);
        let frames = self.loader.load_validated(&input).await?;
        let page_count = frames.len();
        for (i, frame) in frames.iter().enumerate() {
            let frame_warnings = self.loader.validate_frame(frame)?;
            if page_count == 1 {
                warnings.extend(frame_warnings);
            } else {
                warnings.extend(frame_warnings.into_iter().map(|w| format!("Page {}: {w}", i + 1)));
            }
        }
        if page_count > 1 {
            info!(
                parent: &self.span,
                "Document has {} pages; processing the first", page_count
            );
        }
        let Some(frame) = frames.into_iter().next() else {
            return Err(AgentError::DecodeError {
                path: input.path.clone(),
                detail: "decoder produced no frames".into(),
            });
        };
        warnings.extend(self.validator.validate_quality(&frame)?);

        self.enter(path, Stage::Preprocess);
        let preprocessor = Arc::clone(&self.preprocessor);
        let frame = tokio::task::spawn_blocking(move || preprocessor.preprocess(&frame))
            .await
            .map_err(|e| AgentError::Internal(format!("Preprocess task panicked: {e}")))??;

        self.enter(path, Stage::Ocr);
        let (blocks, engine) = self.run_ocr(&frame).await?;
        let text = concatenate_text(&blocks);
        let ocr_confidence = average_confidence(&blocks);

        self.enter(path, Stage::Classify);
        let classification = self.classifier.classify(&text).await?;
        warnings.extend(classification.warning.clone());

        self.enter(path, Stage::Extract);
        let fields = self.extractor.extract(&text, classification.doc_type).await?;

        self.enter(path, Stage::Assemble);
        let document = ProcessedDocument {
            file_path: input.path.display().to_string(),
            file_name: input
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_size_kb: round2(input.size_kb()),
            processing_timestamp: chrono::Utc::now(),
            processing_time_seconds: round2(start.elapsed().as_secs_f64()),
            agent_version: AGENT_VERSION.to_string(),
            document_type: classification.doc_type,
            classification_confidence: classification.confidence,
            ocr_engine_used: engine,
            ocr_average_confidence: round2(ocr_confidence as f64) as f32,
            total_text_blocks: blocks.len(),
            tables_detected: 0,
            signatures_detected: fields.signatures_detected(),
            stamps_detected: fields.stamps_detected(),
            extracted_fields: fields,
            validation_status: ValidationStatus::from_warnings(&warnings),
            validation_errors: Vec::new(),
            validation_warnings: warnings,
            raw_ocr_text: self.config.output.include_raw_ocr.then_some(text),
        };

        if let Some(out) = output {
            document
                .write_json(out, self.config.output.pretty_print)
                .await?;
            info!(parent: &self.span, "Result saved to {}", out.display());
        }
        Ok(document)
    }

    /// Process `paths` one after another. Failures are logged and skipped;
    /// the successful results are returned in input order.
    ///
    /// With `output_dir`, each result is written to `<stem>.json` there.
    pub async fn process_batch(
        &self,
        paths: &[PathBuf],
        output_dir: Option<&Path>,
    ) -> Vec<ProcessedDocument> {
        info!(parent: &self.span, "Batch of {} document(s)", paths.len());
        let mut results = Vec::with_capacity(paths.len());

        for (i, path) in paths.iter().enumerate() {
            info!(
                parent: &self.span,
                "Document {}/{}: {}",
                i + 1,
                paths.len(),
                path.display()
            );
            let output = output_dir.map(|dir| dir.join(output_file_name(path)));
            match self.process_document(path, output.as_deref()).await {
                Ok(doc) => results.push(doc),
                Err(_) => warn!(parent: &self.span, "Skipping {}", path.display()),
            }
        }

        info!(
            parent: &self.span,
            "Batch complete: {}/{} succeeded",
            results.len(),
            paths.len()
        );
        results
    }

    /// Blocking wrapper around [`Pipeline::process_document`].
    ///
    /// Creates a temporary tokio runtime; must not be called from inside one.
    pub fn process_document_blocking(
        &self,
        path: &Path,
        output: Option<&Path>,
    ) -> Result<ProcessedDocument, AgentError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| AgentError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.process_document(path, output))
    }
}

/// `<input stem>.json`, the batch output name for `path`.
pub fn output_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    format!("{stem}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_output_names_use_the_stem() {
        assert_eq!(output_file_name(Path::new("/in/alb_001.scan.png")), "alb_001.scan.json");
        assert_eq!(output_file_name(Path::new("orden.pdf")), "orden.json");
    }
}
