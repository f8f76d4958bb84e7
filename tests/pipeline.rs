//! Integration tests for the document pipeline.
//!
//! OCR engines, the LLM and (where noted) the frame decoder are replaced by
//! scripted in-process fakes, so these tests need no network, no Tesseract
//! language data and no pdfium library.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use logistics_agent::config::PreprocessConfig;
use logistics_agent::error::FrameDecodeError;
use logistics_agent::pipeline::llm::TextGenerator;
use logistics_agent::pipeline::load::FrameDecoder;
use logistics_agent::pipeline::ocr::OcrEngine;
use logistics_agent::prompts::{CLASSIFICATION_SYSTEM_PROMPT, FEEDBACK_HEADER};
use logistics_agent::{
    AgentConfig, AgentError, BoundingBox, DocumentType, EngineError, LlmError, OcrResult, Pipeline,
    PipelineObserver, Stage, ValidationStatus,
};
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

enum Behaviour {
    Text(Vec<&'static str>),
    Nothing,
    Fail,
}

struct FakeEngine {
    name: &'static str,
    behaviour: Behaviour,
    calls: Arc<AtomicU32>,
}

impl FakeEngine {
    fn boxed(name: &'static str, behaviour: Behaviour) -> (Box<dyn OcrEngine>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = FakeEngine {
            name,
            behaviour,
            calls: Arc::clone(&calls),
        };
        (Box::new(engine), calls)
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &str {
        self.name
    }

    async fn extract(
        &self,
        _frame: &DynamicImage,
        _threshold: f32,
    ) -> Result<Vec<OcrResult>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Text(lines) => Ok(lines
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let y = 40 * i as u32;
                    OcrResult::new(*t, BoundingBox::new(10, y, 400, y + 30).unwrap(), 0.9).unwrap()
                })
                .collect()),
            Behaviour::Nothing => Ok(vec![]),
            Behaviour::Fail => Err(EngineError::Recognition {
                engine: self.name.to_string(),
                detail: "engine crashed".into(),
            }),
        }
    }
}

/// Answers classification prompts with a fixed reply and extraction prompts
/// from a queue, recording every extraction prompt.
struct ScriptedLlm {
    classification: String,
    extractions: Mutex<VecDeque<String>>,
    extraction_prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(doc_type: &str, confidence: f32, extractions: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            classification: json!({
                "document_type": doc_type,
                "confidence": confidence,
                "reasoning": "scripted"
            })
            .to_string(),
            extractions: Mutex::new(extractions.into()),
            extraction_prompts: Mutex::new(vec![]),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.extraction_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedLlm {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        _temperature: f32,
        _max_tokens: Option<usize>,
    ) -> Result<String, LlmError> {
        if system_prompt == CLASSIFICATION_SYSTEM_PROMPT {
            return Ok(self.classification.clone());
        }
        self.extraction_prompts.lock().unwrap().push(prompt.to_string());
        self.extractions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Returns the given frames whatever the bytes are.
struct FixedDecoder(Vec<DynamicImage>);

impl FrameDecoder for FixedDecoder {
    fn decode(&self, _bytes: &[u8], _hint: &str) -> Result<Vec<DynamicImage>, FrameDecodeError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct StageRecorder {
    events: Mutex<Vec<String>>,
}

impl PipelineObserver for StageRecorder {
    fn on_document_start(&self, _path: &Path) {
        self.events.lock().unwrap().push("start".into());
    }
    fn on_stage(&self, _path: &Path, stage: Stage) {
        self.events.lock().unwrap().push(stage.number().to_string());
    }
    fn on_document_complete(&self, _path: &Path, _elapsed_secs: f64) {
        self.events.lock().unwrap().push("done".into());
    }
    fn on_document_error(&self, _path: &Path, _error: &str) {
        self.events.lock().unwrap().push("error".into());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const ALBARAN_TEXT: [&str; 3] = ["ALBARAN DE ENTREGA", "Nº ALB-20250115", "TOTAL 15,00"];

fn checkerboard(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        if (x / 16 + y / 16) % 2 == 0 {
            Rgb([30, 30, 30])
        } else {
            Rgb([220, 220, 220])
        }
    }))
}

/// Write a clean 820×620 scan to `dir/name`.
fn write_scan(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    checkerboard(820, 620).save(&path).unwrap();
    path
}

fn config(extraction_attempts: u32) -> AgentConfig {
    AgentConfig::builder()
        .preprocessing(PreprocessConfig::disabled())
        .llm_max_retries(0)
        .retry_backoff_ms(0)
        .extraction_attempts(extraction_attempts)
        .build()
        .unwrap()
}

fn albaran_reply(numero: &str) -> String {
    json!({
        "numero_albaran": numero,
        "fecha_emision": "15/01/2025",
        "proveedor": {"razon_social": "Distribuciones Norte SL", "cif": "B12345678"},
        "cliente": {"razon_social": "Ferreteria Sol"},
        "productos": [
            {"codigo_producto": "P-01", "descripcion": "Tornillos", "cantidad": 10,
             "precio_unitario": 1.5, "subtotal": 15.0}
        ],
        "total": 15.0,
        "firma_transportista": true
    })
    .to_string()
}

fn pipeline(
    primary: Behaviour,
    fallback: Option<Behaviour>,
    llm: Arc<ScriptedLlm>,
    attempts: u32,
) -> Pipeline {
    let (primary, _) = FakeEngine::boxed("primary-fake", primary);
    let fallback = fallback.map(|b| FakeEngine::boxed("fallback-fake", b).0);
    Pipeline::from_parts(config(attempts), primary, fallback, llm).unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn well_formed_delivery_note_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "albaran_001.png");
    let out = dir.path().join("out/albaran_001.json");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![albaran_reply("ALB-20250115")]);
    let p = pipeline(Behaviour::Text(ALBARAN_TEXT.to_vec()), None, llm.clone(), 2);

    let doc = p.process_document(&scan, Some(&out)).await.unwrap();

    assert_eq!(doc.document_type, DocumentType::Albaran);
    assert_eq!(doc.validation_status, ValidationStatus::Valid);
    assert!(doc.validation_warnings.is_empty());
    assert_eq!(doc.ocr_engine_used, "primary-fake");
    assert_eq!(doc.total_text_blocks, 3);
    assert!(doc.signatures_detected);
    assert!(!doc.stamps_detected);
    assert_eq!(doc.tables_detected, 0);
    assert_eq!(
        doc.raw_ocr_text.as_deref(),
        Some("ALBARAN DE ENTREGA Nº ALB-20250115 TOTAL 15,00")
    );
    assert_eq!(llm.prompts().len(), 1);

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(saved["validation_status"], "valid");
    assert_eq!(saved["document_type"], "ALBARAN");
    assert_eq!(saved["file_name"], "albaran_001.png");
    assert_eq!(saved["extracted_fields"]["fecha_emision"], "2025-01-15");
    assert!(saved["validation_errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn failing_primary_uses_fallback_name() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![albaran_reply("ALB-20250115")]);
    let p = pipeline(
        Behaviour::Fail,
        Some(Behaviour::Text(ALBARAN_TEXT.to_vec())),
        llm,
        2,
    );

    let doc = p.process_document(&scan, None).await.unwrap();
    assert_eq!(doc.ocr_engine_used, "fallback-fake");
}

#[tokio::test]
async fn empty_primary_result_triggers_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![albaran_reply("ALB-20250115")]);
    let (primary, primary_calls) = FakeEngine::boxed("primary-fake", Behaviour::Nothing);
    let (fallback, fallback_calls) =
        FakeEngine::boxed("fallback-fake", Behaviour::Text(ALBARAN_TEXT.to_vec()));
    let p = Pipeline::from_parts(config(2), primary, Some(fallback), llm).unwrap();

    let doc = p.process_document(&scan, None).await.unwrap();
    assert_eq!(doc.ocr_engine_used, "fallback-fake");
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ocr_failure_without_fallback_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let out = dir.path().join("a.json");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![]);
    let p = pipeline(Behaviour::Fail, None, llm.clone(), 2);

    let err = p.process_document(&scan, Some(&out)).await.unwrap_err();
    assert!(matches!(err, AgentError::OcrFailed { .. }), "{err}");
    assert!(!out.exists());
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn both_engines_failing_is_ocr_failed() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![]);
    let p = pipeline(Behaviour::Fail, Some(Behaviour::Nothing), llm, 2);

    let err = p.process_document(&scan, None).await.unwrap_err();
    match err {
        AgentError::OcrFailed { detail } => {
            assert!(detail.contains("engine crashed"));
            assert!(detail.contains("fallback-fake detected no text"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn repeated_invalid_number_fails_after_budget_with_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let out = dir.path().join("a.json");
    let llm = ScriptedLlm::new(
        "ALBARAN",
        0.95,
        vec![albaran_reply("INVALID"), albaran_reply("INVALID")],
    );
    let p = pipeline(Behaviour::Text(ALBARAN_TEXT.to_vec()), None, llm.clone(), 2);

    let err = p.process_document(&scan, Some(&out)).await.unwrap_err();
    assert!(
        matches!(err, AgentError::ExtractionFailed { attempts: 2, .. }),
        "{err}"
    );

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains(FEEDBACK_HEADER));
    assert!(prompts[1].contains(FEEDBACK_HEADER));
    assert!(prompts[1].contains("numero_albaran"));
    assert!(!out.exists());
}

#[tokio::test]
async fn low_classification_confidence_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let llm = ScriptedLlm::new("ALBARAN", 0.4, vec![albaran_reply("ALB-20250115")]);
    let p = pipeline(Behaviour::Text(ALBARAN_TEXT.to_vec()), None, llm, 2);

    let doc = p.process_document(&scan, None).await.unwrap();
    assert_eq!(doc.validation_status, ValidationStatus::Warning);
    assert_eq!(doc.validation_warnings.len(), 1);
    assert!(doc.validation_warnings[0].contains("below threshold"));
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "ALBARAN").unwrap();
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![]);
    let (primary, calls) = FakeEngine::boxed("primary-fake", Behaviour::Text(ALBARAN_TEXT.to_vec()));
    let p = Pipeline::from_parts(config(2), primary, None, llm).unwrap();

    let err = p.process_document(&path, None).await.unwrap_err();
    assert!(matches!(err, AgentError::UnsupportedFormat { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_continues_after_a_failed_document() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_scan(dir.path(), "good.png");
    let missing = dir.path().join("missing.png");
    let out_dir = dir.path().join("results");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![albaran_reply("ALB-20250115")]);
    let p = pipeline(Behaviour::Text(ALBARAN_TEXT.to_vec()), None, llm, 2);

    let results = p.process_batch(&[missing, good], Some(&out_dir)).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_name, "good.png");
    assert!(out_dir.join("good.json").exists());
    assert!(!out_dir.join("missing.json").exists());
}

#[tokio::test]
async fn observer_sees_every_stage_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![albaran_reply("ALB-20250115")]);
    let recorder = Arc::new(StageRecorder::default());
    let p = pipeline(Behaviour::Text(ALBARAN_TEXT.to_vec()), None, llm, 2)
        .with_observer(recorder.clone());

    p.process_document(&scan, None).await.unwrap();
    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["start", "1", "2", "3", "4", "5", "6", "7", "done"]
    );
}

#[tokio::test]
async fn only_the_first_page_is_read_but_all_are_checked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi.pdf");
    std::fs::write(&path, b"%PDF-1.7 placeholder").unwrap();
    let decoder = Arc::new(FixedDecoder(vec![checkerboard(820, 620), checkerboard(400, 300)]));
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![albaran_reply("ALB-20250115")]);
    let (primary, calls) = FakeEngine::boxed("primary-fake", Behaviour::Text(ALBARAN_TEXT.to_vec()));
    let p = Pipeline::from_parts(config(2), primary, None, llm)
        .unwrap()
        .with_decoder(decoder);

    let doc = p.process_document(&path, None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(doc.validation_warnings.len(), 1);
    assert!(doc.validation_warnings[0].starts_with("Page 2: Low resolution"));
}

#[tokio::test]
async fn black_frame_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("black.png");
    std::fs::write(&path, b"not decoded").unwrap();
    let decoder = Arc::new(FixedDecoder(vec![DynamicImage::ImageRgb8(RgbImage::new(820, 620))]));
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![]);
    let p = pipeline(Behaviour::Text(ALBARAN_TEXT.to_vec()), None, llm, 2).with_decoder(decoder);

    let err = p.process_document(&path, None).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidFrame { .. }));
}

#[test]
fn run_ocr_reports_the_producing_engine() {
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![]);
    let p = pipeline(Behaviour::Fail, Some(Behaviour::Text(vec!["x"])), llm, 2);
    let (blocks, engine) = tokio_test::block_on(p.run_ocr(&checkerboard(64, 64))).unwrap();
    assert_eq!(engine, "fallback-fake");
    assert_eq!(blocks[0].text(), "x");
}

#[test]
fn blocking_wrapper_processes_a_document() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(dir.path(), "a.png");
    let llm = ScriptedLlm::new("ALBARAN", 0.95, vec![albaran_reply("ALB-20250115")]);
    let p = pipeline(Behaviour::Text(ALBARAN_TEXT.to_vec()), None, llm, 2);

    let doc = p.process_document_blocking(&scan, None).unwrap();
    assert_eq!(doc.document_type, DocumentType::Albaran);
}

#[test]
fn disabled_preprocessing_is_identity() {
    use logistics_agent::pipeline::preprocess::Preprocessor;

    let frame = checkerboard(120, 90);
    let pre = Preprocessor::new(PreprocessConfig::disabled(), tracing::Span::none());
    let out = pre.preprocess(&frame).unwrap();
    assert_eq!(out.as_bytes(), frame.as_bytes());
}
