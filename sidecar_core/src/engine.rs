//! The engine contract shared by the translation and OCR engines.
//!
//! Shape grounded on the `InferenceProvider` trait (async_trait, batch
//! methods with a concurrent-default implementation built from the
//! single-item method via `futures_util::future::join_all`); the status
//! vocabulary and failure modes are grounded on
//! `TranslationEngine`/`OcrEngine` in the original Python (`base.py`).

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::errors::EngineError;

/// Point-in-time state of an engine, surfaced by `HealthCheck`/`IsReady`.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub name: String,
    pub version: String,
    pub is_loaded: bool,
}

/// Anything that exposes a closed set of client-facing language codes.
pub trait LanguageAware {
    fn supported_languages(&self) -> Vec<String>;
}

/// A single text-to-text translation outcome. `confidence` is `None` when
/// the underlying model doesn't produce a usable score (NLLB-200 has none;
/// the original engine returns a sentinel `-1.0` for this case, which we
/// represent as `None` rather than propagate the sentinel).
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub text: String,
    pub confidence: Option<f32>,
}

#[async_trait]
pub trait TranslationEngine: LanguageAware + Send + Sync {
    fn status(&self) -> EngineStatus;

    async fn load(&self) -> Result<(), EngineError>;

    async fn is_ready(&self) -> bool;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationOutcome, EngineError>;

    /// Concurrent default built from `translate`, matching the pattern the
    /// pack uses for every batch-of-single-item trait method. Engines with
    /// a genuinely batched code path (this one does, via the aggregator)
    /// override it.
    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationOutcome>, EngineError> {
        let futures: Vec<_> = texts
            .iter()
            .map(|text| self.translate(text, source_lang, target_lang))
            .collect();
        join_all(futures).await.into_iter().collect()
    }
}

/// A single detected text region with its recognized content.
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    pub text: String,
    pub confidence: f32,
    /// Axis-aligned or oriented quadrilateral, clockwise from top-left, in
    /// original-image pixel coordinates.
    pub quad: [(f32, f32); 4],
    pub line_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct OcrOutcome {
    pub regions: Vec<DetectedRegion>,
    pub detection_time_ms: f64,
    pub recognition_time_ms: f64,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn status(&self) -> EngineStatus;

    async fn load(&self) -> Result<(), EngineError>;

    async fn is_ready(&self) -> bool;

    /// `image_bytes` is the raw encoded image (PNG/JPEG/...). Engines are
    /// responsible for their own size-ceiling and decode-failure handling.
    /// `preferred_languages` is a hint only - a single-vocabulary
    /// recognizer is free to ignore it; a multi-script engine may use it
    /// to pick a recognition head.
    async fn recognize(
        &self,
        image_bytes: &[u8],
        preferred_languages: &[String],
    ) -> Result<OcrOutcome, EngineError>;
}
