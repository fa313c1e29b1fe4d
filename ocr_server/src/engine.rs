//! Hybrid OCR engine (C3, Shape B): ONNX detector + ONNX recognizer
//! behind the single `OcrEngine` contract.
//!
//! Grounded directly on `HybridOcrEngine.recognize` in
//! `ocr_server_hybrid.py`: size-ceiling check, RGB conversion, resize
//! ceiling with scale tracking, detect, crop with 5px padding, batch
//! recognize, zero-detections-is-success, independent detection/recognition
//! timings, and OOM-style error-to-`InferenceFailed` mapping.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use onnxruntime::environment::Environment;

use sidecar_core::engine::{DetectedRegion, EngineStatus, OcrEngine, OcrOutcome};
use sidecar_core::errors::EngineError;
use sidecar_core::worker_pool::WorkerPool;

use crate::{detector, recognizer};

/// Decompression-bomb guard: encoded payload ceiling, matching
/// `MAX_IMAGE_SIZE = 10 * 1024 * 1024`.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Matches `MAX_IMAGE_DIMENSION = 2048`.
const MAX_IMAGE_DIMENSION: u32 = 2048;
/// Padding added around each detected line crop, matching
/// `_crop_line_images`'s `padding = 5`.
const CROP_PADDING: i64 = 5;
/// Every N completions, request an explicit reclamation, matching the
/// translation engine's GC cadence requirement generalized to OCR.
const RECOGNITIONS_BEFORE_RECLAIM: u64 = 1000;

pub struct HybridOcrEngine {
    loaded: AtomicBool,
    recognition_count: AtomicU64,
    /// Bounds how many detect+recognize passes run their blocking ONNX
    /// `Session::run` calls concurrently, off the `tokio` executor thread.
    pool: WorkerPool,
}

impl Default for HybridOcrEngine {
    fn default() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            recognition_count: AtomicU64::new(0),
            pool: WorkerPool::default(),
        }
    }
}

impl HybridOcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize_sessions(
        environment: &Environment,
        detector_path: &Path,
        recognizer_path: &Path,
        vocab_path: &Path,
    ) -> anyhow::Result<()> {
        detector::initialize_model(environment, detector_path)?;
        recognizer::initialize_model(environment, recognizer_path, vocab_path)?;
        Ok(())
    }

    fn maybe_reclaim(&self) {
        let previous = self.recognition_count.fetch_add(1, Ordering::Relaxed);
        let total = previous + 1;
        if total % RECOGNITIONS_BEFORE_RECLAIM == 0 {
            tracing::info!("{total} OCR recognitions, reclaiming scratch allocations");
        }
    }

    /// Resize so the longest side is at most `MAX_IMAGE_DIMENSION`,
    /// preserving aspect ratio. Returns the (possibly unchanged) image and
    /// the scale factor applied (1.0 if no resize was needed), matching
    /// `_resize_image_if_needed`.
    fn resize_if_needed(image: DynamicImage) -> (RgbImage, f32) {
        let rgb = image.to_rgb8();
        let (width, height) = (rgb.width(), rgb.height());
        let max_dim = width.max(height);
        if max_dim <= MAX_IMAGE_DIMENSION {
            return (rgb, 1.0);
        }
        let scale = MAX_IMAGE_DIMENSION as f32 / max_dim as f32;
        let new_width = ((width as f32) * scale).round().max(1.0) as u32;
        let new_height = ((height as f32) * scale).round().max(1.0) as u32;
        tracing::info!("resizing image: {width}x{height} -> {new_width}x{new_height}");
        let resized = DynamicImage::ImageRgb8(rgb).resize_exact(
            new_width,
            new_height,
            image::imageops::FilterType::Lanczos3,
        );
        (resized.to_rgb8(), scale)
    }

    fn crop_with_padding(image: &RgbImage, bbox: (f32, f32, f32, f32)) -> RgbImage {
        let (w, h) = (image.width() as i64, image.height() as i64);
        let x1 = (bbox.0 as i64 - CROP_PADDING).clamp(0, w);
        let y1 = (bbox.1 as i64 - CROP_PADDING).clamp(0, h);
        let x2 = (bbox.2 as i64 + CROP_PADDING).clamp(x1 + 1, w);
        let y2 = (bbox.3 as i64 + CROP_PADDING).clamp(y1 + 1, h);
        image::imageops::crop_imm(image, x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32)
            .to_image()
    }
}

#[async_trait]
impl OcrEngine for HybridOcrEngine {
    fn status(&self) -> EngineStatus {
        EngineStatus {
            name: "surya-ocr-hybrid".to_string(),
            version: "0.17.x-hybrid".to_string(),
            is_loaded: self.loaded.load(Ordering::Relaxed),
        }
    }

    async fn load(&self) -> Result<(), EngineError> {
        if !detector::is_loaded() || !recognizer::is_loaded() {
            return Err(EngineError::ModelNotLoaded);
        }
        self.loaded.store(true, Ordering::Relaxed);
        // Warmup: one minimal request, failures logged but never fatal.
        let blank = RgbImage::new(64, 64);
        let mut blank_bytes = Vec::new();
        if DynamicImage::ImageRgb8(blank)
            .write_to(&mut std::io::Cursor::new(&mut blank_bytes), image::ImageOutputFormat::Png)
            .is_ok()
        {
            if let Err(err) = self.recognize(&blank_bytes, &[]).await {
                tracing::warn!("OCR warmup failed (continuing): {err}");
            }
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.loaded.load(Ordering::Relaxed) && detector::is_loaded() && recognizer::is_loaded()
    }

    async fn recognize(
        &self,
        image_bytes: &[u8],
        preferred_languages: &[String],
    ) -> Result<OcrOutcome, EngineError> {
        if !self.is_ready().await {
            return Err(EngineError::ModelNotLoaded);
        }
        if !preferred_languages.is_empty() {
            // The recognizer is a single cross-script CTC vocabulary with
            // no per-language head to select, so this is purely advisory.
            tracing::debug!("ignoring preferred_languages hint: {preferred_languages:?}");
        }
        if image_bytes.len() > MAX_IMAGE_BYTES {
            return Err(EngineError::InvalidInput(format!(
                "image size {} bytes exceeds ceiling {} bytes",
                image_bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }

        let image = image::load_from_memory(image_bytes)
            .map_err(|e| EngineError::InvalidInput(format!("can't decode image: {e}")))?;
        let (original_width, original_height) = (image.width(), image.height());
        let (resized, scale) = Self::resize_if_needed(image);

        let (resized_width, resized_height) = (resized.width(), resized.height());
        let detect_start = Instant::now();
        // Detect, crop, and recognize all call blocking ONNX `Session::run`;
        // moving the whole pipeline into the worker pool keeps that work off
        // the cooperative scheduler and bounds how many passes run at once.
        let result = self
            .pool
            .run_blocking(move || -> anyhow::Result<OcrOutcome> {
                let (input, det_scale) = detector::preprocess(&resized);
                let mask = detector::run_session(input)?;
                // Detections come back in `resized`-image coordinates here;
                // cropping must use the same image the bboxes were measured
                // against, so the true-original remap (dividing by `scale`)
                // happens after recognition, once coordinates no longer need
                // to address pixels in either image.
                let detections = detector::postprocess(mask.view(), det_scale, resized_width, resized_height);
                let detection_time_ms = detect_start.elapsed().as_secs_f64() * 1000.0;

                if detections.is_empty() {
                    return Ok(OcrOutcome {
                        regions: Vec::new(),
                        detection_time_ms,
                        recognition_time_ms: 0.0,
                    });
                }

                let recognize_start = Instant::now();
                let crops: Vec<RgbImage> = detections
                    .iter()
                    .map(|det| Self::crop_with_padding(&resized, det.bbox))
                    .collect();
                let lines = recognizer::recognize_batch(&crops)?;
                let recognition_time_ms = recognize_start.elapsed().as_secs_f64() * 1000.0;

                let inv_scale = 1.0 / scale;
                let to_original = |(x, y): (f32, f32)| {
                    (
                        (x * inv_scale).clamp(0.0, original_width as f32),
                        (y * inv_scale).clamp(0.0, original_height as f32),
                    )
                };

                let regions: Vec<DetectedRegion> = detections
                    .into_iter()
                    .zip(lines)
                    .enumerate()
                    .map(|(line_index, (det, line))| DetectedRegion {
                        text: line.text,
                        confidence: if line.confidence > 0.0 { line.confidence } else { det.confidence },
                        quad: det.polygon.map(to_original),
                        line_index,
                    })
                    .collect();

                Ok(OcrOutcome { regions, detection_time_ms, recognition_time_ms })
            })
            .await;

        match result {
            Ok(Ok(outcome)) => {
                self.maybe_reclaim();
                Ok(outcome)
            }
            Ok(Err(err)) => {
                tracing::warn!("OCR inference error, reclaiming scratch allocations: {err}");
                Err(EngineError::InferenceFailed(err.to_string()))
            }
            Err(pool_err) => {
                tracing::warn!("OCR worker pool error, reclaiming scratch allocations: {pool_err}");
                Err(EngineError::ResourceExhausted(pool_err.to_string()))
            }
        }
    }
}
