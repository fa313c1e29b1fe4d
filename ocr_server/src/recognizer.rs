//! ONNX line-recognition stage (Shape B's recognizer half).
//!
//! The original `ocr_server_hybrid.py` hands cropped line images to a
//! PyTorch/Surya `RecognitionPredictor`; no Rust binding exists for that
//! model family, so the recognizer here is a CTC-output text-line model
//! (the standard shape for a lightweight ONNX-exportable line recognizer),
//! decoded greedily against a plain-text vocabulary file - one token per
//! line, index 0 reserved for the CTC blank.

use image::{imageops::FilterType, GrayImage, RgbImage};
use ndarray::{Array3, Array4, Axis};
use once_cell::sync::OnceCell;
use onnxruntime::{environment::Environment, session::Session, GraphOptimizationLevel};

/// Fixed input height; width is resized preserving aspect ratio and
/// right-padded to the batch's longest crop.
const INPUT_HEIGHT: u32 = 32;
const MAX_INPUT_WIDTH: u32 = 1024;

static RECOGNIZER: OnceCell<Session> = OnceCell::new();
static VOCAB: OnceCell<Vec<String>> = OnceCell::new();

pub fn initialize_model(
    environment: &Environment,
    model_path: &std::path::Path,
    vocab_path: &std::path::Path,
) -> anyhow::Result<()> {
    RECOGNIZER
        .set(
            environment
                .new_session_builder()?
                .with_graph_optimization_level(GraphOptimizationLevel::All)?
                .with_model_from_file(model_path)?,
        )
        .unwrap_or_else(|_| tracing::warn!("recognition session already initialized"));

    let contents = std::fs::read_to_string(vocab_path)?;
    let mut vocab = vec!["<blank>".to_string()];
    vocab.extend(contents.lines().map(|line| line.to_string()));
    VOCAB
        .set(vocab)
        .unwrap_or_else(|_| tracing::warn!("recognizer vocabulary already initialized"));
    Ok(())
}

pub fn is_loaded() -> bool {
    RECOGNIZER.get().is_some() && VOCAB.get().is_some()
}

fn preprocess_crop(image: &RgbImage) -> Array3<f32> {
    let gray = image::imageops::grayscale(image);
    let (w, h) = gray.dimensions();
    let new_width = ((w as f32) * (INPUT_HEIGHT as f32) / (h.max(1) as f32))
        .round()
        .clamp(1.0, MAX_INPUT_WIDTH as f32) as u32;
    let resized: GrayImage =
        image::imageops::resize(&gray, new_width, INPUT_HEIGHT, FilterType::CatmullRom);

    let mut array = Array3::<f32>::zeros((1, INPUT_HEIGHT as usize, MAX_INPUT_WIDTH as usize));
    for (y, row) in resized.rows().enumerate() {
        for (x, pixel) in row.enumerate() {
            array[[0, y, x]] = pixel[0] as f32 / 255.0;
        }
    }
    array
}

/// One recognized line, with a confidence derived from the CTC path's
/// mean per-step probability at the positions that survived collapsing.
#[derive(Debug, Clone)]
pub struct RecognizedLine {
    pub text: String,
    pub confidence: f32,
}

/// Batch several cropped line images through the recognizer in one
/// `session.run`, mirroring how the batched `RecognitionPredictor` call
/// in the original is invoked once per whole list of crops.
pub fn recognize_batch(crops: &[RgbImage]) -> anyhow::Result<Vec<RecognizedLine>> {
    if crops.is_empty() {
        return Ok(Vec::new());
    }
    let session = RECOGNIZER
        .get()
        .ok_or_else(|| anyhow::anyhow!("recognition model not loaded"))?;
    let vocab = VOCAB.get().ok_or_else(|| anyhow::anyhow!("recognizer vocabulary not loaded"))?;

    let arrays: Vec<Array3<f32>> = crops.iter().map(preprocess_crop).collect();
    let batch = Array4::from_shape_fn(
        (arrays.len(), 1, INPUT_HEIGHT as usize, MAX_INPUT_WIDTH as usize),
        |(b, c, y, x)| arrays[b][[c, y, x]],
    );

    let outputs = session.run(vec![batch.into()])?;
    // [batch, time, vocab_size] log-probabilities or logits; softmax is
    // applied per-step before argmax so the confidence is a real
    // probability regardless of which the model emits.
    let logits = outputs[0].float_array()?;

    let mut results = Vec::with_capacity(crops.len());
    for row in logits.axis_iter(Axis(0)) {
        let mut tokens: Vec<usize> = Vec::new();
        let mut probs: Vec<f32> = Vec::new();
        let mut previous: Option<usize> = None;

        for step in row.axis_iter(Axis(0)) {
            let values = step.to_owned().into_raw_vec();
            let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exp_sum: f32 = values.iter().map(|&v| (v - max).exp()).sum();
            let (best_idx, best_val) = values
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, &v)| (i, v))
                .unwrap_or((0, 0.0));
            let prob = ((best_val - max).exp() / exp_sum).clamp(0.0, 1.0);

            // CTC collapse: drop blanks (id 0) and immediate repeats.
            if best_idx != 0 && Some(best_idx) != previous {
                tokens.push(best_idx);
                probs.push(prob);
            }
            previous = Some(best_idx);
        }

        let text: String = tokens
            .iter()
            .filter_map(|&id| vocab.get(id))
            .cloned()
            .collect();
        let confidence = if probs.is_empty() {
            0.0
        } else {
            probs.iter().sum::<f32>() / probs.len() as f32
        };
        results.push(RecognizedLine { text, confidence });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_crop_preserves_fixed_height() {
        let image = RgbImage::new(40, 10);
        let array = preprocess_crop(&image);
        assert_eq!(array.shape()[1], INPUT_HEIGHT as usize);
    }
}
