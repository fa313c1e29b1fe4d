//! ONNX line-detection stage (Shape B's detector half).
//!
//! Grounded line-for-line on `onnx_detection.py::OnnxDetectionEngine`:
//! same input size (1024), same ImageNet normalization, same sigmoid +
//! 0.5 threshold over the output segmentation mask, same
//! "minimum-area-rectangle per connected component" extraction and
//! `MIN_BBOX_SIZE`/y-ascending sort. No OpenCV binding is available, so
//! `cv2.findContours`/`cv2.minAreaRect` are re-expressed here as a
//! flood-fill connected-components pass over the thresholded mask
//! followed by a convex hull (monotone chain) and rotating-calipers
//! minimum-area rectangle - the textbook algorithm `cv2.minAreaRect`
//! itself implements.

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{Array3, ArrayView2, Axis};
use nshare::ToNdarray3;
use once_cell::sync::OnceCell;
use onnxruntime::{environment::Environment, session::Session, GraphOptimizationLevel};

/// Detection model's square input side, matching `INPUT_SIZE = 1024`.
pub const INPUT_SIZE: u32 = 1024;
const DETECTION_THRESHOLD: f32 = 0.5;
/// Noise filter, in original-image pixels, matching `MIN_BBOX_SIZE = 10`.
const MIN_BBOX_SIZE: f32 = 10.0;

static DETECTOR: OnceCell<Session> = OnceCell::new();

pub fn initialize_model(environment: &Environment, model_path: &std::path::Path) -> onnxruntime::Result<()> {
    DETECTOR
        .set(
            environment
                .new_session_builder()?
                .with_graph_optimization_level(GraphOptimizationLevel::All)?
                .with_model_from_file(model_path)?,
        )
        .unwrap_or_else(|_| tracing::warn!("detection session already initialized"));
    Ok(())
}

pub fn is_loaded() -> bool {
    DETECTOR.get().is_some()
}

/// One raw detection in original-image pixel coordinates, before text is
/// recognized.
#[derive(Debug, Clone)]
pub struct RawDetection {
    /// Axis-aligned `(x1, y1, x2, y2)`.
    pub bbox: (f32, f32, f32, f32),
    /// Oriented quad, four points, not yet ordered clockwise.
    pub polygon: [(f32, f32); 4],
    pub confidence: f32,
}

/// Resize the longest side to `INPUT_SIZE` preserving aspect ratio, then
/// paste into a black `INPUT_SIZE x INPUT_SIZE` canvas top-left, matching
/// `preprocess`. Returns the CHW-normalized array plus the scale factor
/// applied before padding.
pub fn preprocess(image: &RgbImage) -> (Array3<f32>, f32) {
    let (width, height) = (image.width(), image.height());
    let max_dim = width.max(height) as f32;
    let scale = INPUT_SIZE as f32 / max_dim;
    let new_width = (width as f32 * scale) as u32;
    let new_height = (height as f32 * scale) as u32;

    let resized = DynamicImage::ImageRgb8(image.clone()).resize_exact(
        new_width.max(1),
        new_height.max(1),
        FilterType::Lanczos3,
    );

    let mut canvas = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
    image::imageops::replace(&mut canvas, &resized.to_rgb8(), 0, 0);

    // `into_ndarray3()` + mean/std broadcast, ImageNet stats in place
    // of CLIP's.
    let arr = canvas.into_ndarray3().mapv(|x| x as f32) / 255.0;
    let mean: Array3<f32> = ndarray::arr3(&[[[0.485]], [[0.456]], [[0.406]]]);
    let std: Array3<f32> = ndarray::arr3(&[[[0.229]], [[0.224]], [[0.225]]]);
    let array = (arr - mean) / std;
    (array, scale)
}

pub fn run_session(input: Array3<f32>) -> anyhow::Result<ndarray::Array2<f32>> {
    let session = DETECTOR
        .get()
        .ok_or_else(|| anyhow::anyhow!("detection model not loaded"))?;
    let batched = input.insert_axis(Axis(0));
    let outputs = session.run(vec![batched.into()])?;
    let mask = outputs[0].float_array()?;
    // [1, classes, H, W] -> class 0 is the text-region channel.
    let first_class = mask.index_axis(Axis(0), 0).index_axis(Axis(0), 0);
    Ok(first_class.to_owned())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// BFS connected-components over the thresholded mask.
fn connected_components(binary: &ndarray::Array2<bool>) -> Vec<Vec<(usize, usize)>> {
    let (h, w) = binary.dim();
    let mut visited = ndarray::Array2::from_elem((h, w), false);
    let mut components = Vec::new();

    for y0 in 0..h {
        for x0 in 0..w {
            if visited[[y0, x0]] || !binary[[y0, x0]] {
                continue;
            }
            let mut stack = vec![(y0, x0)];
            visited[[y0, x0]] = true;
            let mut component = Vec::new();
            while let Some((y, x)) = stack.pop() {
                component.push((y, x));
                let neighbors: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
                for (dy, dx) in neighbors {
                    let ny = y as isize + dy;
                    let nx = x as isize + dx;
                    if ny < 0 || nx < 0 || ny as usize >= h || nx as usize >= w {
                        continue;
                    }
                    let (ny, nx) = (ny as usize, nx as usize);
                    if !visited[[ny, nx]] && binary[[ny, nx]] {
                        visited[[ny, nx]] = true;
                        stack.push((ny, nx));
                    }
                }
            }
            components.push(component);
        }
    }
    components
}

/// Andrew's monotone chain convex hull over integer pixel coordinates.
fn convex_hull(points: &[(f32, f32)]) -> Vec<(f32, f32)> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.partial_cmp(&b.1).unwrap()));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    fn cross(o: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }

    let mut lower: Vec<(f32, f32)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f32, f32)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Rotating calipers: the minimum-area rectangle touching one hull edge
/// at a time, returned as four corners, matching `cv2.minAreaRect` +
/// `cv2.boxPoints`.
fn min_area_rect(hull: &[(f32, f32)]) -> [(f32, f32); 4] {
    if hull.len() < 3 {
        let (x1, y1) = hull.first().copied().unwrap_or((0.0, 0.0));
        let (x2, y2) = hull.last().copied().unwrap_or((x1, y1));
        let min_x = x1.min(x2);
        let max_x = x1.max(x2).max(min_x + 1.0);
        let min_y = y1.min(y2);
        let max_y = y1.max(y2).max(min_y + 1.0);
        return [(min_x, min_y), (max_x, min_y), (max_x, max_y), (min_x, max_y)];
    }

    let mut best_area = f32::INFINITY;
    let mut best_rect = [(0.0, 0.0); 4];

    for i in 0..hull.len() {
        let p0 = hull[i];
        let p1 = hull[(i + 1) % hull.len()];
        let edge = (p1.0 - p0.0, p1.1 - p0.1);
        let edge_len = (edge.0 * edge.0 + edge.1 * edge.1).sqrt();
        if edge_len < 1e-6 {
            continue;
        }
        let axis_u = (edge.0 / edge_len, edge.1 / edge_len);
        let axis_v = (-axis_u.1, axis_u.0);

        let (mut min_u, mut max_u, mut min_v, mut max_v) =
            (f32::INFINITY, f32::NEG_INFINITY, f32::INFINITY, f32::NEG_INFINITY);
        for &(x, y) in hull {
            let rel = (x - p0.0, y - p0.1);
            let u = rel.0 * axis_u.0 + rel.1 * axis_u.1;
            let v = rel.0 * axis_v.0 + rel.1 * axis_v.1;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let area = (max_u - min_u) * (max_v - min_v);
        if area < best_area {
            best_area = area;
            let corners_uv = [(min_u, min_v), (max_u, min_v), (max_u, max_v), (min_u, max_v)];
            for (i, (u, v)) in corners_uv.into_iter().enumerate() {
                best_rect[i] = (
                    p0.0 + u * axis_u.0 + v * axis_v.0,
                    p0.1 + u * axis_u.1 + v * axis_v.1,
                );
            }
        }
    }
    best_rect
}

/// Extract oriented detections from a thresholded segmentation mask,
/// mapping mask-space coordinates back to the **original** image's pixel
/// system via `inv_scale`, matching `postprocess`'s `inv_scale = 1/scale*4`
/// (the `*4` accounts for the detector's 1/4-resolution output stride).
pub fn postprocess(
    mask: ArrayView2<f32>,
    scale: f32,
    original_width: u32,
    original_height: u32,
) -> Vec<RawDetection> {
    let activated = mask.mapv(sigmoid);
    let binary = activated.mapv(|v| v > DETECTION_THRESHOLD);

    let mask_stride = INPUT_SIZE as f32 / mask.shape()[0] as f32;
    let inv_scale = (1.0 / scale) * mask_stride;

    let mut results = Vec::new();
    for component in connected_components(&binary) {
        if component.len() < 2 {
            continue;
        }
        let points: Vec<(f32, f32)> = component.iter().map(|&(y, x)| (x as f32, y as f32)).collect();
        let hull = convex_hull(&points);
        let quad = min_area_rect(&hull);

        let xs = quad.iter().map(|p| p.0).collect::<Vec<_>>();
        let ys = quad.iter().map(|p| p.1).collect::<Vec<_>>();
        let (min_x, max_x) = (xs.iter().cloned().fold(f32::INFINITY, f32::min), xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max));
        let (min_y, max_y) = (ys.iter().cloned().fold(f32::INFINITY, f32::min), ys.iter().cloned().fold(f32::NEG_INFINITY, f32::max));

        let orig_quad = quad.map(|(x, y)| {
            (
                (x * inv_scale).clamp(0.0, original_width as f32),
                (y * inv_scale).clamp(0.0, original_height as f32),
            )
        });
        let x1 = (min_x * inv_scale).clamp(0.0, original_width as f32);
        let y1 = (min_y * inv_scale).clamp(0.0, original_height as f32);
        let x2 = (max_x * inv_scale).clamp(0.0, original_width as f32);
        let y2 = (max_y * inv_scale).clamp(0.0, original_height as f32);

        if (x2 - x1) < MIN_BBOX_SIZE || (y2 - y1) < MIN_BBOX_SIZE {
            continue;
        }

        let confidence = {
            let y_lo = min_y.max(0.0) as usize;
            let y_hi = (max_y.min((mask.shape()[0] - 1) as f32) as usize).max(y_lo);
            let x_lo = min_x.max(0.0) as usize;
            let x_hi = (max_x.min((mask.shape()[1] - 1) as f32) as usize).max(x_lo);
            let region = activated.slice(ndarray::s![y_lo..=y_hi, x_lo..=x_hi]);
            if region.is_empty() {
                0.5
            } else {
                region.mean().unwrap_or(0.5).clamp(0.0, 1.0)
            }
        };

        results.push(RawDetection {
            bbox: (x1, y1, x2, y2),
            polygon: orig_quad,
            confidence,
        });
    }

    // Top-to-bottom, tie-break left-to-right reading order.
    results.sort_by(|a, b| {
        a.bbox
            .1
            .partial_cmp(&b.bbox.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.bbox.0.partial_cmp(&b.bbox.0).unwrap_or(std::cmp::Ordering::Equal))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convex_hull_of_square_is_four_corners() {
        let points = vec![(0.0, 0.0), (0.0, 5.0), (5.0, 0.0), (5.0, 5.0), (2.0, 2.0)];
        let hull = convex_hull(&points);
        assert_eq!(hull.len(), 4);
    }

    #[test]
    fn min_area_rect_of_axis_aligned_square_has_right_area() {
        let hull = convex_hull(&[(0.0, 0.0), (0.0, 4.0), (4.0, 0.0), (4.0, 4.0)]);
        let rect = min_area_rect(&hull);
        let dx = rect[1].0 - rect[0].0;
        let dy = rect[1].1 - rect[0].1;
        let side = (dx * dx + dy * dy).sqrt();
        assert!((side - 4.0).abs() < 1e-3);
    }

    #[test]
    fn postprocess_filters_noise_below_min_size() {
        let mut mask = ndarray::Array2::<f32>::from_elem((16, 16), -10.0);
        mask[[5, 5]] = 10.0; // single activated pixel: too small to survive
        let detections = postprocess(mask.view(), 1.0, 64, 64);
        assert!(detections.is_empty());
    }
}
