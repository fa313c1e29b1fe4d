//! `OcrService` gRPC servicer.
//!
//! RPC surface and control flow grounded on
//! `ocr_server_hybrid.py::OcrServiceServicer`: one recognition method plus
//! `HealthCheck`/`IsReady`, validating the encoded-size ceiling *before*
//! decoding (so an 11 MiB payload never reaches `image::load_from_memory`),
//! then forwarding to the engine and mapping failures through the shared
//! `EngineError -> tonic::Status` conversion in `sidecar_core::errors`.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use sidecar_core::engine::OcrEngine;
use sidecar_core::metrics::CallMetrics;

use crate::engine::MAX_IMAGE_BYTES;
use crate::proto::ocr_service_server::OcrService;
use crate::proto::{
    BoundingBox, DetectedRegion, OcrHealthCheckRequest, OcrHealthCheckResponse,
    OcrIsReadyRequest, OcrIsReadyResponse, OcrRequest, OcrResponse, Point,
};

pub struct OcrServicer {
    engine: Arc<dyn OcrEngine>,
    metrics: CallMetrics,
}

impl OcrServicer {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            engine,
            metrics: CallMetrics::default(),
        }
    }
}

fn now() -> prost_types::Timestamp {
    let now = chrono::Utc::now();
    prost_types::Timestamp {
        seconds: now.timestamp(),
        nanos: now.timestamp_subsec_nanos() as i32,
    }
}

fn to_wire_region(region: sidecar_core::engine::DetectedRegion) -> DetectedRegion {
    let xs: Vec<f32> = region.quad.iter().map(|p| p.0).collect();
    let ys: Vec<f32> = region.quad.iter().map(|p| p.1).collect();
    let min_x = xs.iter().cloned().fold(f32::INFINITY, f32::min);
    let max_x = xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let min_y = ys.iter().cloned().fold(f32::INFINITY, f32::min);
    let max_y = ys.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    DetectedRegion {
        text: region.text,
        confidence: region.confidence,
        line_index: region.line_index as i32,
        bounding_box: Some(BoundingBox {
            x: min_x.round() as i32,
            y: min_y.round() as i32,
            width: (max_x - min_x).round() as i32,
            height: (max_y - min_y).round() as i32,
            points: region.quad.iter().map(|&(x, y)| Point { x, y }).collect(),
        }),
    }
}

#[tonic::async_trait]
impl OcrService for OcrServicer {
    async fn recognize(&self, request: Request<OcrRequest>) -> Result<Response<OcrResponse>, Status> {
        let mut timer = self.metrics.start();
        let req = request.into_inner();
        let started = std::time::Instant::now();
        tracing::info!(
            "Recognize RPC called - request_id: {}, bytes: {}",
            req.request_id,
            req.image_data.len()
        );

        if req.image_data.len() > MAX_IMAGE_BYTES {
            timer.mark_failed();
            timer.finish();
            return Err(Status::invalid_argument(format!(
                "image size {} bytes exceeds ceiling {} bytes",
                req.image_data.len(),
                MAX_IMAGE_BYTES
            )));
        }

        match self.engine.recognize(&req.image_data, &req.languages).await {
            Ok(outcome) => {
                let processing_time_ms = started.elapsed().as_millis() as i64;
                let status = self.engine.status();
                tracing::info!(
                    "Recognize succeeded - request_id: {}, regions: {}, time: {}ms",
                    req.request_id,
                    outcome.regions.len(),
                    processing_time_ms,
                );
                Ok(Response::new(OcrResponse {
                    request_id: req.request_id,
                    is_success: true,
                    regions: outcome.regions.into_iter().map(to_wire_region).collect(),
                    processing_time_ms,
                    detection_time_ms: outcome.detection_time_ms.round() as i64,
                    recognition_time_ms: outcome.recognition_time_ms.round() as i64,
                    engine_name: status.name,
                    engine_version: status.version,
                    error: None,
                    timestamp: Some(now()),
                }))
            }
            Err(err) => {
                timer.mark_failed();
                timer.finish();
                Err(err.into())
            }
        }
    }

    async fn health_check(
        &self,
        _request: Request<OcrHealthCheckRequest>,
    ) -> Result<Response<OcrHealthCheckResponse>, Status> {
        let status = self.engine.status();
        let is_healthy = status.is_loaded;
        let mut details: std::collections::HashMap<String, String> = Default::default();
        details.insert("engine".to_string(), status.name.clone());
        details.insert("version".to_string(), status.version.clone());
        for (key, value) in self.metrics.snapshot().as_details() {
            details.insert(key.to_string(), value);
        }
        Ok(Response::new(OcrHealthCheckResponse {
            is_healthy,
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            details,
            timestamp: Some(now()),
        }))
    }

    async fn is_ready(
        &self,
        _request: Request<OcrIsReadyRequest>,
    ) -> Result<Response<OcrIsReadyResponse>, Status> {
        let is_ready = self.engine.is_ready().await;
        let status = self.engine.status();
        let mut details: std::collections::HashMap<String, String> = Default::default();
        details.insert("engine".to_string(), status.name);
        details.insert("version".to_string(), status.version);
        tracing::info!("IsReady: {is_ready}");
        Ok(Response::new(OcrIsReadyResponse {
            is_ready,
            status: if is_ready { "ready" } else { "loading" }.to_string(),
            details,
            timestamp: Some(now()),
        }))
    }
}
