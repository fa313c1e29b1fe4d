//! End-to-end-ish tests for `OcrServicer` against a stub engine, exercising
//! the image-size ceiling, zero-region success, and error-to-status mapping
//! without any real ONNX model.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::Request;

use ocr_server::proto::ocr_service_server::OcrService;
use ocr_server::proto::{OcrIsReadyRequest, OcrRequest};
use ocr_server::service::OcrServicer;
use sidecar_core::engine::{DetectedRegion, EngineStatus, OcrEngine, OcrOutcome};
use sidecar_core::errors::EngineError;

struct StubEngine {
    regions: Vec<DetectedRegion>,
}

#[async_trait]
impl OcrEngine for StubEngine {
    fn status(&self) -> EngineStatus {
        EngineStatus {
            name: "stub-ocr".to_string(),
            version: "0".to_string(),
            is_loaded: true,
        }
    }

    async fn load(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn recognize(
        &self,
        image_bytes: &[u8],
        _preferred_languages: &[String],
    ) -> Result<OcrOutcome, EngineError> {
        if image_bytes == b"corrupt" {
            return Err(EngineError::InvalidInput("can't decode image".to_string()));
        }
        Ok(OcrOutcome {
            regions: self.regions.clone(),
            detection_time_ms: 1.0,
            recognition_time_ms: 2.0,
        })
    }
}

fn servicer(regions: Vec<DetectedRegion>) -> OcrServicer {
    OcrServicer::new(Arc::new(StubEngine { regions }))
}

#[tokio::test]
async fn recognize_returns_ordered_regions() {
    let servicer = servicer(vec![
        DetectedRegion {
            text: "top line".to_string(),
            confidence: 0.95,
            quad: [(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (0.0, 5.0)],
            line_index: 0,
        },
        DetectedRegion {
            text: "bottom line".to_string(),
            confidence: 0.8,
            quad: [(0.0, 10.0), (10.0, 10.0), (10.0, 15.0), (0.0, 15.0)],
            line_index: 1,
        },
    ]);

    let request = Request::new(OcrRequest {
        request_id: "req-1".to_string(),
        image_data: vec![1, 2, 3],
        languages: vec![],
        timestamp: None,
    });

    let response = servicer.recognize(request).await.unwrap().into_inner();
    assert!(response.is_success);
    assert_eq!(response.regions.len(), 2);
    assert_eq!(response.regions[0].text, "top line");
    assert_eq!(response.regions[1].text, "bottom line");
    assert_eq!(response.regions[0].bounding_box.as_ref().unwrap().points.len(), 4);
}

#[tokio::test]
async fn recognize_empty_image_is_success_with_no_regions() {
    let servicer = servicer(vec![]);
    let request = Request::new(OcrRequest {
        request_id: "req-2".to_string(),
        image_data: vec![1, 2, 3],
        languages: vec![],
        timestamp: None,
    });
    let response = servicer.recognize(request).await.unwrap().into_inner();
    assert!(response.is_success);
    assert!(response.regions.is_empty());
}

#[tokio::test]
async fn recognize_rejects_oversize_payload_without_calling_engine() {
    let servicer = servicer(vec![]);
    let oversize = vec![0u8; 11 * 1024 * 1024];
    let request = Request::new(OcrRequest {
        request_id: "req-3".to_string(),
        image_data: oversize,
        languages: vec![],
        timestamp: None,
    });
    let status = servicer.recognize(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn recognize_maps_decode_failure_to_invalid_argument() {
    let servicer = servicer(vec![]);
    let request = Request::new(OcrRequest {
        request_id: "req-4".to_string(),
        image_data: b"corrupt".to_vec(),
        languages: vec![],
        timestamp: None,
    });
    let status = servicer.recognize(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn is_ready_reports_engine_identity() {
    let servicer = servicer(vec![]);
    let response = servicer
        .is_ready(Request::new(OcrIsReadyRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert!(response.is_ready);
    assert_eq!(response.details.get("engine").unwrap(), "stub-ocr");
}
