//! `TranslationService` gRPC servicer.
//!
//! RPC surface and control flow grounded on
//! `translation_server.py::TranslationServicer`: four methods
//! (`Translate`, `TranslateBatch`, `HealthCheck`, `IsReady`), each
//! validating input, forwarding to the engine, and mapping engine
//! failures onto status codes - `tonic::Status` (via `EngineError`'s
//! `From` impl in `sidecar_core::errors`) standing in for the original's
//! `context.set_code(...)`/`context.set_details(...)` calls.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use sidecar_core::engine::TranslationEngine;
use sidecar_core::errors::{EngineError, WireErrorKind};
use sidecar_core::metrics::CallMetrics;
use sidecar_core::status::HealthStatus;

use crate::aggregator::{self, VramHeadroom};
use crate::proto::translation_service_server::TranslationService;
use crate::proto::{
    BatchTranslateRequest, BatchTranslateResponse, HealthCheckRequest, HealthCheckResponse,
    IsReadyRequest, IsReadyResponse, TranslateRequest, TranslateResponse, TranslationError,
};

const MAX_BATCH_SIZE: usize = 32;

pub struct TranslationServicer {
    engine: Arc<dyn TranslationEngine>,
    metrics: CallMetrics,
    use_aggregator: bool,
}

impl TranslationServicer {
    pub fn new(engine: Arc<dyn TranslationEngine>, use_aggregator: bool) -> Self {
        Self {
            engine,
            metrics: CallMetrics::default(),
            use_aggregator,
        }
    }

    async fn translate_one(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<sidecar_core::engine::TranslationOutcome, EngineError> {
        if self.use_aggregator {
            aggregator::translate_via_aggregator(
                text.to_string(),
                source_lang.to_string(),
                target_lang.to_string(),
                VramHeadroom::Mid,
            )
            .await
        } else {
            self.engine.translate(text, source_lang, target_lang).await
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

#[tonic::async_trait]
impl TranslationService for TranslationServicer {
    async fn translate(
        &self,
        request: Request<TranslateRequest>,
    ) -> Result<Response<TranslateResponse>, Status> {
        let mut timer = self.metrics.start();
        let req = request.into_inner();
        let started = std::time::Instant::now();
        tracing::info!("Translate RPC called - request_id: {}", req.request_id);

        let source_language = req.source_language.clone().unwrap_or_default();
        let target_language = req.target_language.clone().unwrap_or_default();

        if req.source_text.trim().is_empty() {
            timer.mark_failed();
            timer.finish();
            return Err(EngineError::InvalidInput("source_text must not be empty".to_string()).into());
        }

        let outcome = self
            .translate_one(&req.source_text, &source_language.code, &target_language.code)
            .await;

        match outcome {
            Ok(outcome) => {
                let engine_status = self.engine.status();
                let processing_time_ms = started.elapsed().as_millis() as i64;
                tracing::info!(
                    "Translation succeeded - request_id: {}, time: {}ms",
                    req.request_id,
                    processing_time_ms,
                );
                Ok(Response::new(TranslateResponse {
                    request_id: req.request_id,
                    source_text: req.source_text,
                    translated_text: outcome.text,
                    source_language: Some(source_language),
                    target_language: Some(target_language),
                    engine_name: engine_status.name,
                    engine_version: engine_status.version,
                    confidence_score: outcome.confidence.unwrap_or(-1.0),
                    processing_time_ms,
                    is_success: true,
                    error: None,
                    metadata: Default::default(),
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

    async fn translate_batch(
        &self,
        request: Request<BatchTranslateRequest>,
    ) -> Result<Response<BatchTranslateResponse>, Status> {
        let req = request.into_inner();
        let batch_size = req.requests.len();
        tracing::info!(
            "TranslateBatch RPC called - batch_id: {}, size: {}",
            req.batch_id,
            batch_size
        );

        if batch_size == 0 {
            return Err(Status::invalid_argument("empty batch"));
        }
        if batch_size > MAX_BATCH_SIZE {
            return Err(EngineError::BatchSizeExceeded {
                size: batch_size,
                max: MAX_BATCH_SIZE,
            }
            .into());
        }

        let started = std::time::Instant::now();
        let engine_status = self.engine.status();

        // A batch can mix language pairs; group request indices by
        // (source, target) so each pair gets exactly one
        // `engine.translate_batch` call, then scatter results back into
        // their original positions. A group's failure only fails that
        // group's items, not the whole RPC.
        let mut groups: std::collections::HashMap<(String, String), Vec<usize>> =
            std::collections::HashMap::new();
        for (idx, item) in req.requests.iter().enumerate() {
            let src = item.source_language.clone().unwrap_or_default().code;
            let tgt = item.target_language.clone().unwrap_or_default().code;
            groups.entry((src, tgt)).or_default().push(idx);
        }

        let mut slots: Vec<Option<Result<sidecar_core::engine::TranslationOutcome, (WireErrorKind, String)>>> =
            (0..batch_size).map(|_| None).collect();

        for ((source_lang, target_lang), indices) in groups {
            let texts: Vec<String> = indices.iter().map(|&i| req.requests[i].source_text.clone()).collect();
            match self.engine.translate_batch(&texts, &source_lang, &target_lang).await {
                Ok(outcomes) => {
                    for (&i, outcome) in indices.iter().zip(outcomes) {
                        slots[i] = Some(Ok(outcome));
                    }
                }
                Err(err) => {
                    let kind = WireErrorKind::from(&err);
                    let message = err.to_string();
                    for i in indices {
                        slots[i] = Some(Err((kind, message.clone())));
                    }
                }
            }
        }

        let processing_time_ms = started.elapsed().as_millis() as i64;
        let per_item_time = processing_time_ms / batch_size as i64;
        let mut failure_count = 0i32;

        let responses: Vec<TranslateResponse> = req
            .requests
            .into_iter()
            .zip(slots)
            .map(|(item, slot)| {
                match slot.expect("every batch index is assigned exactly one outcome") {
                    Ok(outcome) => TranslateResponse {
                        request_id: item.request_id,
                        source_text: item.source_text,
                        translated_text: outcome.text,
                        source_language: item.source_language,
                        target_language: item.target_language,
                        engine_name: engine_status.name.clone(),
                        engine_version: engine_status.version.clone(),
                        confidence_score: outcome.confidence.unwrap_or(-1.0),
                        processing_time_ms: per_item_time,
                        is_success: true,
                        error: None,
                        metadata: Default::default(),
                        timestamp: Some(now()),
                    },
                    Err((kind, message)) => {
                        failure_count += 1;
                        TranslateResponse {
                            request_id: item.request_id,
                            source_text: item.source_text,
                            translated_text: String::new(),
                            source_language: item.source_language,
                            target_language: item.target_language,
                            engine_name: engine_status.name.clone(),
                            engine_version: engine_status.version.clone(),
                            confidence_score: -1.0,
                            processing_time_ms: per_item_time,
                            is_success: false,
                            error: Some(TranslationError {
                                error_code: kind.as_str().to_string(),
                                message,
                                is_retryable: kind.retryable(),
                            }),
                            metadata: Default::default(),
                            timestamp: Some(now()),
                        }
                    }
                }
            })
            .collect();

        let success_count = responses.len() as i32 - failure_count;
        tracing::info!(
            "Batch translation finished - batch_id: {}, size: {}, succeeded: {}, failed: {}, time: {}ms",
            req.batch_id,
            batch_size,
            success_count,
            failure_count,
            processing_time_ms,
        );

        Ok(Response::new(BatchTranslateResponse {
            responses,
            batch_id: req.batch_id,
            success_count,
            failure_count,
            total_processing_time_ms: processing_time_ms,
            timestamp: Some(now()),
        }))
    }

    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let status = HealthStatus::for_health_check(&self.engine.status(), Some(self.metrics.snapshot()));
        Ok(Response::new(HealthCheckResponse {
            is_healthy: status.is_healthy,
            status: status.status,
            details: status.details,
            timestamp: Some(now()),
        }))
    }

    async fn is_ready(
        &self,
        _request: Request<IsReadyRequest>,
    ) -> Result<Response<IsReadyResponse>, Status> {
        let is_ready = self.engine.is_ready().await;
        let languages = sidecar_core::engine::LanguageAware::supported_languages(self.engine.as_ref());
        let status = HealthStatus::for_is_ready(&self.engine.status(), is_ready, &languages);
        tracing::info!("IsReady: {is_ready}");
        Ok(Response::new(IsReadyResponse {
            is_ready,
            status: status.status,
            details: status.details,
            timestamp: Some(now()),
        }))
    }
}
