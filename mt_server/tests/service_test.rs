//! End-to-end-ish tests for `TranslationServicer` against a stub engine,
//! exercising request validation and error-to-status mapping without any
//! real ONNX model.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::Request;

use mt_server::proto::translation_service_server::TranslationService;
use mt_server::proto::{BatchTranslateRequest, Language, TranslateRequest};
use mt_server::service::TranslationServicer;
use sidecar_core::engine::{EngineStatus, LanguageAware, TranslationEngine, TranslationOutcome};
use sidecar_core::errors::EngineError;

struct StubEngine;

#[async_trait]
impl TranslationEngine for StubEngine {
    fn status(&self) -> EngineStatus {
        EngineStatus {
            name: "stub".to_string(),
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

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<TranslationOutcome, EngineError> {
        if source_lang == "xx" || target_lang == "xx" {
            return Err(EngineError::UnsupportedLanguage("xx".to_string()));
        }
        Ok(TranslationOutcome {
            text: format!("[{source_lang}->{target_lang}] {text}"),
            confidence: Some(0.9),
        })
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationOutcome>, EngineError> {
        let mut outcomes = Vec::with_capacity(texts.len());
        for text in texts {
            outcomes.push(self.translate(text, source_lang, target_lang).await?);
        }
        Ok(outcomes)
    }
}

impl LanguageAware for StubEngine {
    fn supported_languages(&self) -> Vec<String> {
        vec!["en".to_string(), "ja".to_string()]
    }
}

fn servicer() -> TranslationServicer {
    TranslationServicer::new(Arc::new(StubEngine), false)
}

#[tokio::test]
async fn translate_round_trips_through_stub_engine() {
    let servicer = servicer();
    let request = Request::new(TranslateRequest {
        request_id: "req-1".to_string(),
        source_text: "hello".to_string(),
        source_language: Some(Language { code: "en".to_string() }),
        target_language: Some(Language { code: "ja".to_string() }),
        options: Default::default(),
        timestamp: None,
    });

    let response = servicer.translate(request).await.unwrap().into_inner();
    assert_eq!(response.translated_text, "[en->ja] hello");
    assert!(response.is_success);
    assert_eq!(response.engine_name, "stub");
    assert_eq!(response.engine_version, "0");
}

#[tokio::test]
async fn translate_maps_unsupported_language_to_invalid_argument() {
    let servicer = servicer();
    let request = Request::new(TranslateRequest {
        request_id: "req-2".to_string(),
        source_text: "hello".to_string(),
        source_language: Some(Language { code: "xx".to_string() }),
        target_language: Some(Language { code: "ja".to_string() }),
        options: Default::default(),
        timestamp: None,
    });

    let status = servicer.translate(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn translate_rejects_empty_source_text() {
    let servicer = servicer();
    let request = Request::new(TranslateRequest {
        request_id: "req-empty".to_string(),
        source_text: "   ".to_string(),
        source_language: Some(Language { code: "en".to_string() }),
        target_language: Some(Language { code: "ja".to_string() }),
        options: Default::default(),
        timestamp: None,
    });

    let status = servicer.translate(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn translate_batch_preserves_positional_order() {
    let servicer = servicer();
    let requests = vec![
        TranslateRequest {
            request_id: "a".to_string(),
            source_text: "one".to_string(),
            source_language: Some(Language { code: "en".to_string() }),
            target_language: Some(Language { code: "ja".to_string() }),
            options: Default::default(),
            timestamp: None,
        },
        TranslateRequest {
            request_id: "b".to_string(),
            source_text: "two".to_string(),
            source_language: Some(Language { code: "en".to_string() }),
            target_language: Some(Language { code: "ja".to_string() }),
            options: Default::default(),
            timestamp: None,
        },
    ];
    let request = Request::new(BatchTranslateRequest {
        requests,
        batch_id: "batch-1".to_string(),
        timestamp: None,
    });

    let response = servicer.translate_batch(request).await.unwrap().into_inner();
    assert_eq!(response.responses[0].request_id, "a");
    assert_eq!(response.responses[1].request_id, "b");
    assert_eq!(response.responses[0].translated_text, "[en->ja] one");
    assert_eq!(response.responses[1].translated_text, "[en->ja] two");
    assert_eq!(response.success_count, 2);
}

#[tokio::test]
async fn translate_batch_groups_mixed_language_pairs() {
    let servicer = servicer();
    let lang = |code: &str| Some(Language { code: code.to_string() });
    let requests = vec![
        TranslateRequest {
            request_id: "a".to_string(),
            source_text: "one".to_string(),
            source_language: lang("en"),
            target_language: lang("ja"),
            options: Default::default(),
            timestamp: None,
        },
        TranslateRequest {
            request_id: "b".to_string(),
            source_text: "ichi".to_string(),
            source_language: lang("ja"),
            target_language: lang("en"),
            options: Default::default(),
            timestamp: None,
        },
        TranslateRequest {
            request_id: "c".to_string(),
            source_text: "two".to_string(),
            source_language: lang("en"),
            target_language: lang("ja"),
            options: Default::default(),
            timestamp: None,
        },
        TranslateRequest {
            request_id: "d".to_string(),
            source_text: "ni".to_string(),
            source_language: lang("ja"),
            target_language: lang("en"),
            options: Default::default(),
            timestamp: None,
        },
    ];
    let request = Request::new(BatchTranslateRequest {
        requests,
        batch_id: "batch-mixed".to_string(),
        timestamp: None,
    });

    let response = servicer.translate_batch(request).await.unwrap().into_inner();
    assert_eq!(response.responses.len(), 4);
    assert_eq!(response.success_count, 4);
    assert_eq!(response.failure_count, 0);

    // Original positional order is preserved regardless of grouping.
    assert_eq!(response.responses[0].request_id, "a");
    assert_eq!(response.responses[0].translated_text, "[en->ja] one");
    assert_eq!(response.responses[0].source_language.as_ref().unwrap().code, "en");
    assert_eq!(response.responses[0].target_language.as_ref().unwrap().code, "ja");

    assert_eq!(response.responses[1].request_id, "b");
    assert_eq!(response.responses[1].translated_text, "[ja->en] ichi");
    assert_eq!(response.responses[1].source_language.as_ref().unwrap().code, "ja");
    assert_eq!(response.responses[1].target_language.as_ref().unwrap().code, "en");

    assert_eq!(response.responses[2].request_id, "c");
    assert_eq!(response.responses[2].translated_text, "[en->ja] two");

    assert_eq!(response.responses[3].request_id, "d");
    assert_eq!(response.responses[3].translated_text, "[ja->en] ni");
}

#[tokio::test]
async fn translate_batch_reports_per_item_failure_without_failing_whole_batch() {
    let servicer = servicer();
    let lang = |code: &str| Some(Language { code: code.to_string() });
    let requests = vec![
        TranslateRequest {
            request_id: "ok".to_string(),
            source_text: "hello".to_string(),
            source_language: lang("en"),
            target_language: lang("ja"),
            options: Default::default(),
            timestamp: None,
        },
        TranslateRequest {
            request_id: "bad".to_string(),
            source_text: "hello".to_string(),
            source_language: lang("xx"),
            target_language: lang("ja"),
            options: Default::default(),
            timestamp: None,
        },
    ];
    let request = Request::new(BatchTranslateRequest {
        requests,
        batch_id: "batch-partial-failure".to_string(),
        timestamp: None,
    });

    let response = servicer.translate_batch(request).await.unwrap().into_inner();
    assert_eq!(response.success_count, 1);
    assert_eq!(response.failure_count, 1);
    assert!(response.responses[0].is_success);
    assert!(!response.responses[1].is_success);
    assert!(response.responses[1].error.is_some());
}

#[tokio::test]
async fn translate_batch_rejects_empty_batch() {
    let servicer = servicer();
    let request = Request::new(BatchTranslateRequest {
        requests: vec![],
        batch_id: "empty".to_string(),
        timestamp: None,
    });
    let status = servicer.translate_batch(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn is_ready_reports_supported_languages() {
    let servicer = servicer();
    let response = servicer
        .is_ready(Request::new(mt_server::proto::IsReadyRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert!(response.is_ready);
    assert_eq!(response.details.get("supported_languages").unwrap(), "en,ja");
}
