//! Shared shape backing the `HealthCheck`/`IsReady` status RPCs of both
//! services. Spec requires the diagnostic `details` map carry, at minimum,
//! engine name, version, and supported languages; this centralizes that so
//! `mt-server`/`ocr-server` don't each reinvent the map-building.
//!
//! No direct teacher analogue beyond the general "free-form details map"
//! pattern `ocr_server_hybrid.py`'s `HealthCheck`/`IsReady` handlers use.

use std::collections::HashMap;

use crate::engine::EngineStatus;
use crate::metrics::MetricsSnapshot;

/// Builds the `details` map for a status RPC response from an engine's
/// current status plus optional call metrics and supported-language list.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub status: String,
    pub details: HashMap<String, String>,
}

impl HealthStatus {
    /// For `HealthCheck`: healthy iff the engine reports loaded. Always
    /// includes engine name/version plus any call metrics supplied.
    pub fn for_health_check(engine: &EngineStatus, metrics: Option<MetricsSnapshot>) -> Self {
        let mut details = HashMap::new();
        details.insert("engine".to_string(), engine.name.clone());
        details.insert("version".to_string(), engine.version.clone());
        if let Some(snapshot) = metrics {
            for (key, value) in snapshot.as_details() {
                details.insert(key.to_string(), value);
            }
        }
        Self {
            is_healthy: engine.is_loaded,
            status: if engine.is_loaded { "OK" } else { "UNAVAILABLE" }.to_string(),
            details,
        }
    }

    /// For `IsReady`: ready flag is caller-supplied (cheap/non-blocking
    /// `is_ready()` rather than the `status()` snapshot alone) since an
    /// engine can be constructed (`status().is_loaded == true`) yet still
    /// warming up. Supported languages are only disclosed once ready.
    pub fn for_is_ready(engine: &EngineStatus, is_ready: bool, supported_languages: &[String]) -> Self {
        let mut details = HashMap::new();
        details.insert("engine".to_string(), engine.name.clone());
        details.insert("version".to_string(), engine.version.clone());
        if is_ready && !supported_languages.is_empty() {
            details.insert("supported_languages".to_string(), supported_languages.join(","));
        }
        Self {
            is_healthy: is_ready,
            status: if is_ready { "READY" } else { "NOT_READY" }.to_string(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_details_always_carry_engine_identity() {
        let engine = EngineStatus {
            name: "nllb-200-onnx".to_string(),
            version: "distilled-1.3B".to_string(),
            is_loaded: true,
        };
        let status = HealthStatus::for_health_check(&engine, None);
        assert!(status.is_healthy);
        assert_eq!(status.details.get("engine").unwrap(), "nllb-200-onnx");
        assert_eq!(status.details.get("version").unwrap(), "distilled-1.3B");
    }

    #[test]
    fn is_ready_withholds_languages_until_ready() {
        let engine = EngineStatus {
            name: "nllb-200-onnx".to_string(),
            version: "distilled-1.3B".to_string(),
            is_loaded: true,
        };
        let langs = vec!["en".to_string(), "ja".to_string()];
        let not_ready = HealthStatus::for_is_ready(&engine, false, &langs);
        assert!(!not_ready.details.contains_key("supported_languages"));
        let ready = HealthStatus::for_is_ready(&engine, true, &langs);
        assert_eq!(ready.details.get("supported_languages").unwrap(), "en,ja");
    }
}
