//! `mt-server` entry point.
//!
//! Bootstrap order grounded on `start_server.py::main`/`serve`: sanitize
//! the dynamic library search path, resolve/provision model assets,
//! construct and load the engine, build the gRPC server with the
//! original's exact keepalive options, emit the `[SERVER_START]` marker,
//! start the resource monitor, then wait for a shutdown signal and stop
//! everything within a bounded grace period.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;

use mt_server::engine::NllbOnnxEngine;
use mt_server::proto::translation_service_server::TranslationServiceServer;
use mt_server::service::TranslationServicer;
use sidecar_core::settings::MAX_MESSAGE_SIZE_BYTES;
use sidecar_core::assets::{ensure_assets, resolve_model_dir, AssetSpec};
use sidecar_core::bootstrap;
use sidecar_core::engine::TranslationEngine;
use sidecar_core::resource_monitor::{start_monitoring, ResourceMonitor, DEFAULT_MONITOR_INTERVAL};
use sidecar_core::settings::ServerArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::install_panic_hook();

    let mut args = ServerArgs::parse();
    args.init_tracing();

    tracing::info!("{}", "=".repeat(80));
    tracing::info!("Translation sidecar starting...");
    tracing::info!("{}", "=".repeat(80));

    let removed = bootstrap::sanitize_library_path();
    if removed > 0 {
        tracing::info!("removed {removed} competing accelerator runtime path entries");
    }

    args.device = bootstrap::probe_accelerator(args.device);

    let model_dir: PathBuf = resolve_model_dir(
        args.model_path.as_deref().and_then(|p| p.to_str()),
        "SIDECAR_MODEL_PATH",
        "nllb-200-distilled-1.3B-onnx",
    );
    tracing::info!("using model directory: {:?}", model_dir);

    let asset_spec = AssetSpec::new(
        "OpenNMT/nllb-200-distilled-1.3B-ct2-int8",
        vec![
            "encoder_model.onnx".to_string(),
            "decoder_model.onnx".to_string(),
            "tokenizer.json".to_string(),
        ],
    );
    ensure_assets(&asset_spec, &model_dir).await?;

    let environment = onnxruntime::environment::Environment::builder()
        .with_name("mt-server")
        .build()?;
    NllbOnnxEngine::initialize_sessions(&environment, &model_dir)?;

    let tokenizer = tokenizers::Tokenizer::from_file(model_dir.join("tokenizer.json"))
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
    let eos_token_id = tokenizer
        .token_to_id("</s>")
        .ok_or_else(|| anyhow::anyhow!("tokenizer missing </s> token"))? as i64;

    let engine = Arc::new(NllbOnnxEngine::new(tokenizer, eos_token_id));
    tracing::info!("loading NLLB model (this may take a few minutes)...");
    engine.load().await?;
    tracing::info!("NLLB model loaded successfully");

    mt_server::aggregator::install_engine(engine.clone() as Arc<dyn TranslationEngine>);

    let servicer = TranslationServicer::new(engine.clone(), true);

    let listen_addr = args.listen_addr().parse()?;
    tracing::info!("{}", "=".repeat(80));
    tracing::info!("Translation server starting on {}", args.listen_addr());
    tracing::info!("   Device: {}", args.device);
    tracing::info!(
        "   Supported languages: {}",
        sidecar_core::engine::LanguageAware::supported_languages(engine.as_ref()).join(", ")
    );
    tracing::info!("{}", "=".repeat(80));

    let monitor = ResourceMonitor::new(None);
    let monitor_handle = start_monitoring(monitor, DEFAULT_MONITOR_INTERVAL);

    // Keepalive options mirror `aio.server(options=[...])` in the
    // original: 30s pings, 10s ping timeout, pings permitted while idle.
    let translation_service = TranslationServiceServer::new(servicer)
        .max_decoding_message_size(MAX_MESSAGE_SIZE_BYTES)
        .max_encoding_message_size(MAX_MESSAGE_SIZE_BYTES);

    bootstrap::run_server_with_shutdown(listen_addr, move |incoming, shutdown| {
        Server::builder()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .http2_keepalive_interval(Some(Duration::from_millis(30_000)))
            .http2_keepalive_timeout(Some(Duration::from_millis(10_000)))
            .add_service(translation_service)
            .serve_with_incoming_shutdown(incoming, shutdown)
    })
    .await?;

    tracing::info!("stopping translation server...");
    monitor_handle.stop().await;
    tracing::info!("translation server stopped");

    Ok(())
}
