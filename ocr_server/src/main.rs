//! `ocr-server` entry point.
//!
//! Bootstrap order mirrors `mt-server::main`: sanitize the dynamic library
//! search path, resolve/provision model assets, construct and load the
//! engine, build the gRPC server with its keepalive options, emit the
//! `[SERVER_START]` marker, start the resource monitor, then wait for a
//! shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;

use ocr_server::engine::HybridOcrEngine;
use ocr_server::proto::ocr_service_server::OcrServiceServer;
use ocr_server::service::OcrServicer;
use sidecar_core::settings::MAX_MESSAGE_SIZE_BYTES;
use sidecar_core::assets::{ensure_assets, resolve_model_dir, AssetSpec};
use sidecar_core::bootstrap;
use sidecar_core::engine::OcrEngine;
use sidecar_core::resource_monitor::{start_monitoring, ResourceMonitor, DEFAULT_MONITOR_INTERVAL};
use sidecar_core::settings::ServerArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::install_panic_hook();

    let mut args = ServerArgs::parse();
    args.init_tracing();

    tracing::info!("{}", "=".repeat(80));
    tracing::info!("OCR sidecar starting...");
    tracing::info!("{}", "=".repeat(80));

    let removed = bootstrap::sanitize_library_path();
    if removed > 0 {
        tracing::info!("removed {removed} competing accelerator runtime path entries");
    }

    args.device = bootstrap::probe_accelerator(args.device);

    let model_dir: PathBuf = resolve_model_dir(
        args.model_path.as_deref().and_then(|p| p.to_str()),
        "SIDECAR_MODEL_PATH",
        "surya-onnx-hybrid",
    );
    tracing::info!("using model directory: {:?}", model_dir);

    let asset_spec = AssetSpec::new(
        "baketa/surya-onnx-hybrid",
        vec![
            "detection/model_int8.onnx".to_string(),
            "recognition/model.onnx".to_string(),
            "recognition/vocab.txt".to_string(),
        ],
    );
    ensure_assets(&asset_spec, &model_dir).await?;

    let environment = onnxruntime::environment::Environment::builder()
        .with_name("ocr-server")
        .build()?;
    HybridOcrEngine::initialize_sessions(
        &environment,
        &model_dir.join("detection/model_int8.onnx"),
        &model_dir.join("recognition/model.onnx"),
        &model_dir.join("recognition/vocab.txt"),
    )?;

    let engine = Arc::new(HybridOcrEngine::new());
    tracing::info!("loading hybrid OCR engine...");
    engine.load().await?;
    tracing::info!("hybrid OCR engine loaded successfully");

    let servicer = OcrServicer::new(engine.clone() as Arc<dyn OcrEngine>);

    let listen_addr = args.listen_addr().parse()?;
    tracing::info!("{}", "=".repeat(80));
    tracing::info!("OCR server starting on {}", args.listen_addr());
    tracing::info!("   Device: {}", args.device);
    tracing::info!("   Mode: ONNX Detection + ONNX Recognition (hybrid)");
    tracing::info!("{}", "=".repeat(80));

    let monitor = ResourceMonitor::new(None);
    let monitor_handle = start_monitoring(monitor, DEFAULT_MONITOR_INTERVAL);

    // Keepalive options mirror `aio.server(options=[...])` in the
    // original: 30s pings, 10s ping timeout, pings permitted while idle.
    let ocr_service = OcrServiceServer::new(servicer)
        .max_decoding_message_size(MAX_MESSAGE_SIZE_BYTES)
        .max_encoding_message_size(MAX_MESSAGE_SIZE_BYTES);

    bootstrap::run_server_with_shutdown(listen_addr, move |incoming, shutdown| {
        Server::builder()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .http2_keepalive_interval(Some(Duration::from_millis(30_000)))
            .http2_keepalive_timeout(Some(Duration::from_millis(10_000)))
            .add_service(ocr_service)
            .serve_with_incoming_shutdown(incoming, shutdown)
    })
    .await?;

    tracing::info!("stopping OCR server...");
    monitor_handle.stop().await;
    tracing::info!("OCR server stopped");

    Ok(())
}
