//! Shared CLI/settings surface for both server binaries.
//!
//! Covers the same flag set as a typical `argparse`-based server entry
//! point (`--port`, `--host`, `--debug`, `--model-path`), realized with
//! `clap` derive, extended with `--device`/`--compute-type`.

use std::path::PathBuf;

use clap::Parser;

/// Inbound/outbound gRPC message size ceiling at the transport, matching
/// `aio.server(options=[('grpc.max_send_message_length', 50 * 1024 * 1024), ...])`
/// in the original so OCR's up-to-10-MiB image payloads clear the wire
/// comfortably under the cap.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, clap::ValueEnum, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
    /// Resolved by `sidecar_core::bootstrap::probe_accelerator` at
    /// startup: CUDA if this binary was built with the `cuda` feature,
    /// CPU otherwise. Matches spec.md §6's `--device auto` default.
    Auto,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum, PartialEq, Eq)]
pub enum ComputeType {
    Float32,
    Int8,
}

#[derive(Debug, Parser)]
pub struct ServerArgs {
    /// Bind host. Only `127.0.0.1` is safe without an explicit opt-in to
    /// `0.0.0.0`; this mirrors the original's `--host 127.0.0.1` default.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long)]
    pub port: u16,

    /// Resolution order: this flag, then `SIDECAR_MODEL_PATH`, then a
    /// platform user-data directory.
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,

    #[arg(long, value_enum, default_value_t = ComputeType::Int8)]
    pub compute_type: ComputeType,

    #[arg(long)]
    pub debug: bool,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
            Device::Auto => write!(f, "auto"),
        }
    }
}

impl std::fmt::Display for ComputeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeType::Float32 => write!(f, "float32"),
            ComputeType::Int8 => write!(f, "int8"),
        }
    }
}

impl ServerArgs {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn init_tracing(&self) {
        let default_level = if self.debug { "debug" } else { "info" };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
