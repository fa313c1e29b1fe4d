//! Process-level bootstrap helpers shared by both server binaries:
//! dynamic-library search path sanitization, the `[SERVER_START]` readiness
//! handshake, graceful shutdown signal waiting, and global panic capture.
//!
//! Grounded on `start_server.py`'s `_sanitize_path_for_cuda`, the
//! `sys.stderr.write("[SERVER_START]\n")` handshake, `GracefulShutdown`,
//! and `global_exception_handler`/`faulthandler.enable`.

use std::io::Write;

use crate::settings::Device;

/// Directory-name fragments that indicate a competing accelerator runtime
/// install likely to shadow the one this process needs. Generalizes the
/// original's miniconda/anaconda-specific exclusion list.
const COMPETING_RUNTIME_FRAGMENTS: &[&str] = &["miniconda", "anaconda"];

/// Strip path entries matching a competing-runtime fragment from `PATH`,
/// logging every removal. Returns the number of entries removed.
///
/// Must run before any heavy inference library is imported/loaded, exactly
/// as the original runs `_sanitize_path_for_cuda()` before `import
/// ctranslate2`.
pub fn sanitize_library_path() -> usize {
    let Ok(path) = std::env::var("PATH") else {
        return 0;
    };
    let separator = if cfg!(windows) { ';' } else { ':' };

    let mut kept = Vec::new();
    let mut excluded = Vec::new();
    for part in path.split(separator) {
        let lower = part.to_ascii_lowercase();
        if COMPETING_RUNTIME_FRAGMENTS
            .iter()
            .any(|fragment| lower.contains(fragment))
        {
            excluded.push(part.to_string());
        } else {
            kept.push(part);
        }
    }

    if !excluded.is_empty() {
        tracing::info!("sanitizing PATH to avoid competing accelerator runtimes:");
        for entry in &excluded {
            tracing::info!("  - {}", entry);
        }
        std::env::set_var("PATH", kept.join(&separator.to_string()));
    }
    excluded.len()
}

/// Asks the inference runtime directly whether a compatible accelerator
/// exists (via the `cuda` cargo feature compiled into this binary, rather
/// than the deep-learning framework), per spec.md §4.7 step 2. `Device::Cpu`
/// and `Device::Cuda` pass through unchanged (an explicit `--device cuda`
/// on a CPU-only build still fails at engine-load time, not here);
/// `Device::Auto` resolves to `Cuda` only when the accelerator runtime is
/// actually compiled in, otherwise downgrades to `Cpu` and logs it.
pub fn probe_accelerator(requested: Device) -> Device {
    let cuda_available = cfg!(feature = "cuda");
    match requested {
        Device::Auto if cuda_available => {
            tracing::info!("accelerator probe: CUDA runtime available, using cuda");
            Device::Cuda
        }
        Device::Auto => {
            tracing::info!("accelerator probe: no compatible accelerator found, using cpu");
            Device::Cpu
        }
        other => other,
    }
}

/// Write the `[SERVER_START]\n` readiness line directly to stderr,
/// bypassing the log formatter entirely, so a supervising parent process
/// watching raw stderr for this exact literal sees it regardless of log
/// configuration. Failures (closed/invalid stderr) are logged, not fatal.
pub fn emit_server_start_marker() {
    let mut stderr = std::io::stderr();
    match stderr.write_all(b"[SERVER_START]\n").and_then(|_| stderr.flush()) {
        Ok(()) => tracing::info!("[SERVER_START] signal sent to stderr"),
        Err(err) => tracing::info!("[SERVER_START] signal skipped (stderr write failed: {err})"),
    }
}

/// Install a panic hook that logs the payload, location, and a captured
/// backtrace via `tracing::error!` before the default hook runs. Mirrors
/// `global_exception_handler` + `faulthandler.enable(all_threads=True)`:
/// this process has no analogue of Python's separate OS-level SIGSEGV
/// capture, so a full backtrace on every panic is the closest equivalent
/// available from safe Rust.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!("UNCAUGHT PANIC - CRITICAL ERROR");
        tracing::error!("panic: {info}");
        tracing::error!("backtrace:\n{backtrace}");
        default_hook(info);
    }));
}

/// Wait for SIGINT or SIGTERM. On non-Unix platforms only `ctrl_c` is
/// available, which tokio supports uniformly.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down gracefully"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down gracefully"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down gracefully");
    }
}

/// The bounded grace period `server.stop(grace=5.0)` uses before forcing
/// shutdown.
pub const SHUTDOWN_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);

/// Binds `listen_addr`, then runs a `tonic` server to completion with the
/// graceful-shutdown contract of spec.md §4.7: on `wait_for_shutdown_signal`,
/// stop accepting new calls immediately (by firing the shutdown future
/// `build_serve` wired into `serve_with_incoming_shutdown`) and allow
/// in-flight calls `SHUTDOWN_GRACE_PERIOD` to finish before forcing the
/// server task down, mirroring `server.stop(grace=5.0)` in the original
/// `asyncio` server.
///
/// The `[SERVER_START]` readiness marker (spec.md §6/§9) is emitted only
/// *after* the listener is successfully bound, not before - a host
/// synchronizing on that line must never observe it ahead of the socket
/// actually being ready to accept connections.
///
/// `build_serve` receives the bound incoming-connection stream and the
/// shutdown future to hand to `serve_with_incoming_shutdown`, and returns
/// the resulting serve future.
pub async fn run_server_with_shutdown<F, Fut>(
    listen_addr: std::net::SocketAddr,
    build_serve: F,
) -> anyhow::Result<()>
where
    F: FnOnce(
        tokio_stream::wrappers::TcpListenerStream,
        futures::future::BoxFuture<'static, ()>,
    ) -> Fut,
    Fut: std::future::Future<Output = Result<(), tonic::transport::Error>> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|err| anyhow::anyhow!("failed to bind {listen_addr}: {err}"))?;
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    emit_server_start_marker();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown_fut: futures::future::BoxFuture<'static, ()> =
        Box::pin(async { let _ = rx.await; });
    let handle = tokio::spawn(build_serve(incoming, shutdown_fut));

    tracing::info!("press Ctrl+C to stop the server");
    wait_for_shutdown_signal().await;
    let _ = tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("server drained all in-flight calls gracefully"),
        Ok(Ok(Err(err))) => tracing::error!("server error during shutdown: {err}"),
        Ok(Err(join_err)) => tracing::error!("server task panicked during shutdown: {join_err}"),
        Err(_) => tracing::warn!(
            "shutdown grace period ({:?}) elapsed with calls still in flight; forcing exit",
            SHUTDOWN_GRACE_PERIOD
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_miniconda_from_path() {
        std::env::set_var(
            "PATH",
            if cfg!(windows) {
                r"C:\tools;C:\Users\me\miniconda3\Library\bin;C:\other"
            } else {
                "/usr/bin:/home/me/miniconda3/bin:/usr/local/bin"
            },
        );
        let removed = sanitize_library_path();
        assert_eq!(removed, 1);
        let remaining = std::env::var("PATH").unwrap();
        assert!(!remaining.to_ascii_lowercase().contains("miniconda"));
    }
}
