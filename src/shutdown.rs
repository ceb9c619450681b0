use tokio_util::sync::CancellationToken;

/// Install a shutdown handler for SIGTERM and SIGINT (Ctrl-C elsewhere).
///
/// Returns a `CancellationToken` that is cancelled when a signal arrives.
/// The coordinator stops serving and the reaper exits; a worker agent
/// unregisters so its frames are reclaimed immediately.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                tracing::info!(signal, "Received shutdown signal, draining");
                trigger.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
        }
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
