use tokio_util::sync::CancellationToken;

use tokio::signal::unix::{signal, SignalKind};

/// Install a shutdown handler for one server role ("gateway" or "worker").
///
/// Returns a `CancellationToken` that is cancelled on SIGTERM or SIGINT.
/// Everything role-specific hangs off the token: the RPC server stops
/// accepting, the worker's lease reconciler ticker stops, and its pollers
/// exit. Pollers do not yield their leases on the way out; lease expiry and
/// preferred-worker handback reclaim them.
pub fn install_shutdown_handler(component: &'static str) -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(component, signal = received, "Shutdown signal received, draining");

        handler_token.cancel();
    });

    token
}
