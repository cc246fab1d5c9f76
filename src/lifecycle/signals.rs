//! OS signal handling.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a configuration reload, not shutdown
//! - On non-unix targets only Ctrl-C is observed

/// What the host should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Shutdown,
    Reload,
}

/// Wait for the next signal the host cares about.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<HostSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let received = tokio::select! {
        _ = terminate.recv() => HostSignal::Shutdown,
        _ = interrupt.recv() => HostSignal::Shutdown,
        _ = hangup.recv() => HostSignal::Reload,
    };
    tracing::info!(signal = ?received, "Signal received");
    Ok(received)
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<HostSignal> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = ?HostSignal::Shutdown, "Signal received");
    Ok(HostSignal::Shutdown)
}
