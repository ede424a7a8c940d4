//! Signal handling for graceful shutdown

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Which signal ended the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Terminate,
    Interrupt,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handles shutdown signals (SIGTERM, SIGINT)
///
/// Handlers are installed on construction, so a signal arriving before
/// [`wait`](Self::wait) is polled is not lost. Must be created inside a
/// tokio runtime.
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignal {
    /// Install the signal handlers
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) -> ShutdownReason {
        tokio::select! {
            _ = self.sigterm.recv() => {
                debug!("received SIGTERM");
                ShutdownReason::Terminate
            }
            _ = self.sigint.recv() => {
                debug!("received SIGINT");
                ShutdownReason::Interrupt
            }
        }
    }
}
