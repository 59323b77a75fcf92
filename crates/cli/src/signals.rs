use flume::Sender;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT or SIGTERM.
    Shutdown,
    /// SIGUSR1.
    DumpStatus,
    /// SIGUSR2.
    SaveNow,
}

/// Installed handlers for the signals the daemon reacts to.
#[derive(Debug)]
pub struct Signals {
    interrupt: Signal,
    terminate: Signal,
    user1: Signal,
    user2: Signal,
}

impl Signals {
    /// Install the handlers. Must be called inside a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            user1: signal(SignalKind::user_defined1())?,
            user2: signal(SignalKind::user_defined2())?,
        })
    }

    /// Translate signals into events until the receiving side goes away.
    pub async fn forward(mut self, tx: Sender<SignalEvent>) {
        loop {
            let event = tokio::select! {
                Some(()) = self.interrupt.recv() => SignalEvent::Shutdown,
                Some(()) = self.terminate.recv() => SignalEvent::Shutdown,
                Some(()) = self.user1.recv() => SignalEvent::DumpStatus,
                Some(()) = self.user2.recv() => SignalEvent::SaveNow,
                else => break,
            };
            debug!(?event, "signal received");
            if tx.send_async(event).await.is_err() {
                break;
            }
        }
    }
}
