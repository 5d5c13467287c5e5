use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

/// Process exit code for a user-cancelled session.
pub const CANCEL_EXIT_CODE: i32 = 130;

/// First Ctrl-C cancels in-flight work and cleans up; the second exits
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    Cancel,
    Exit,
}

#[derive(Debug, Default)]
pub struct ShutdownController {
    signals: AtomicU8,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            signals: AtomicU8::new(0),
        }
    }

    /// Record one signal and return the escalation stage it maps to.
    pub fn bump(&self) -> ShutdownEvent {
        if self.signals.fetch_add(1, Ordering::SeqCst) == 0 {
            ShutdownEvent::Cancel
        } else {
            ShutdownEvent::Exit
        }
    }
}

/// Forward Ctrl-C signals into the session loop, escalating on repeats.
pub fn spawn_ctrl_c_handler(
    shutdown: Arc<ShutdownController>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>,
) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let event = shutdown.bump();
            let done = event == ShutdownEvent::Exit;
            let _ = shutdown_tx.send(event);
            if done {
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_escalate() {
        let controller = ShutdownController::new();
        assert_eq!(controller.bump(), ShutdownEvent::Cancel);
        assert_eq!(controller.bump(), ShutdownEvent::Exit);
        assert_eq!(controller.bump(), ShutdownEvent::Exit);
    }
}
