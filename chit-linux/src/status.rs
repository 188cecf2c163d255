//! Observable session status for the UI layer.

use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    /// `Hosting on: <ip>:<port>` once listening, `Host failed: <reason>` on a failed start.
    pub host_address: Option<String>,
    pub connected: bool,
}

/// Status cell shared by the sessions. Writers replace values; readers subscribe.
pub struct StatusSignal {
    tx: watch::Sender<Status>,
}

impl Default for StatusSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Status::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Status {
        self.tx.borrow().clone()
    }

    pub fn set_host_address(&self, address: Option<String>) {
        self.tx.send_modify(|s| s.host_address = address);
    }

    /// Publish `connected`, notifying subscribers even if unchanged.
    pub fn set_connected(&self, connected: bool) {
        self.tx.send_modify(|s| s.connected = connected);
    }

    /// Flip to disconnected. Notifies only on a true→false transition, so one
    /// disconnect is reported once. Returns whether it flipped.
    pub fn mark_disconnected(&self) -> bool {
        self.tx.send_if_modified(|s| {
            let was = s.connected;
            s.connected = false;
            was
        })
    }
}
