//! Relay coordinator: the dispatch shared by Host and Client.
//!
//! Inbound on the Host: rebroadcast the line to every client first, then deliver
//! locally. Inbound on a Client: deliver locally only. Local sends go through an
//! outbound queue drained by one task, so the caller never waits on a socket and
//! its own sends leave in the order they were made.

use std::sync::Arc;

use chit_core::wire::is_tagged;
use chit_core::{decode_line, deliver, encode_line, truncate_for_log, Command, EncodeError, MessageSink, JOIN_TEXT};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::registry::BroadcastRegistry;

/// Where outbound lines go.
#[derive(Clone)]
pub enum Uplink {
    /// Host: fan out to every registered client.
    Broadcast(Arc<BroadcastRegistry>),
    /// Client: the single connection to the Host.
    Host(ConnectionHandle),
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub struct Relay {
    sink: Arc<dyn MessageSink>,
    uplink: Uplink,
    outbound: mpsc::UnboundedSender<String>,
}

impl Relay {
    /// Host-role relay over `registry`. The outbound pump runs on `tasks` until
    /// `shutdown` fires or the relay is dropped.
    pub fn host(
        sink: Arc<dyn MessageSink>,
        registry: Arc<BroadcastRegistry>,
        tasks: &TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self::new(sink, Uplink::Broadcast(registry), tasks, shutdown)
    }

    /// Client-role relay over the connection to the Host.
    pub fn client(
        sink: Arc<dyn MessageSink>,
        host: ConnectionHandle,
        tasks: &TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self::new(sink, Uplink::Host(host), tasks, shutdown)
    }

    fn new(
        sink: Arc<dyn MessageSink>,
        uplink: Uplink,
        tasks: &TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        tasks.spawn(pump(uplink.clone(), rx, shutdown));
        Self {
            sink,
            uplink,
            outbound,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.uplink, Uplink::Broadcast(_))
    }

    /// Handle one inbound line. `peer` is the display name of the connection it
    /// arrived on.
    pub async fn on_line(&self, peer: &str, line: String) {
        debug!(peer, line = %truncate_for_log(&line), "received");
        match &self.uplink {
            Uplink::Broadcast(registry) => self.on_client_line(registry, peer, line).await,
            Uplink::Host(_) => self.on_host_line(peer, &line),
        }
    }

    async fn on_client_line(&self, registry: &BroadcastRegistry, peer: &str, line: String) {
        if !is_tagged(&line) {
            // Untagged client text is chat from that connection's user.
            let command = Command::PlainMessage {
                sender: Some(peer.to_string()),
                text: line,
            };
            self.rebroadcast_and_deliver(registry, command).await;
            return;
        }
        match decode_line(&line) {
            Ok(Some(command)) => {
                registry.broadcast(&line).await;
                deliver(self.sink.as_ref(), command);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(peer, error = %e, line = %truncate_for_log(&line), "dropping malformed line")
            }
        }
    }

    fn on_host_line(&self, peer: &str, line: &str) {
        match decode_line(line) {
            Ok(Some(command)) => deliver(self.sink.as_ref(), command),
            Ok(None) => debug!(peer, line = %truncate_for_log(line), "ignoring fragment"),
            Err(e) => {
                warn!(peer, error = %e, line = %truncate_for_log(line), "dropping malformed line")
            }
        }
    }

    /// Host only: tell everyone, and the local sink, that `name` joined.
    pub async fn announce_join(&self, name: &str) {
        if let Uplink::Broadcast(registry) = &self.uplink {
            let command = Command::PlainMessage {
                sender: Some(name.to_string()),
                text: JOIN_TEXT.to_string(),
            };
            self.rebroadcast_and_deliver(registry, command).await;
        }
    }

    async fn rebroadcast_and_deliver(&self, registry: &BroadcastRegistry, command: Command) {
        match encode_line(&command) {
            Ok(line) => {
                registry.broadcast(&line).await;
                deliver(self.sink.as_ref(), command);
            }
            Err(e) => warn!(error = %e, "cannot relay command"),
        }
    }

    /// Send a locally originated command. The Host delivers it to its own sink
    /// before returning, since it never receives its own broadcast; a Client
    /// gets it back as an echo from the Host.
    pub fn send(&self, command: Command) -> Result<(), RelayError> {
        let line = encode_line(&command)?;
        match &self.uplink {
            Uplink::Host(handle) if handle.is_closed() => return Err(RelayError::NotConnected),
            Uplink::Host(_) => {}
            Uplink::Broadcast(_) => deliver(self.sink.as_ref(), command),
        }
        self.outbound
            .send(line)
            .map_err(|_| RelayError::NotConnected)
    }
}

async fn pump(uplink: Uplink, mut rx: mpsc::UnboundedReceiver<String>, shutdown: CancellationToken) {
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        match &uplink {
            Uplink::Broadcast(registry) => {
                registry.broadcast(&line).await;
            }
            Uplink::Host(handle) => {
                if let Err(e) = handle.send(&line) {
                    warn!(error = %e, "send to host failed, closing connection");
                    handle.close().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    use super::*;
    use crate::connection::Connection;
    use crate::testing::{next_event, ChannelSink};

    #[tokio::test]
    async fn host_rebroadcasts_tagged_line_verbatim_then_delivers() {
        let (sink, mut events) = ChannelSink::new();
        let registry = Arc::new(BroadcastRegistry::new());
        let tasks = TaskTracker::new();
        let relay = Relay::host(sink, registry.clone(), &tasks, CancellationToken::new());

        let (ours, theirs) = duplex(1024);
        let mut peer = Connection::open(ours, "bob", CancellationToken::new());
        peer.join(&registry).await;
        let mut peer_rx = BufReader::new(theirs).lines();

        relay.on_line("alice", "EDIT:alice_1:fixed: typo".into()).await;
        assert_eq!(
            peer_rx.next_line().await.unwrap().unwrap(),
            "EDIT:alice_1:fixed: typo"
        );
        assert_eq!(
            next_event(&mut events).await,
            Command::Edit {
                unique_id: "alice_1".into(),
                new_text: "fixed: typo".into()
            }
        );
    }

    #[tokio::test]
    async fn host_attributes_untagged_client_text() {
        let (sink, mut events) = ChannelSink::new();
        let registry = Arc::new(BroadcastRegistry::new());
        let tasks = TaskTracker::new();
        let relay = Relay::host(sink, registry.clone(), &tasks, CancellationToken::new());

        let (ours, theirs) = duplex(1024);
        let mut peer = Connection::open(ours, "carol", CancellationToken::new());
        peer.join(&registry).await;
        let mut peer_rx = BufReader::new(theirs).lines();

        relay.on_line("dave", "hi all".into()).await;
        assert_eq!(peer_rx.next_line().await.unwrap().unwrap(), "dave: hi all");
        assert_eq!(
            next_event(&mut events).await,
            Command::PlainMessage {
                sender: Some("dave".into()),
                text: "hi all".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_and_non_utf8_lines_are_dropped_and_loop_continues() {
        let (sink, mut events) = ChannelSink::new();
        let tasks = TaskTracker::new();
        let (host_side, _host_peer) = duplex(1024);
        let host_conn = Connection::open(host_side, "host", CancellationToken::new());
        let relay = Relay::client(sink, host_conn.handle(), &tasks, CancellationToken::new());

        let (ours, mut theirs) = duplex(1024);
        let conn = Connection::open(ours, "host", CancellationToken::new());
        theirs
            .write_all(b"IMG:onlyonepart\ncaf\xe9\nDELETE:bob_7\n")
            .await
            .unwrap();
        drop(theirs);
        conn.read_loop(|line| relay.on_line("host", line)).await;

        assert_eq!(
            next_event(&mut events).await,
            Command::Delete {
                unique_id: "bob_7".into()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn client_send_goes_to_host_without_local_delivery() {
        let (sink, mut events) = ChannelSink::new();
        let tasks = TaskTracker::new();
        let (ours, theirs) = duplex(1024);
        let conn = Connection::open(ours, "host", CancellationToken::new());
        let relay = Relay::client(sink, conn.handle(), &tasks, CancellationToken::new());

        relay
            .send(Command::Like {
                unique_id: "alice_1".into(),
                liked: false,
            })
            .unwrap();
        let mut rx = BufReader::new(theirs).lines();
        let line = timeout(Duration::from_secs(5), rx.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.as_deref(), Some("UNLIKE:alice_1"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn client_send_after_close_is_not_connected() {
        let (sink, _events) = ChannelSink::new();
        let tasks = TaskTracker::new();
        let (ours, _theirs) = duplex(1024);
        let conn = Connection::open(ours, "host", CancellationToken::new());
        let relay = Relay::client(sink, conn.handle(), &tasks, CancellationToken::new());
        conn.close().await;
        let err = relay
            .send(Command::Delete {
                unique_id: "a_1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, RelayError::NotConnected));
    }

    #[tokio::test]
    async fn host_send_delivers_locally_even_with_no_clients() {
        let (sink, mut events) = ChannelSink::new();
        let tasks = TaskTracker::new();
        let relay = Relay::host(
            sink,
            Arc::new(BroadcastRegistry::new()),
            &tasks,
            CancellationToken::new(),
        );
        let cmd = Command::IdentifiedMessage {
            unique_id: "host_5".into(),
            text: "anyone?".into(),
        };
        relay.send(cmd.clone()).unwrap();
        assert_eq!(next_event(&mut events).await, cmd);
    }

    #[tokio::test]
    async fn invalid_command_is_rejected_before_queueing() {
        let (sink, mut events) = ChannelSink::new();
        let tasks = TaskTracker::new();
        let relay = Relay::host(
            sink,
            Arc::new(BroadcastRegistry::new()),
            &tasks,
            CancellationToken::new(),
        );
        let err = relay
            .send(Command::Delete {
                unique_id: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, RelayError::Encode(_)));
        assert!(events.try_recv().is_err());
    }
}
