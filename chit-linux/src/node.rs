//! Control surface for the UI: start a role, send, stop, observe status.
//!
//! A `Node` holds at most one active session. Host and Client share the send
//! path through their [`Relay`]; everything here is callable from any task.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chit_core::identity::now_millis;
use chit_core::{unique_id, Command, EncodeError, MessageSink};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::{ClientError, ClientSession, ClientState};
use crate::config::Config;
use crate::host::{HostError, HostSession, HostState};
use crate::media::{self, MediaError};
use crate::relay::{Relay, RelayError};
use crate::status::{Status, StatusSignal};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("a session is already running; stop it first")]
    AlreadyRunning,
    #[error("not connected")]
    NotConnected,
    #[error("message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

enum Role {
    Idle,
    Host(Arc<HostSession>),
    Client(Arc<ClientSession>),
}

impl Role {
    /// A stopped host or a dropped client no longer blocks a new start.
    fn is_active(&self) -> bool {
        match self {
            Role::Idle => false,
            Role::Host(h) => h.state() != HostState::Stopped,
            Role::Client(c) => c.state() != ClientState::Disconnected,
        }
    }
}

pub struct Node {
    config: Config,
    sink: Arc<dyn MessageSink>,
    status: Arc<StatusSignal>,
    role: Mutex<Role>,
}

impl Node {
    pub fn new(config: Config, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            config,
            sink,
            status: Arc::new(StatusSignal::new()),
            role: Mutex::new(Role::Idle),
        }
    }

    fn role(&self) -> MutexGuard<'_, Role> {
        self.role.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn is_host(&self) -> bool {
        matches!(*self.role(), Role::Host(_))
    }

    /// Display name of the active session.
    pub fn display_name(&self) -> Option<String> {
        match &*self.role() {
            Role::Idle => None,
            Role::Host(h) => Some(h.display_name().to_string()),
            Role::Client(c) => Some(c.display_name().to_string()),
        }
    }

    /// Start hosting. On failure the node returns to idle and the status
    /// carries `Host failed: <reason>`.
    pub async fn start_host(&self, name: &str) -> Result<SocketAddr, NodeError> {
        let session = {
            let mut role = self.role();
            if role.is_active() {
                return Err(NodeError::AlreadyRunning);
            }
            let session = HostSession::new(
                &self.config,
                name,
                Arc::clone(&self.sink),
                Arc::clone(&self.status),
            );
            *role = Role::Host(Arc::clone(&session));
            session
        };
        match session.start().await {
            Ok(addr) => Ok(addr),
            Err(e) => {
                self.release(|r| matches!(r, Role::Host(h) if Arc::ptr_eq(h, &session)));
                Err(e.into())
            }
        }
    }

    /// Join the Host at `address` (`ip`, `host` or `host:port`; the configured
    /// port is used when none is given).
    pub async fn start_client(&self, address: &str, name: &str) -> Result<(), NodeError> {
        let target = with_port(address, self.config.port);
        let session = {
            let mut role = self.role();
            if role.is_active() {
                return Err(NodeError::AlreadyRunning);
            }
            let session = ClientSession::new(
                &target,
                name,
                Arc::clone(&self.sink),
                Arc::clone(&self.status),
            );
            *role = Role::Client(Arc::clone(&session));
            session
        };
        match session.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release(|r| matches!(r, Role::Client(c) if Arc::ptr_eq(c, &session)));
                Err(e.into())
            }
        }
    }

    fn release(&self, is_current: impl Fn(&Role) -> bool) {
        let mut role = self.role();
        if is_current(&role) {
            *role = Role::Idle;
        }
    }

    /// Send a chat message; returns its `uniqueId`.
    pub fn send_message(&self, text: &str) -> Result<String, NodeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(NodeError::EmptyMessage);
        }
        let (relay, name) = self.uplink()?;
        let id = unique_id(&name, now_millis());
        self.dispatch(
            &relay,
            Command::IdentifiedMessage {
                unique_id: id.clone(),
                text: text.to_string(),
            },
        )?;
        Ok(id)
    }

    pub fn send_like(&self, unique_id: &str, liked: bool) -> Result<(), NodeError> {
        let (relay, _) = self.uplink()?;
        self.dispatch(
            &relay,
            Command::Like {
                unique_id: unique_id.to_string(),
                liked,
            },
        )
    }

    pub fn send_edit(&self, unique_id: &str, new_text: &str) -> Result<(), NodeError> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(NodeError::EmptyMessage);
        }
        let (relay, _) = self.uplink()?;
        self.dispatch(
            &relay,
            Command::Edit {
                unique_id: unique_id.to_string(),
                new_text: new_text.to_string(),
            },
        )
    }

    pub fn send_delete(&self, unique_id: &str) -> Result<(), NodeError> {
        let (relay, _) = self.uplink()?;
        self.dispatch(
            &relay,
            Command::Delete {
                unique_id: unique_id.to_string(),
            },
        )
    }

    /// Send the file at `path` as an image; returns its `uniqueId`.
    pub async fn send_image(&self, path: &Path, caption: &str) -> Result<String, NodeError> {
        let (relay, name) = self.uplink()?;
        let id = unique_id(&name, now_millis());
        let command = media::load_image(path, caption, id.clone()).await?;
        self.dispatch(&relay, command)?;
        Ok(id)
    }

    /// Send the file at `path` as a document; returns its `uniqueId`.
    pub async fn send_document(&self, path: &Path) -> Result<String, NodeError> {
        let (relay, name) = self.uplink()?;
        let id = unique_id(&name, now_millis());
        let command = media::load_document(path, id.clone()).await?;
        self.dispatch(&relay, command)?;
        Ok(id)
    }

    fn uplink(&self) -> Result<(Arc<Relay>, String), NodeError> {
        let found = match &*self.role() {
            Role::Idle => None,
            Role::Host(h) if h.state() == HostState::Listening => {
                Some((h.relay(), h.display_name().to_string()))
            }
            Role::Host(_) => None,
            Role::Client(c) => c.relay().map(|r| (r, c.display_name().to_string())),
        };
        found.ok_or_else(|| self.not_connected())
    }

    fn dispatch(&self, relay: &Relay, command: Command) -> Result<(), NodeError> {
        relay.send(command).map_err(|e| match e {
            RelayError::NotConnected => self.not_connected(),
            RelayError::Encode(e) => NodeError::Encode(e),
        })
    }

    fn not_connected(&self) -> NodeError {
        if self.status.mark_disconnected() {
            warn!("send attempted while not connected");
        }
        NodeError::NotConnected
    }

    /// Stop the active session, if any, and wait until it is fully closed.
    /// Idempotent.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.role(), Role::Idle);
        match previous {
            Role::Idle => {}
            Role::Host(h) => h.stop().await,
            Role::Client(c) => {
                c.stop().await;
                info!(host = %c.host_addr(), "left chat");
            }
        }
    }
}

/// Append `port` unless `address` already names one.
fn with_port(address: &str, port: u16) -> String {
    let address = address.trim();
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    match address.rsplit_once(':') {
        Some((host, p)) if !host.is_empty() && p.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{port}"),
    }
}
