//! Load config from file and environment.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

/// Relay configuration. File: ~/.config/chitchat/config.toml or /etc/chitchat/config.toml.
/// Env overrides: CHITCHAT_PORT, CHITCHAT_BIND_ADDR, CHITCHAT_ADVERTISE_ADDR, CHITCHAT_DISPLAY_NAME.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host listen port, and the port clients dial (default 12345).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address the Host listener binds (default 0.0.0.0).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Address announced as "Hosting on"; resolved from the default route when unset.
    #[serde(default)]
    pub advertise_addr: Option<IpAddr>,
    /// Display name sent in the handshake.
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_port() -> u16 {
    chit_core::DEFAULT_PORT
}
fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            advertise_addr: None,
            display_name: None,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("CHITCHAT_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = p,
            Err(_) => warn!(value = %s, "ignoring invalid CHITCHAT_PORT"),
        }
    }
    if let Some(s) = var("CHITCHAT_BIND_ADDR") {
        match s.parse::<IpAddr>() {
            Ok(a) => c.bind_addr = a,
            Err(_) => warn!(value = %s, "ignoring invalid CHITCHAT_BIND_ADDR"),
        }
    }
    if let Some(s) = var("CHITCHAT_ADVERTISE_ADDR") {
        match s.parse::<IpAddr>() {
            Ok(a) => c.advertise_addr = Some(a),
            Err(_) => warn!(value = %s, "ignoring invalid CHITCHAT_ADVERTISE_ADDR"),
        }
    }
    if let Some(s) = var("CHITCHAT_DISPLAY_NAME") {
        if !s.trim().is_empty() {
            c.display_name = Some(s);
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/chitchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/chitchat/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable config, using defaults");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            None
        }
    }
}
