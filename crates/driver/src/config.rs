use crate::driver::{DEFAULT_DRIVER_NAME, DEFAULT_KMIP_CONFIG_DIR, DEFAULT_NODE_LABEL};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use panfs_csi_proto::Endpoint;
use std::path::PathBuf;

/// Which CSI services this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
  Controller,
  Node,
  All,
}

fn parse_endpoint(value: &str) -> Result<Endpoint, String> {
  value.parse().map_err(|e: panfs_csi_proto::ServeError| e.to_string())
}

/// PanFS CSI driver
#[derive(Debug, Parser)]
#[command(name = "panfs-csi", version, about, long_about = None)]
pub struct DriverConfig {
  /// CSI endpoint, only unix:// sockets are supported
  #[arg(
    long,
    env = "CSI_ENDPOINT",
    default_value = "unix:///csi/csi.sock",
    value_parser = parse_endpoint
  )]
  pub endpoint: Endpoint,

  /// Services to serve
  #[arg(long, env = "CSI_MODE", value_enum, default_value_t = Mode::All)]
  pub mode: Mode,

  /// Plugin name reported to the CO
  #[arg(long, env = "CSI_DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
  pub driver_name: String,

  /// Node id reported by NodeGetInfo (default: host name)
  #[arg(long, env = "NODE_ID")]
  pub node_id: Option<String>,

  /// Log level (trace, debug, info, warn, error), RUST_LOG takes precedence
  #[arg(long, env = "LOG_LEVEL", default_value = "info")]
  pub log_level: String,

  /// Directory for single-use KMIP config files
  #[arg(long, env = "KMIP_CONFIG_DIR", default_value = DEFAULT_KMIP_CONFIG_DIR)]
  pub kmip_config_dir: PathBuf,

  /// Record mounts instead of performing them
  #[arg(long, env = "CSI_FAKE_MOUNTER")]
  pub fake_mounter: bool,

  /// Label the node object once the node service is up
  #[arg(long, env = "CSI_LABEL_NODE")]
  pub label_node: bool,

  /// Readiness label key
  #[arg(long, env = "CSI_NODE_LABEL", default_value = DEFAULT_NODE_LABEL)]
  pub node_label: String,

  /// ssh connect timeout in seconds
  #[arg(long, env = "SSH_CONNECT_TIMEOUT", default_value_t = 30)]
  pub ssh_connect_timeout: u64,

  /// known_hosts file for realm host keys; unset disables host key checking
  #[arg(long, env = "SSH_KNOWN_HOSTS")]
  pub ssh_known_hosts: Option<PathBuf>,
}

impl DriverConfig {
  /// The configured node id, falling back to the host name.
  pub fn node_id(&self) -> Result<String> {
    if let Some(id) = &self.node_id {
      return Ok(id.clone());
    }

    hostname::get()
      .context("Failed to read host name")?
      .into_string()
      .map_err(|name| anyhow::anyhow!("Host name {:?} is not valid UTF-8", name))
  }

  #[inline]
  pub fn serves_controller(&self) -> bool {
    self.mode != Mode::Node
  }

  #[inline]
  pub fn serves_node(&self) -> bool {
    self.mode != Mode::Controller
  }
}
