use anyhow::{Context, Result};
use clap::Parser;
use panfs_csi_driver::{
  annotator::{KubeAnnotator, NodeAnnotator, NoopAnnotator},
  backend::SshBackend,
  config::DriverConfig,
  driver::Driver,
};
use panfs_csi_proto::{serve, Services};
use panfs_mount_utils::{DefaultMounter, FakeMounter, Mounter};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
  let config = DriverConfig::parse();

  init_logging(&config.log_level)?;

  let node_id = config.node_id()?;
  let mounter: Arc<dyn Mounter> = if config.fake_mounter {
    warn!("using the fake mounter, volumes will not actually be mounted");
    Arc::new(FakeMounter::default())
  } else {
    Arc::new(
      DefaultMounter::new()
        .await
        .context("Failed to start the host mounter")?,
    )
  };

  let annotator: Arc<dyn NodeAnnotator> = if config.label_node && config.serves_node() {
    match KubeAnnotator::new().await {
      Ok(annotator) => Arc::new(annotator),
      Err(e) => {
        warn!("node labelling disabled: {}", e);
        Arc::new(NoopAnnotator)
      }
    }
  } else {
    Arc::new(NoopAnnotator)
  };

  let mut backend = SshBackend::new(config.ssh_connect_timeout);
  match &config.ssh_known_hosts {
    Some(path) => backend = backend.with_known_hosts(path),
    None => warn!("no ssh known_hosts file configured, realm host keys are not verified"),
  }

  let driver = Arc::new(
    Driver::new(node_id, Arc::new(backend), mounter)
      .with_name(config.driver_name.clone())
      .with_annotator(annotator, config.node_label.clone())
      .with_kmip_config_dir(config.kmip_config_dir.clone()),
  );

  info!(
    name = %config.driver_name,
    version = env!("CARGO_PKG_VERSION"),
    node = driver.node_id(),
    mode = ?config.mode,
    "starting PanFS CSI driver"
  );

  let services = match (config.serves_controller(), config.serves_node()) {
    (true, true) => Services::All(driver.clone(), driver.clone()),
    (true, false) => Services::Controller(driver.clone()),
    _ => Services::Node(driver.clone()),
  };

  let result = serve(&config.endpoint, services, shutdown_signal()).await;

  driver.clear_node_label().await;
  info!("PanFS CSI driver stopped");

  result.context("CSI server failed")
}

fn init_logging(level: &str) -> Result<()> {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
    .context("Failed to create log filter")?;

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .compact()
    .init();

  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = signal::ctrl_c().await {
      error!("failed to listen for Ctrl+C: {}", e);
      std::future::pending::<()>().await;
    }
  };

  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        error!("failed to install SIGTERM handler: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  tokio::select! {
    _ = ctrl_c => info!("received Ctrl+C, shutting down"),
    _ = terminate => info!("received SIGTERM, shutting down"),
  }
}
