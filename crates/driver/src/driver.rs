use crate::{
  annotator::{NodeAnnotator, NoopAnnotator},
  backend::BackendClient,
};
use panfs_csi_proto::{IdentityService, VolumeExpansionSupport};
use panfs_mount_utils::Mounter;
use std::{
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};
use tracing::{error, info};

pub const DEFAULT_DRIVER_NAME: &str = "com.vdura.csi.panfs";
pub const DEFAULT_NODE_LABEL: &str = "node.kubernetes.io/panfs-csi-ready";
pub const DEFAULT_KMIP_CONFIG_DIR: &str = "/tmp/panfs-csi-kmip";

/// Filesystem type handed to mount(8).
pub(crate) const PANFS_FS_TYPE: &str = "panfs";

/// The PanFS CSI plugin. Serves the identity, controller and node services;
/// which of them are exposed is decided by the server shell.
pub struct Driver {
  name: String,
  node_id: String,
  node_label: String,
  kmip_config_dir: PathBuf,
  pub(crate) backend: Arc<dyn BackendClient>,
  pub(crate) mounter: Arc<dyn Mounter>,
  pub(crate) annotator: Arc<dyn NodeAnnotator>,
  label_set: AtomicBool,
}

impl Driver {
  pub fn new(
    node_id: impl Into<String>,
    backend: Arc<dyn BackendClient>,
    mounter: Arc<dyn Mounter>,
  ) -> Self {
    Driver {
      name: DEFAULT_DRIVER_NAME.to_owned(),
      node_id: node_id.into(),
      node_label: DEFAULT_NODE_LABEL.to_owned(),
      kmip_config_dir: PathBuf::from(DEFAULT_KMIP_CONFIG_DIR),
      backend,
      mounter,
      annotator: Arc::new(NoopAnnotator),
      label_set: AtomicBool::new(false),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Labels the node with `label` from NodeGetInfo.
  pub fn with_annotator(mut self, annotator: Arc<dyn NodeAnnotator>, label: impl Into<String>) -> Self {
    self.annotator = annotator;
    self.node_label = label.into();
    self
  }

  pub fn with_kmip_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.kmip_config_dir = dir.into();
    self
  }

  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub(crate) fn node_label(&self) -> &str {
    &self.node_label
  }

  #[inline]
  pub(crate) fn kmip_config_dir(&self) -> &Path {
    &self.kmip_config_dir
  }

  pub(crate) fn mark_label_set(&self) {
    self.label_set.store(true, Ordering::SeqCst);
  }

  #[inline]
  pub fn label_set(&self) -> bool {
    self.label_set.load(Ordering::SeqCst)
  }

  /// Removes the readiness label if this instance set it. Failures are only
  /// logged.
  pub async fn clear_node_label(&self) {
    if !self.label_set.swap(false, Ordering::SeqCst) {
      return;
    }

    match self
      .annotator
      .clear_label(&self.node_id, &self.node_label)
      .await
    {
      Ok(()) => info!(node = %self.node_id, "cleared node readiness label"),
      Err(e) => error!(node = %self.node_id, "failed to clear node readiness label: {}", e),
    }
  }
}

impl IdentityService for Driver {
  fn name(&self) -> &str {
    &self.name
  }

  fn version(&self) -> &str {
    env!("CARGO_PKG_VERSION")
  }

  fn volume_expansion_support(&self) -> VolumeExpansionSupport {
    VolumeExpansionSupport::Online
  }
}
