use crate::{
  driver::{Driver, PANFS_FS_TYPE},
  kmip::{KmipConfigFile, KmipError},
  validation::{param, params, secret_keys, validate_secrets, EPHEMERAL_CONTEXT_KEY},
};
use async_trait::async_trait;
use panfs_csi_proto::{
  node::{
    NodeCapabilities, NodeGetInfoError, NodeGetInfoResponse, NodePublishVolumeError,
    NodePublishVolumeRequest, NodeUnpublishVolumeError, NodeUnpublishVolumeRequest,
  },
  NodeService,
};
use std::{collections::HashMap, io};
use tracing::{debug, error, info, warn};

/// Mount source understood by the panfs mount helper.
fn device_address(realm: &str, volume: &str) -> String {
  format!("panfs://{}/{}", realm, volume)
}

impl From<KmipError> for NodePublishVolumeError {
  fn from(value: KmipError) -> Self {
    match value {
      KmipError::MissingData => NodePublishVolumeError::InvalidArgument(value.to_string()),
      _ => NodePublishVolumeError::Internal(value.to_string()),
    }
  }
}

#[async_trait]
impl NodeService for Driver {
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::SINGLE_NODE_MULTI_WRITER
  }

  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError> {
    let secrets = request.secrets();
    validate_secrets(secrets)
      .map_err(|e| NodePublishVolumeError::InvalidArgument(e.to_string()))?;

    let mount = request.volume_capability().mount().ok_or_else(|| {
      NodePublishVolumeError::ExceedsCapabilities("only mount volumes are supported".to_owned())
    })?;

    let context = request.volume_context();
    if context.get(EPHEMERAL_CONTEXT_KEY).map(String::as_str) == Some("true") {
      return Err(NodePublishVolumeError::EphemeralUnsupported(
        request.volume_id().to_owned(),
      ));
    }

    let mut options = mount.mount_flags().map(str::to_owned).collect::<Vec<_>>();
    if request.readonly() {
      options.push("ro".to_owned());
    }

    // Held until the mount call returns; dropping it removes the file.
    let _kmip = if param(context, params::ENCRYPTION) == Some("on") {
      let config = KmipConfigFile::create(
        self.kmip_config_dir(),
        secrets.get(secret_keys::KMIP_CONFIG_DATA).map(String::as_str),
      )?;
      options.push(config.mount_option());
      Some(config)
    } else {
      None
    };

    let realm = secrets
      .get(secret_keys::REALM_IP)
      .map(String::as_str)
      .unwrap_or_default();
    let source = device_address(realm, request.volume_id());
    let target = request.target_path();

    self
      .mounter
      .mount(&source, target, PANFS_FS_TYPE, &options)
      .await
      .map_err(|e| {
        error!(volume = request.volume_id(), target = %target.display(), "mount failed: {}", e);
        NodePublishVolumeError::Internal(format!("Failed to publish volume: {}", e))
      })?;

    info!(volume = request.volume_id(), target = %target.display(), "volume published");
    Ok(())
  }

  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError> {
    let target = request.target_path();

    self.mounter.unmount(target).await.map_err(|e| {
      error!(volume = request.volume_id(), target = %target.display(), "unmount failed: {}", e);
      NodeUnpublishVolumeError::Internal(format!("Failed to unpublish volume: {}", e))
    })?;

    match tokio::fs::remove_dir(target).await {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => debug!(target = %target.display(), "left target directory in place: {}", e),
    }

    info!(volume = request.volume_id(), target = %target.display(), "volume unpublished");
    Ok(())
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, NodeGetInfoError> {
    let mut topology = HashMap::new();

    match self
      .annotator
      .set_label(self.node_id(), self.node_label())
      .await
    {
      Ok(true) => {
        self.mark_label_set();
        topology.insert(self.node_label().to_owned(), "true".to_owned());
      }
      Ok(false) => {}
      Err(e) => warn!(node = self.node_id(), "failed to set node readiness label: {}", e),
    }

    Ok(NodeGetInfoResponse::new(self.node_id()).with_accessible_topology(topology))
  }
}
