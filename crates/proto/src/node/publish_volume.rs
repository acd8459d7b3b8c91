use super::VolumeCapability;
use crate::{proto, secrets::Secrets};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodePublishVolumeRequest {
  volume_id: String,
  target_path: PathBuf,
  volume_capability: VolumeCapability,
  readonly: bool,
  secrets: Secrets,
  volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
  /// The ID of the volume to publish. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The path to which the volume will be published. It MUST be an
  /// absolute path in the root filesystem of the process serving this
  /// request. Creation of target_path is the responsibility of the SP.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }

  /// Volume capability describing how the CO intends to use this volume.
  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  /// Indicates SP MUST publish the volume in readonly mode.
  #[inline]
  pub fn readonly(&self) -> bool {
    self.readonly
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  /// Volume context as returned by SP in
  /// CreateVolumeResponse.Volume.volume_context, plus whatever the CO
  /// adds (pod info, the ephemeral marker).
  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::NodePublishVolumeRequest> for NodePublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodePublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    let target_path = match value.target_path {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.target_path is empty",
        ))
      }
      v => match PathBuf::from(v) {
        v if !v.is_absolute() => {
          return Err(tonic::Status::invalid_argument(
            "NodePublishVolumeRequest.target_path is not absolute",
          ))
        }
        v => v,
      },
    };

    let volume_capability = match value.volume_capability {
      None => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.volume_capability missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    Ok(NodePublishVolumeRequest {
      volume_id,
      target_path,
      volume_capability,
      readonly: value.readonly,
      secrets: value.secrets.into(),
      volume_context: value.volume_context,
    })
  }
}

#[derive(Debug, Error)]
pub enum NodePublishVolumeError {
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  /// Indicates that the requested access type cannot be served by this
  /// plugin.
  #[error("Exceeds capabilities: {0}")]
  ExceedsCapabilities(String),

  /// Indicates an inline ephemeral volume, which this plugin does not
  /// serve.
  #[error("Ephemeral volumes are not supported: {0}")]
  EphemeralUnsupported(String),

  #[error("Internal error: {0}")]
  Internal(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

use tonic::{Code, Status};
impl From<NodePublishVolumeError> for tonic::Status {
  fn from(value: NodePublishVolumeError) -> Self {
    match value {
      NodePublishVolumeError::InvalidArgument(v) => Status::new(Code::InvalidArgument, v),
      NodePublishVolumeError::ExceedsCapabilities(v) => Status::new(Code::FailedPrecondition, v),
      NodePublishVolumeError::EphemeralUnsupported(v) => Status::new(Code::FailedPrecondition, v),
      NodePublishVolumeError::Internal(v) => Status::new(Code::Internal, v),
      NodePublishVolumeError::Other(v) => v,
    }
  }
}
