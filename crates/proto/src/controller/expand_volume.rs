use super::{CapacityRange, VolumeCapability};
use crate::{proto, secrets::Secrets};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerExpandVolumeRequest {
  volume_id: String,
  capacity_range: CapacityRange,
  secrets: Secrets,
  volume_capability: Option<VolumeCapability>,
}

impl ControllerExpandVolumeRequest {
  /// The ID of the volume to expand. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// This allows CO to specify the capacity requirements of the volume
  /// after expansion. This field is REQUIRED.
  #[inline]
  pub fn capacity_range(&self) -> &CapacityRange {
    &self.capacity_range
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  /// Volume capability describing how the CO intends to use this volume.
  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::ControllerExpandVolumeRequest> for ControllerExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "ControllerExpandVolumeRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    let capacity_range = match value.capacity_range {
      None => {
        return Err(tonic::Status::invalid_argument(
          "ControllerExpandVolumeRequest.capacity_range missing",
        ))
      }
      Some(v) => v.into(),
    };

    let secrets = value.secrets.into();
    let volume_capability = value.volume_capability.map(TryInto::try_into).transpose()?;

    Ok(ControllerExpandVolumeRequest {
      volume_id,
      capacity_range,
      secrets,
      volume_capability,
    })
  }
}

#[derive(Debug)]
pub struct ControllerExpandVolumeResponse {
  /// Capacity of volume after expansion.
  capacity_bytes: u64,
  /// Whether node expansion is required for the volume. When true
  /// the CO MUST make NodeExpandVolume RPC call on the node.
  node_expansion_required: bool,
}

impl ControllerExpandVolumeResponse {
  pub fn new(capacity_bytes: u64, node_expansion_required: bool) -> Self {
    ControllerExpandVolumeResponse {
      capacity_bytes,
      node_expansion_required,
    }
  }
}

impl TryFrom<ControllerExpandVolumeResponse> for proto::ControllerExpandVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: ControllerExpandVolumeResponse) -> Result<Self, Self::Error> {
    let capacity_bytes = i64::try_from(value.capacity_bytes).map_err(|_| {
      tonic::Status::out_of_range("ControllerExpandVolumeResponse.capacity_bytes overflows int64")
    })?;

    Ok(proto::ControllerExpandVolumeResponse {
      capacity_bytes,
      node_expansion_required: value.node_expansion_required,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ControllerExpandVolumeError {
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  /// Indicates that a volume corresponding to the specified volume_id does not exist.
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error("Internal error: {0}")]
  Internal(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ControllerExpandVolumeError> for tonic::Status {
  fn from(value: ControllerExpandVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      ControllerExpandVolumeError::InvalidArgument(v) => Status::new(Code::InvalidArgument, v),
      ControllerExpandVolumeError::VolumeNotFound(v) => Status::new(Code::NotFound, v),
      ControllerExpandVolumeError::Internal(v) => Status::new(Code::Internal, v),
      ControllerExpandVolumeError::Other(v) => v,
    }
  }
}
