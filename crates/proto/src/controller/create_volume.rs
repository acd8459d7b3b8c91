use super::{CapacityRange, VolumeCapability, VolumeContentSource};
use crate::{proto, secrets::Secrets};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct CreateVolumeRequest {
  name: String,
  capacity_range: Option<CapacityRange>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
  volume_content_source: Option<VolumeContentSource>,
}

impl CreateVolumeRequest {
  /// The suggested name for the storage space. This field is REQUIRED.
  /// It serves two purposes:
  /// 1) Idempotency - This name is generated by the CO to achieve
  ///    idempotency.
  /// 2) Suggested name - The plugin may use it as an identifier for the
  ///    provisioned volume.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// This field is OPTIONAL. This allows the CO to specify the capacity
  /// requirement of the volume to be provisioned. If not specified, the
  /// Plugin MAY choose an implementation-defined capacity range.
  #[inline]
  pub fn capacity_range(&self) -> Option<&CapacityRange> {
    self.capacity_range.as_ref()
  }

  /// The capabilities that the provisioned volume MUST have. SP MUST
  /// provision a volume that will satisfy ALL of the capabilities
  /// specified in this list.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  /// Plugin specific creation-time parameters passed in as opaque
  /// key-value pairs. This field is OPTIONAL.
  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  /// Secrets required by plugin to complete volume creation request.
  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  /// If specified, the new volume will be pre-populated with data from
  /// this source.
  #[inline]
  pub fn volume_content_source(&self) -> Option<&VolumeContentSource> {
    self.volume_content_source.as_ref()
  }
}

impl TryFrom<proto::CreateVolumeRequest> for CreateVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateVolumeRequest) -> Result<Self, Self::Error> {
    let name = match value.name {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "CreateVolumeRequest.name is empty",
        ))
      }
      v => v,
    };

    let volume_capabilities = match value.volume_capabilities {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "Missing CreateVolumeRequest.volume_capabilities",
        ))
      }
      v => v
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?,
    };

    let capacity_range = value.capacity_range.map(Into::into);
    let volume_content_source = match value.volume_content_source {
      None => None,
      Some(v) => v.try_into()?,
    };

    Ok(CreateVolumeRequest {
      name,
      capacity_range,
      volume_capabilities,
      parameters: value.parameters,
      secrets: value.secrets.into(),
      volume_content_source,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CreateVolumeError {
  /// The request, its parameters or its secrets failed validation.
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  /// A volume with the requested name exists but is incompatible with the
  /// requested capacity range.
  #[error("Volume conflict: {0}")]
  VolumeConflict(String),

  #[error("Internal error: {0}")]
  Internal(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<CreateVolumeError> for tonic::Status {
  fn from(value: CreateVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      CreateVolumeError::InvalidArgument(v) => Status::new(Code::InvalidArgument, v),
      CreateVolumeError::VolumeConflict(v) => Status::new(Code::AlreadyExists, v),
      CreateVolumeError::Internal(v) => Status::new(Code::Internal, v),
      CreateVolumeError::Other(v) => v,
    }
  }
}
