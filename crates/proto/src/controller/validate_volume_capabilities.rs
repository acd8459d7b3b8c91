use super::VolumeCapability;
use crate::{proto, secrets::Secrets};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct ValidateVolumeCapabilitiesRequest {
  volume_id: String,
  volume_context: HashMap<String, String>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
}

impl ValidateVolumeCapabilitiesRequest {
  /// The ID of the volume to check. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  /// The capabilities that the CO wants to check for the volume. This
  /// call SHALL return "confirmed" only if all the volume capabilities
  /// specified below are supported. This field is REQUIRED.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ValidateVolumeCapabilitiesRequest> for ValidateVolumeCapabilitiesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ValidateVolumeCapabilitiesRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "ValidateVolumeCapabilitiesRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    let volume_capabilities = match value.volume_capabilities {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "Missing ValidateVolumeCapabilitiesRequest.volume_capabilities",
        ))
      }
      v => v
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?,
    };

    Ok(ValidateVolumeCapabilitiesRequest {
      volume_id,
      volume_context: value.volume_context,
      volume_capabilities,
      parameters: value.parameters,
      secrets: value.secrets.into(),
    })
  }
}

#[derive(Debug)]
pub struct Confirmed {
  /// Volume context validated by the plugin.
  volume_context: Option<HashMap<String, String>>,
  /// Volume capabilities supported by the plugin.
  volume_capabilities: Vec<VolumeCapability>,
  /// The volume creation parameters validated by the plugin.
  parameters: Option<HashMap<String, String>>,
}

impl Confirmed {
  pub fn new(volume_capabilities: Vec<VolumeCapability>) -> Self {
    Confirmed {
      volume_context: None,
      volume_capabilities,
      parameters: None,
    }
  }

  pub fn with_volume_context(mut self, volume_context: HashMap<String, String>) -> Self {
    self.volume_context = Some(volume_context);
    self
  }

  pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
    self.parameters = Some(parameters);
    self
  }

  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }
}

impl From<Confirmed> for proto::validate_volume_capabilities_response::Confirmed {
  fn from(value: Confirmed) -> Self {
    proto::validate_volume_capabilities_response::Confirmed {
      volume_context: value.volume_context.unwrap_or_default(),
      volume_capabilities: value
        .volume_capabilities
        .into_iter()
        .map(Into::into)
        .collect(),
      parameters: value.parameters.unwrap_or_default(),
    }
  }
}

#[derive(Debug)]
pub enum ValidateVolumeCapabilitiesResponse {
  Confirmed(Confirmed),
  Message(String),
}

impl TryFrom<ValidateVolumeCapabilitiesResponse> for proto::ValidateVolumeCapabilitiesResponse {
  type Error = tonic::Status;

  fn try_from(value: ValidateVolumeCapabilitiesResponse) -> Result<Self, Self::Error> {
    Ok(match value {
      ValidateVolumeCapabilitiesResponse::Confirmed(confirmed) => {
        proto::ValidateVolumeCapabilitiesResponse {
          confirmed: Some(confirmed.into()),
          message: Default::default(),
        }
      }

      ValidateVolumeCapabilitiesResponse::Message(message) => {
        proto::ValidateVolumeCapabilitiesResponse {
          confirmed: None,
          message,
        }
      }
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ValidateVolumeCapabilitiesError {
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  /// Indicates that a volume corresponding to the specified `volume_id` does not exist.
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error("Internal error: {0}")]
  Internal(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ValidateVolumeCapabilitiesError> for tonic::Status {
  fn from(value: ValidateVolumeCapabilitiesError) -> Self {
    use tonic::{Code, Status};

    match value {
      ValidateVolumeCapabilitiesError::InvalidArgument(v) => Status::new(Code::InvalidArgument, v),
      ValidateVolumeCapabilitiesError::VolumeNotFound(v) => Status::new(Code::NotFound, v),
      ValidateVolumeCapabilitiesError::Internal(v) => Status::new(Code::Internal, v),
      ValidateVolumeCapabilitiesError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn volume_id_is_required() {
    let err = ValidateVolumeCapabilitiesRequest::try_from(
      proto::ValidateVolumeCapabilitiesRequest::default(),
    )
    .unwrap_err();
    assert_eq!(
      err.message(),
      "ValidateVolumeCapabilitiesRequest.volume_id is empty"
    );
  }

  #[test]
  fn message_response_has_no_confirmation() {
    let response = proto::ValidateVolumeCapabilitiesResponse::try_from(
      ValidateVolumeCapabilitiesResponse::Message("nope".into()),
    )
    .unwrap();
    assert!(response.confirmed.is_none());
    assert_eq!(response.message, "nope");
  }
}
