use crate::{
  backend::VolumeRecord,
  driver::Driver,
  errors::BackendError,
  units,
  validation::{
    param, param_key, params, validate_create_volume_request, validate_secrets, ValidationError,
  },
};
use async_trait::async_trait;
use panfs_csi_proto::{
  controller::{
    CapacityRange, Confirmed, ControllerCapabilities, ControllerExpandVolumeError,
    ControllerExpandVolumeRequest, ControllerExpandVolumeResponse, CreateVolumeError,
    CreateVolumeRequest, DeleteVolumeError, DeleteVolumeRequest, ValidateVolumeCapabilitiesError,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, Volume,
  },
  ControllerService,
};
use std::{collections::HashMap, convert::TryFrom};
use tracing::{error, info, warn};

impl From<ValidationError> for CreateVolumeError {
  fn from(value: ValidationError) -> Self {
    CreateVolumeError::InvalidArgument(value.to_string())
  }
}

/// Creation parameters as sent to the realm: the StorageClass parameters plus
/// the quotas derived from the capacity range. Zero bounds set no quota.
fn creation_parameters(
  parameters: &HashMap<String, String>,
  range: Option<&CapacityRange>,
) -> HashMap<String, String> {
  let mut parameters = parameters.clone();
  if let Some(range) = range {
    for &(name, bytes) in &[
      (params::SOFT, range.required_bytes()),
      (params::HARD, range.limit_bytes()),
    ] {
      if bytes > 0 {
        parameters.insert(param_key(name), units::format_gb(units::bytes_to_gb(bytes)));
      }
    }
  }

  parameters
}

/// Checks a requested capacity range against a volume that already exists.
fn capacity_conflict(record: &VolumeRecord, range: Option<&CapacityRange>) -> Option<String> {
  let range = range?;
  let soft = record.soft_quota_bytes();
  let hard = record.hard_quota_bytes();

  if range.required_bytes() > soft {
    return Some(format!(
      "volume {} exists with soft quota {} bytes, smaller than the required {} bytes",
      record.name,
      soft,
      range.required_bytes()
    ));
  }

  if range.limit_bytes() != 0 && hard != 0 && range.limit_bytes() != hard {
    return Some(format!(
      "volume {} exists with hard quota {} bytes, not the requested limit of {} bytes",
      record.name,
      hard,
      range.limit_bytes()
    ));
  }

  None
}

fn to_volume(record: &VolumeRecord) -> Volume {
  Volume::new(record.name.clone())
    .with_capacity_bytes(u64::try_from(record.soft_quota_bytes()).unwrap_or_default())
    .with_volume_context(record.volume_context())
}

/// Message handed back for backend failures that end up as INTERNAL. The
/// realm's own text stays in the server log.
fn internal_message(operation: &str, err: &BackendError) -> String {
  format!("{} failed: {} error from the realm", operation, err.kind())
}

#[async_trait]
impl ControllerService for Driver {
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::CREATE_DELETE_VOLUME
      | ControllerCapabilities::EXPAND_VOLUME
      | ControllerCapabilities::SINGLE_NODE_MULTI_WRITER
  }

  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CreateVolumeError> {
    validate_create_volume_request(&request)?;
    validate_secrets(request.secrets())?;

    let name = request.name();
    let range = request.capacity_range();
    let parameters = creation_parameters(request.parameters(), range);

    match self
      .backend
      .create_volume(name, &parameters, request.secrets())
      .await
    {
      Ok(record) => {
        let requested = param(&parameters, params::ENCRYPTION).unwrap_or("off");
        if requested != record.encryption() {
          warn!(
            volume = name,
            requested,
            reported = record.encryption(),
            "realm reports a different encryption mode than requested"
          );
        }

        info!(volume = name, "volume created");
        Ok(to_volume(&record))
      }

      Err(BackendError::AlreadyExists(_)) => {
        let record = self
          .backend
          .get_volume(name, request.secrets())
          .await
          .map_err(|e| {
            error!(volume = name, "failed to read existing volume: {}", e);
            CreateVolumeError::Internal(internal_message("CreateVolume", &e))
          })?;

        if let Some(conflict) = capacity_conflict(&record, range) {
          return Err(CreateVolumeError::VolumeConflict(conflict));
        }

        info!(volume = name, "volume already exists with a compatible capacity");
        Ok(to_volume(&record))
      }

      Err(e) => {
        error!(volume = name, ?parameters, "failed to create volume: {}", e);
        Err(CreateVolumeError::Internal(internal_message(
          "CreateVolume",
          &e,
        )))
      }
    }
  }

  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    validate_secrets(request.secrets())
      .map_err(|e| DeleteVolumeError::InvalidArgument(e.to_string()))?;

    let name = request.volume_id();

    match self.backend.delete_volume(name, request.secrets()).await {
      Ok(()) => {
        info!(volume = name, "volume deleted");
        Ok(())
      }

      Err(BackendError::NotFound(_)) => {
        info!(volume = name, "volume already gone");
        Ok(())
      }

      Err(e) => {
        error!(volume = name, "failed to delete volume: {}", e);
        Err(DeleteVolumeError::Internal(internal_message(
          "DeleteVolume",
          &e,
        )))
      }
    }
  }

  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError> {
    validate_secrets(request.secrets())
      .map_err(|e| ValidateVolumeCapabilitiesError::InvalidArgument(e.to_string()))?;

    if request
      .volume_capabilities()
      .iter()
      .any(|c| !c.access_type().is_mount())
    {
      return Err(ValidateVolumeCapabilitiesError::InvalidArgument(
        ValidationError::BlockUnsupported.to_string(),
      ));
    }

    let name = request.volume_id();
    match self.backend.get_volume(name, request.secrets()).await {
      Ok(_) => Ok(ValidateVolumeCapabilitiesResponse::Confirmed(
        Confirmed::new(request.volume_capabilities().to_vec())
          .with_volume_context(request.volume_context().clone())
          .with_parameters(request.parameters().clone()),
      )),

      Err(BackendError::NotFound(message)) => {
        Err(ValidateVolumeCapabilitiesError::VolumeNotFound(message))
      }

      Err(e) => {
        error!(volume = name, "failed to look up volume: {}", e);
        Err(ValidateVolumeCapabilitiesError::Internal(e.to_string()))
      }
    }
  }

  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    validate_secrets(request.secrets())
      .map_err(|e| ControllerExpandVolumeError::InvalidArgument(e.to_string()))?;

    let name = request.volume_id();
    let required = request.capacity_range().required_bytes();
    if required <= 0 {
      return Err(ControllerExpandVolumeError::InvalidArgument(format!(
        "required bytes must be positive, got {}",
        required
      )));
    }

    match self
      .backend
      .expand_volume(name, required, request.secrets())
      .await
    {
      Ok(()) => {
        info!(volume = name, bytes = required, "volume expanded");
        Ok(ControllerExpandVolumeResponse::new(
          u64::try_from(required).unwrap_or_default(),
          false,
        ))
      }

      Err(BackendError::NotFound(message)) => {
        Err(ControllerExpandVolumeError::VolumeNotFound(message))
      }

      Err(e) => {
        error!(volume = name, bytes = required, "failed to expand volume: {}", e);
        Err(ControllerExpandVolumeError::Internal(internal_message(
          "ControllerExpandVolume",
          &e,
        )))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::driver::fixtures::*;
  use panfs_csi_proto::proto;
  use std::convert::TryInto;

  fn create_request(
    name: &str,
    required: i64,
    limit: i64,
    capability: proto::VolumeCapability,
    parameters: &[(&str, &str)],
  ) -> CreateVolumeRequest {
    proto::CreateVolumeRequest {
      name: name.into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: required,
        limit_bytes: limit,
      }),
      volume_capabilities: vec![capability],
      parameters: parameters
        .iter()
        .map(|(k, v)| (param_key(k), (*v).to_owned()))
        .collect(),
      secrets: secrets(),
      ..Default::default()
    }
    .try_into()
    .unwrap()
  }

  fn mount_request(name: &str, required: i64, limit: i64) -> CreateVolumeRequest {
    create_request(name, required, limit, mount_capability(&[]), &[])
  }

  fn status<E: Into<tonic::Status>>(err: E) -> tonic::Code {
    err.into().code()
  }

  #[test]
  fn quotas_are_only_injected_for_set_bounds() {
    let parameters = creation_parameters(&HashMap::new(), Some(&CapacityRange::new(10 * GIB, 0)));
    assert_eq!(param(&parameters, params::SOFT), Some("10"));
    assert_eq!(param(&parameters, params::HARD), None);

    let parameters = creation_parameters(&HashMap::new(), None);
    assert!(parameters.is_empty());
  }

  #[test]
  fn advertised_capabilities() {
    let caps = ControllerService::capabilities(&harness().driver);
    assert_eq!(
      caps,
      ControllerCapabilities::CREATE_DELETE_VOLUME
        | ControllerCapabilities::EXPAND_VOLUME
        | ControllerCapabilities::SINGLE_NODE_MULTI_WRITER
    );
  }

  #[tokio::test]
  async fn create_reports_soft_quota_as_capacity() {
    let h = harness();

    let volume = h
      .driver
      .create_volume(mount_request("vol1", 10 * GIB, 0))
      .await
      .unwrap();

    assert_eq!(volume.volume_id(), "vol1");
    assert_eq!(volume.capacity_bytes().map(|c| c.get()), Some(10 << 30));
    assert_eq!(
      volume.volume_context().get(&param_key(params::ENCRYPTION)),
      Some(&"off".to_owned())
    );
    assert_eq!(h.backend.volume("vol1").unwrap().soft_quota_gb, 10.0);
  }

  #[tokio::test]
  async fn create_is_idempotent() {
    let h = harness();
    let parameters = &[("layout", "raid6+"), ("bladeset", "Set 1")];

    let first = h
      .driver
      .create_volume(create_request("vol1", 10 * GIB, 20 * GIB, mount_capability(&[]), parameters))
      .await
      .unwrap();
    let second = h
      .driver
      .create_volume(create_request("vol1", 10 * GIB, 20 * GIB, mount_capability(&[]), parameters))
      .await
      .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.backend.create_count(), 2);
  }

  #[tokio::test]
  async fn existing_volume_with_smaller_quota_conflicts() {
    let h = harness();
    h.driver
      .create_volume(mount_request("vol1", 10 * GIB, 0))
      .await
      .unwrap();

    let err = h
      .driver
      .create_volume(mount_request("vol1", 11 * GIB, 0))
      .await
      .unwrap_err();
    assert!(matches!(err, CreateVolumeError::VolumeConflict(_)));
    assert_eq!(status(err), tonic::Code::AlreadyExists);

    h.driver
      .create_volume(mount_request("vol1", 10 * GIB, 0))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn existing_volume_with_other_hard_quota_conflicts() {
    let h = harness();
    h.driver
      .create_volume(mount_request("vol1", 10 * GIB, 20 * GIB))
      .await
      .unwrap();

    let err = h
      .driver
      .create_volume(mount_request("vol1", 10 * GIB, 30 * GIB))
      .await
      .unwrap_err();
    assert!(matches!(err, CreateVolumeError::VolumeConflict(_)));
  }

  #[tokio::test]
  async fn block_capability_is_rejected_before_the_realm_is_called() {
    let h = harness();

    let err = h
      .driver
      .create_volume(create_request("vol1", GIB, 0, block_capability(), &[]))
      .await
      .unwrap_err();

    assert!(matches!(err, CreateVolumeError::InvalidArgument(_)));
    assert_eq!(h.backend.call_count(), 0);
  }

  #[tokio::test]
  async fn invalid_parameters_are_rejected_before_the_realm_is_called() {
    let h = harness();

    let err = h
      .driver
      .create_volume(create_request(
        "vol1",
        GIB,
        0,
        mount_capability(&[]),
        &[("stripeunit", "17K")],
      ))
      .await
      .unwrap_err();

    assert_eq!(status(err), tonic::Code::InvalidArgument);
    assert_eq!(h.backend.call_count(), 0);
  }

  #[tokio::test]
  async fn missing_credentials_are_rejected() {
    let h = harness();
    let request = proto::CreateVolumeRequest {
      name: "vol1".into(),
      volume_capabilities: vec![mount_capability(&[])],
      ..Default::default()
    };

    let err = h
      .driver
      .create_volume(request.try_into().unwrap())
      .await
      .unwrap_err();

    assert!(matches!(err, CreateVolumeError::InvalidArgument(_)));
    assert_eq!(h.backend.call_count(), 0);
  }

  #[tokio::test]
  async fn backend_failures_are_internal_without_realm_text() {
    let h = harness();
    h.backend
      .fail_with("ssh: connect to host 10.0.0.1 port 22: exit status 255");

    let err = h
      .driver
      .create_volume(mount_request("vol1", GIB, 0))
      .await
      .unwrap_err();

    let status: tonic::Status = err.into();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(!status.message().contains("10.0.0.1"));
  }

  #[tokio::test]
  async fn encryption_mismatch_still_creates_the_volume() {
    let h = harness();
    h.backend.report_encryption("on");

    let volume = h
      .driver
      .create_volume(mount_request("vol1", 10 * GIB, 0))
      .await
      .unwrap();

    assert_eq!(volume.volume_id(), "vol1");
    assert_eq!(
      volume.volume_context().get(&param_key(params::ENCRYPTION)),
      Some(&"on".to_owned())
    );
  }

  #[tokio::test]
  async fn requests_without_credentials_never_reach_the_realm() {
    let h = harness();
    h.backend.insert(VolumeRecord {
      soft_quota_gb: 10.0,
      ..VolumeRecord::new("vol1")
    });

    let delete = proto::DeleteVolumeRequest {
      volume_id: "vol1".into(),
      secrets: Default::default(),
    };
    let err = h
      .driver
      .delete_volume(delete.try_into().unwrap())
      .await
      .unwrap_err();
    assert!(matches!(err, DeleteVolumeError::InvalidArgument(_)));

    let validate = proto::ValidateVolumeCapabilitiesRequest {
      volume_id: "vol1".into(),
      volume_capabilities: vec![mount_capability(&[])],
      ..Default::default()
    };
    let err = h
      .driver
      .validate_volume_capabilities(validate.try_into().unwrap())
      .await
      .unwrap_err();
    assert_eq!(status(err), tonic::Code::InvalidArgument);

    let mut expand = proto::ControllerExpandVolumeRequest {
      volume_id: "vol1".into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: 20 * GIB,
        limit_bytes: 0,
      }),
      ..Default::default()
    };
    expand.secrets.insert("realm_ip".into(), "10.0.0.1".into());
    let err = h
      .driver
      .controller_expand_volume(expand.try_into().unwrap())
      .await
      .unwrap_err();
    assert_eq!(status(err), tonic::Code::InvalidArgument);

    assert_eq!(h.backend.call_count(), 0);
    assert_eq!(h.backend.volume("vol1").unwrap().soft_quota_gb, 10.0);
  }

  #[tokio::test]
  async fn delete_of_missing_volume_succeeds() {
    let h = harness();

    let request = proto::DeleteVolumeRequest {
      volume_id: "vol1".into(),
      secrets: secrets(),
    };
    h.driver
      .delete_volume(request.try_into().unwrap())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn delete_removes_the_volume() {
    let h = harness();
    h.backend.insert(VolumeRecord::new("vol1"));

    let request = proto::DeleteVolumeRequest {
      volume_id: "vol1".into(),
      secrets: secrets(),
    };
    h.driver
      .delete_volume(request.try_into().unwrap())
      .await
      .unwrap();

    assert!(h.backend.volume("vol1").is_none());
  }

  fn validate_request(capability: proto::VolumeCapability) -> ValidateVolumeCapabilitiesRequest {
    proto::ValidateVolumeCapabilitiesRequest {
      volume_id: "vol1".into(),
      volume_capabilities: vec![capability],
      secrets: secrets(),
      ..Default::default()
    }
    .try_into()
    .unwrap()
  }

  #[tokio::test]
  async fn validate_confirms_mount_capabilities() {
    let h = harness();
    h.backend.insert(VolumeRecord::new("vol1"));

    let response = h
      .driver
      .validate_volume_capabilities(validate_request(mount_capability(&["noatime"])))
      .await
      .unwrap();

    match response {
      ValidateVolumeCapabilitiesResponse::Confirmed(confirmed) => {
        assert_eq!(confirmed.volume_capabilities().len(), 1)
      }
      other => panic!("unexpected response {:?}", other),
    }
  }

  #[tokio::test]
  async fn validate_rejects_block_and_missing_volumes() {
    let h = harness();

    let err = h
      .driver
      .validate_volume_capabilities(validate_request(block_capability()))
      .await
      .unwrap_err();
    assert_eq!(status(err), tonic::Code::InvalidArgument);

    let err = h
      .driver
      .validate_volume_capabilities(validate_request(mount_capability(&[])))
      .await
      .unwrap_err();
    assert_eq!(status(err), tonic::Code::NotFound);
  }

  fn expand_request(required: i64) -> ControllerExpandVolumeRequest {
    proto::ControllerExpandVolumeRequest {
      volume_id: "vol1".into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: required,
        limit_bytes: 0,
      }),
      secrets: secrets(),
      ..Default::default()
    }
    .try_into()
    .unwrap()
  }

  #[tokio::test]
  async fn expand_grows_soft_quota() {
    let h = harness();
    h.backend.insert(VolumeRecord {
      soft_quota_gb: 10.0,
      ..VolumeRecord::new("vol1")
    });

    let response = h
      .driver
      .controller_expand_volume(expand_request(20 * GIB))
      .await
      .unwrap();
    let response = proto::ControllerExpandVolumeResponse::try_from(response).unwrap();

    assert_eq!(response.capacity_bytes, 20 * GIB);
    assert!(!response.node_expansion_required);
    assert_eq!(h.backend.volume("vol1").unwrap().soft_quota_gb, 20.0);
  }

  #[tokio::test]
  async fn expand_requires_positive_size_and_existing_volume() {
    let h = harness();

    let err = h
      .driver
      .controller_expand_volume(expand_request(0))
      .await
      .unwrap_err();
    assert_eq!(status(err), tonic::Code::InvalidArgument);
    assert_eq!(h.backend.call_count(), 0);

    let err = h
      .driver
      .controller_expand_volume(expand_request(GIB))
      .await
      .unwrap_err();
    assert_eq!(status(err), tonic::Code::NotFound);
  }
}
