mod capabilities;
mod create_volume;
mod delete_volume;
mod expand_volume;
mod validate_volume_capabilities;

use crate::{
  plugin, proto,
  utils::{parse_request, Record},
  IdentityService,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use create_volume::*;
pub use delete_volume::*;
pub use expand_volume::*;
pub use validate_volume_capabilities::*;

#[async_trait]
pub trait ControllerService: IdentityService {
  /// Get the set of services provided by this controller.
  #[inline]
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::empty()
  }

  /// Provisions a new volume on behalf of a user.
  ///
  /// This operation MUST be idempotent. If a volume corresponding to the
  /// specified volume `name` already exists and is compatible with the
  /// specified `capacity_range`, the plugin MUST reply `0 OK` with the
  /// corresponding volume.
  #[allow(unused_variables)]
  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CreateVolumeError> {
    unsupported!("CreateVolume")
  }

  /// Deprovisions a volume. Deleting a volume that no longer exists is a
  /// success.
  #[allow(unused_variables)]
  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    unsupported!("DeleteVolume")
  }

  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError>;

  #[allow(unused_variables)]
  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    unsupported!("ControllerExpandVolume")
  }
}

pub(crate) struct Controller<T: ControllerService>(Arc<T>);

impl<T: ControllerService> Controller<T> {
  pub(crate) fn new(service: Arc<T>) -> Self {
    Controller(service)
  }
}

#[async_trait]
impl<T: ControllerService> proto::identity_server::Identity for Controller<T> {
  #[instrument(
    name = "identity.get_plugin_info",
    skip(self, _request),
    fields(name, vendor_version, manifest)
  )]
  async fn get_plugin_info(
    &self,
    _request: tonic::Request<proto::GetPluginInfoRequest>,
  ) -> Result<tonic::Response<proto::GetPluginInfoResponse>, tonic::Status> {
    let response = proto::GetPluginInfoResponse {
      name: self.0.name().record_field("name").into(),
      vendor_version: self.0.version().record_field("vendor_version").into(),
      manifest: self.0.manifest().record_field("manifest").clone(),
    };

    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "identity.get_plugin_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn get_plugin_capabilities(
    &self,
    _request: tonic::Request<proto::GetPluginCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::GetPluginCapabilitiesResponse>, tonic::Status> {
    let response = plugin::get_capabilities(&*self.0, true).record_response();

    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "identity.probe", skip(self, _request), fields(ready))]
  async fn probe(
    &self,
    _request: tonic::Request<proto::ProbeRequest>,
  ) -> Result<tonic::Response<proto::ProbeResponse>, tonic::Status> {
    let response = proto::ProbeResponse {
      ready: Some(self.0.ready().record_field("ready")),
    };

    Ok(tonic::Response::new(response))
  }
}

#[async_trait]
impl<T: ControllerService> proto::controller_server::Controller for Controller<T> {
  #[instrument(
    name = "controller.create_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_volume(
    &self,
    request: tonic::Request<proto::CreateVolumeRequest>,
  ) -> Result<tonic::Response<proto::CreateVolumeResponse>, tonic::Status> {
    let request = parse_request(request)?;
    let response = self
      .0
      .create_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.delete_volume",
    skip(self, request),
    fields(request)
  )]
  async fn delete_volume(
    &self,
    request: tonic::Request<proto::DeleteVolumeRequest>,
  ) -> Result<tonic::Response<proto::DeleteVolumeResponse>, tonic::Status> {
    let request = parse_request(request)?;
    self.0.delete_volume(request).await?;
    let response = proto::DeleteVolumeResponse {};
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.controller_publish_volume", skip(self, _request))]
  async fn controller_publish_volume(
    &self,
    _request: tonic::Request<proto::ControllerPublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerPublishVolumeResponse>, tonic::Status> {
    unsupported!("ControllerPublishVolume")
  }

  #[instrument(name = "controller.controller_unpublish_volume", skip(self, _request))]
  async fn controller_unpublish_volume(
    &self,
    _request: tonic::Request<proto::ControllerUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerUnpublishVolumeResponse>, tonic::Status> {
    unsupported!("ControllerUnpublishVolume")
  }

  #[instrument(
    name = "controller.validate_volume_capabilities",
    skip(self, request),
    fields(request, response)
  )]
  async fn validate_volume_capabilities(
    &self,
    request: tonic::Request<proto::ValidateVolumeCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ValidateVolumeCapabilitiesResponse>, tonic::Status> {
    let request = parse_request(request)?;
    let response = self
      .0
      .validate_volume_capabilities(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.list_volumes", skip(self, _request))]
  async fn list_volumes(
    &self,
    _request: tonic::Request<proto::ListVolumesRequest>,
  ) -> Result<tonic::Response<proto::ListVolumesResponse>, tonic::Status> {
    unsupported!("ListVolumes")
  }

  #[instrument(name = "controller.get_capacity", skip(self, _request))]
  async fn get_capacity(
    &self,
    _request: tonic::Request<proto::GetCapacityRequest>,
  ) -> Result<tonic::Response<proto::GetCapacityResponse>, tonic::Status> {
    unsupported!("GetCapacity")
  }

  #[instrument(
    name = "controller.controller_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn controller_get_capabilities(
    &self,
    _request: tonic::Request<proto::ControllerGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetCapabilitiesResponse>, tonic::Status> {
    let response = self.0.capabilities().record_response().into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.controller_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_expand_volume(
    &self,
    request: tonic::Request<proto::ControllerExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerExpandVolumeResponse>, tonic::Status> {
    let request = parse_request(request)?;
    let response = self
      .0
      .controller_expand_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.controller_get_volume", skip(self, _request))]
  async fn controller_get_volume(
    &self,
    _request: tonic::Request<proto::ControllerGetVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetVolumeResponse>, tonic::Status> {
    unsupported!("ControllerGetVolume")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proto::{controller_server::Controller as _, identity_server::Identity as _};

  struct Plugin;

  impl IdentityService for Plugin {
    fn name(&self) -> &str {
      "test.csi.example.com"
    }

    fn version(&self) -> &str {
      "0.0.1"
    }
  }

  #[async_trait]
  impl ControllerService for Plugin {
    fn capabilities(&self) -> ControllerCapabilities {
      ControllerCapabilities::CREATE_DELETE_VOLUME
    }

    async fn validate_volume_capabilities(
      &self,
      request: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError> {
      Ok(ValidateVolumeCapabilitiesResponse::Confirmed(
        Confirmed::new(request.volume_capabilities().to_vec()),
      ))
    }
  }

  fn controller() -> Controller<Plugin> {
    Controller::new(Arc::new(Plugin))
  }

  #[tokio::test]
  async fn unimplemented_rpcs_report_unimplemented() {
    let err = controller()
      .list_volumes(tonic::Request::new(proto::ListVolumesRequest::default()))
      .await
      .unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unimplemented);

    let err = controller()
      .get_capacity(tonic::Request::new(proto::GetCapacityRequest::default()))
      .await
      .unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unimplemented);
  }

  #[tokio::test]
  async fn default_create_volume_is_unimplemented() {
    let request = proto::CreateVolumeRequest {
      name: "vol1".into(),
      volume_capabilities: vec![proto::VolumeCapability {
        access_mode: Some(proto::volume_capability::AccessMode { mode: 1 }),
        access_type: Some(proto::volume_capability::AccessType::Mount(
          Default::default(),
        )),
      }],
      ..Default::default()
    };

    let err = controller()
      .create_volume(tonic::Request::new(request))
      .await
      .unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unimplemented);
  }

  #[tokio::test]
  async fn probe_reports_ready() {
    let response = controller()
      .probe(tonic::Request::new(proto::ProbeRequest {}))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(response.ready, Some(true));
  }

  #[tokio::test]
  async fn plugin_info_reports_name_and_version() {
    let response = controller()
      .get_plugin_info(tonic::Request::new(proto::GetPluginInfoRequest {}))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(response.name, "test.csi.example.com");
    assert_eq!(response.vendor_version, "0.0.1");
  }
}
