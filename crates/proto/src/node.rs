mod capabilities;
mod get_info;
mod publish_volume;
mod unpublish_volume;

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
pub use get_info::*;
pub use publish_volume::*;
pub use unpublish_volume::*;

#[async_trait]
pub trait NodeService: IdentityService {
  /// Get the set of services provided by this node.
  #[inline]
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::empty()
  }

  /// Publishes a volume at the requested target path. This operation MUST
  /// be idempotent.
  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError>;

  /// Undoes the work done by `node_publish_volume`. This operation MUST be
  /// idempotent.
  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError>;

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, NodeGetInfoError>;
}

pub(crate) struct Node<T: NodeService>(Arc<T>);

impl<T: NodeService> Node<T> {
  pub(crate) fn new(service: Arc<T>) -> Self {
    Node(service)
  }
}

#[async_trait]
impl<T: NodeService> proto::identity_server::Identity for Node<T> {
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
    let response = plugin::get_capabilities(&*self.0, false).record_response();

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
impl<T: NodeService> proto::node_server::Node for Node<T> {
  #[instrument(name = "node.node_stage_volume", skip(self, _request))]
  async fn node_stage_volume(
    &self,
    _request: tonic::Request<proto::NodeStageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeStageVolumeResponse>, tonic::Status> {
    unsupported!("NodeStageVolume")
  }

  #[instrument(name = "node.node_unstage_volume", skip(self, _request))]
  async fn node_unstage_volume(
    &self,
    _request: tonic::Request<proto::NodeUnstageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnstageVolumeResponse>, tonic::Status> {
    unsupported!("NodeUnstageVolume")
  }

  #[instrument(name = "node.node_publish_volume", skip(self, request), fields(request))]
  async fn node_publish_volume(
    &self,
    request: tonic::Request<proto::NodePublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodePublishVolumeResponse>, tonic::Status> {
    let request = parse_request(request)?;
    self.0.node_publish_volume(request).await?;
    Ok(tonic::Response::new(proto::NodePublishVolumeResponse {}))
  }

  #[instrument(name = "node.node_unpublish_volume", skip(self, request), fields(request))]
  async fn node_unpublish_volume(
    &self,
    request: tonic::Request<proto::NodeUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnpublishVolumeResponse>, tonic::Status> {
    let request = parse_request(request)?;
    self.0.node_unpublish_volume(request).await?;
    Ok(tonic::Response::new(proto::NodeUnpublishVolumeResponse {}))
  }

  #[instrument(name = "node.node_get_volume_stats", skip(self, _request))]
  async fn node_get_volume_stats(
    &self,
    _request: tonic::Request<proto::NodeGetVolumeStatsRequest>,
  ) -> Result<tonic::Response<proto::NodeGetVolumeStatsResponse>, tonic::Status> {
    unsupported!("NodeGetVolumeStats")
  }

  #[instrument(name = "node.node_expand_volume", skip(self, _request))]
  async fn node_expand_volume(
    &self,
    _request: tonic::Request<proto::NodeExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeExpandVolumeResponse>, tonic::Status> {
    unsupported!("NodeExpandVolume")
  }

  #[instrument(
    name = "node.node_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn node_get_capabilities(
    &self,
    _request: tonic::Request<proto::NodeGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::NodeGetCapabilitiesResponse>, tonic::Status> {
    let response = self.0.capabilities().record_response().into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_get_info",
    skip(self, _request),
    fields(response)
  )]
  async fn node_get_info(
    &self,
    _request: tonic::Request<proto::NodeGetInfoRequest>,
  ) -> Result<tonic::Response<proto::NodeGetInfoResponse>, tonic::Status> {
    let response = self
      .0
      .node_get_info()
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }
}
