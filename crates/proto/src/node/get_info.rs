use super::Topology;
use crate::proto;
use std::{convert::TryFrom, num::NonZeroU64};
use thiserror::Error;

#[derive(Debug)]
pub struct NodeGetInfoResponse {
  /// The identifier of the node as understood by the SP. This field SHALL
  /// be used by the CO in subsequent calls to refer to this node.
  node_id: String,

  /// Maximum number of volumes that controller can publish to the node.
  max_volumes_per_node: Option<NonZeroU64>,

  /// Specifies where (regions, zones, racks, etc.) the node is
  /// accessible from.
  accessible_topology: Option<Topology>,
}

impl NodeGetInfoResponse {
  pub fn new(node_id: impl Into<String>) -> Self {
    NodeGetInfoResponse {
      node_id: node_id.into(),
      max_volumes_per_node: None,
      accessible_topology: None,
    }
  }

  pub fn with_accessible_topology(mut self, topology: Topology) -> Self {
    self.accessible_topology = Some(topology);
    self
  }

  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn accessible_topology(&self) -> Option<&Topology> {
    self.accessible_topology.as_ref()
  }
}

impl TryFrom<NodeGetInfoResponse> for proto::NodeGetInfoResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeGetInfoResponse) -> Result<Self, Self::Error> {
    if value.node_id.len() > 192 {
      return Err(tonic::Status::internal(
        "NodeGetInfoResponse.node_id exceeds 192 bytes",
      ));
    }

    let max_volumes_per_node = value
      .max_volumes_per_node
      .map(|v| i64::try_from(v.get()).unwrap_or(i64::MAX))
      .unwrap_or_default();
    let accessible_topology = value
      .accessible_topology
      .map(|segments| proto::Topology { segments });

    Ok(proto::NodeGetInfoResponse {
      node_id: value.node_id,
      max_volumes_per_node,
      accessible_topology,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeGetInfoError {
  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeGetInfoError> for tonic::Status {
  fn from(value: NodeGetInfoError) -> Self {
    match value {
      NodeGetInfoError::Other(v) => v,
    }
  }
}
