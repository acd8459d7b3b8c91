use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{
  api::{Api, Patch, PatchParams},
  Client,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AnnotatorError {
  #[error("Failed to create kubernetes client: {0}")]
  Client(#[source] kube::Error),

  #[error("Failed to patch node {0}: {1}")]
  Patch(String, #[source] kube::Error),
}

/// Marks the orchestrator's node object as ready for PanFS volumes.
#[async_trait]
pub trait NodeAnnotator: Send + Sync + 'static {
  /// Sets `label` on `node`. Returns whether a label was actually applied.
  async fn set_label(&self, node: &str, label: &str) -> Result<bool, AnnotatorError>;

  async fn clear_label(&self, node: &str, label: &str) -> Result<(), AnnotatorError>;
}

/// Leaves the node object alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnnotator;

#[async_trait]
impl NodeAnnotator for NoopAnnotator {
  async fn set_label(&self, _node: &str, _label: &str) -> Result<bool, AnnotatorError> {
    Ok(false)
  }

  async fn clear_label(&self, _node: &str, _label: &str) -> Result<(), AnnotatorError> {
    Ok(())
  }
}

/// Labels the node object through the API server, using the in-cluster
/// service account or the local kubeconfig.
pub struct KubeAnnotator {
  nodes: Api<Node>,
}

impl KubeAnnotator {
  pub async fn new() -> Result<Self, AnnotatorError> {
    let client = Client::try_default().await.map_err(AnnotatorError::Client)?;

    Ok(KubeAnnotator {
      nodes: Api::all(client),
    })
  }

  async fn patch(&self, node: &str, patch: Value) -> Result<(), AnnotatorError> {
    self
      .nodes
      .patch(node, &PatchParams::default(), &Patch::Merge(patch))
      .await
      .map_err(|e| AnnotatorError::Patch(node.to_owned(), e))?;

    Ok(())
  }
}

/// Merge patch for the node labels. A null value removes the label.
fn label_patch(label: &str, value: Option<&str>) -> Value {
  json!({
    "metadata": {
      "labels": {
        label: value,
      },
    },
  })
}

#[async_trait]
impl NodeAnnotator for KubeAnnotator {
  async fn set_label(&self, node: &str, label: &str) -> Result<bool, AnnotatorError> {
    self.patch(node, label_patch(label, Some("true"))).await?;
    info!(node, label, "node labelled");

    Ok(true)
  }

  async fn clear_label(&self, node: &str, label: &str) -> Result<(), AnnotatorError> {
    self.patch(node, label_patch(label, None)).await?;
    info!(node, label, "node label removed");

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_patch_writes_the_label() {
    assert_eq!(
      label_patch("node.kubernetes.io/panfs-csi-ready", Some("true")),
      json!({ "metadata": { "labels": { "node.kubernetes.io/panfs-csi-ready": "true" } } })
    );
  }

  #[test]
  fn clear_patch_nulls_the_label() {
    let patch = label_patch("node.kubernetes.io/panfs-csi-ready", None);

    assert!(patch["metadata"]["labels"]["node.kubernetes.io/panfs-csi-ready"].is_null());
    assert_eq!(patch["metadata"]["labels"].as_object().map(|m| m.len()), Some(1));
  }

  #[tokio::test]
  async fn noop_annotator_never_labels() {
    assert!(!NoopAnnotator.set_label("node-1", "ready").await.unwrap());
    NoopAnnotator.clear_label("node-1", "ready").await.unwrap();
  }
}
