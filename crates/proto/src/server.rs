use crate::{
  controller::Controller, node::Node, proto, ControllerService, NodeService,
};
use futures::TryStreamExt;
use std::{
  fmt,
  future::Future,
  io,
  net::SocketAddr,
  path::{Path, PathBuf},
  pin::Pin,
  str::FromStr,
  sync::Arc,
  task::{Context, Poll},
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{server::Connected, Server};
use tracing::{info, warn};

use proto::{
  controller_server::ControllerServer, identity_server::IdentityServer, node_server::NodeServer,
};

#[derive(Debug, Error)]
pub enum ServeError {
  #[error("Invalid endpoint '{0}', only unix:// endpoints are supported")]
  InvalidEndpoint(String),

  #[error("Failed to prepare socket {path}: {source}")]
  Socket {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Transport(#[from] tonic::transport::Error),
}

/// Address the plugin listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  Unix(PathBuf),
}

impl Endpoint {
  #[inline]
  pub fn path(&self) -> &Path {
    match self {
      Endpoint::Unix(path) => path,
    }
  }
}

impl FromStr for Endpoint {
  type Err = ServeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.strip_prefix("unix://") {
      Some(path) if path.starts_with('/') => Ok(Endpoint::Unix(PathBuf::from(path))),
      _ => Err(ServeError::InvalidEndpoint(s.to_owned())),
    }
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
    }
  }
}

/// Which CSI services are served on the endpoint. Identity is always served.
pub enum Services<C, N> {
  Controller(Arc<C>),
  Node(Arc<N>),
  All(Arc<C>, Arc<N>),
}

#[derive(Debug)]
struct UdsStream(tokio::net::UnixStream);

impl Connected for UdsStream {
  fn remote_addr(&self) -> Option<SocketAddr> {
    None
  }
}

impl AsyncRead for UdsStream {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_read(cx, buf)
  }
}

impl AsyncWrite for UdsStream {
  fn poll_write(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    Pin::new(&mut self.0).poll_write(cx, buf)
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_flush(cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.0).poll_shutdown(cx)
  }
}

/// Removes a socket left behind by a previous run.
async fn remove_stale_socket(path: &Path) -> Result<(), ServeError> {
  match tokio::fs::remove_file(path).await {
    Ok(()) => {
      warn!(path = %path.display(), "removed stale socket file");
      Ok(())
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(ServeError::Socket {
      path: path.to_owned(),
      source,
    }),
  }
}

/// Serves the requested services on `endpoint` until `shutdown` resolves.
/// In-flight requests are allowed to finish before this returns.
pub async fn serve<C, N, F>(
  endpoint: &Endpoint,
  services: Services<C, N>,
  shutdown: F,
) -> Result<(), ServeError>
where
  C: ControllerService,
  N: NodeService,
  F: Future<Output = ()> + Send,
{
  let path = endpoint.path();
  remove_stale_socket(path).await?;
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .map_err(|source| ServeError::Socket {
        path: parent.to_owned(),
        source,
      })?;
  }

  let listener = tokio::net::UnixListener::bind(path).map_err(|source| ServeError::Socket {
    path: path.to_owned(),
    source,
  })?;
  let incoming = UnixListenerStream::new(listener).map_ok(UdsStream);

  match services {
    Services::Controller(controller) => {
      info!(%endpoint, "serving identity and controller services");
      Server::builder()
        .add_service(IdentityServer::new(Controller::new(controller.clone())))
        .add_service(ControllerServer::new(Controller::new(controller)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?
    }
    Services::Node(node) => {
      info!(%endpoint, "serving identity and node services");
      Server::builder()
        .add_service(IdentityServer::new(Node::new(node.clone())))
        .add_service(NodeServer::new(Node::new(node)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?
    }
    Services::All(controller, node) => {
      info!(%endpoint, "serving identity, controller and node services");
      Server::builder()
        .add_service(IdentityServer::new(Controller::new(controller.clone())))
        .add_service(ControllerServer::new(Controller::new(controller)))
        .add_service(NodeServer::new(Node::new(node)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?
    }
  }

  info!(%endpoint, "server stopped");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unix_endpoints_parse() {
    let endpoint: Endpoint = "unix:///csi/csi.sock".parse().unwrap();
    assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/csi/csi.sock")));
    assert_eq!(endpoint.to_string(), "unix:///csi/csi.sock");
  }

  #[test]
  fn tcp_endpoints_are_rejected() {
    let err = "tcp://127.0.0.1:10000".parse::<Endpoint>().unwrap_err();
    assert!(matches!(err, ServeError::InvalidEndpoint(_)));
  }

  #[test]
  fn relative_unix_paths_are_rejected() {
    assert!("unix://csi.sock".parse::<Endpoint>().is_err());
  }

  #[tokio::test]
  async fn stale_socket_files_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("csi.sock");
    std::fs::write(&path, b"").unwrap();

    remove_stale_socket(&path).await.unwrap();
    assert!(!path.exists());

    // a missing file is not an error
    remove_stale_socket(&path).await.unwrap();
  }
}
