macro_rules! unsupported {
  ($name:expr) => {{
    ::tracing::error!("Unsupported method {} called", $name);
    return Err(
      ::tonic::Status::new(
        ::tonic::Code::Unimplemented,
        format!("Unsupported method {} called", $name),
      )
      .into(),
    );
  }};
}

pub mod controller;
pub mod node;
pub mod server;
pub mod volume;

mod plugin;
mod secrets;
mod utils;

#[allow(clippy::all, unreachable_pub, missing_docs)]
pub mod proto {
  tonic::include_proto!("csi.v1");
}

use std::collections::HashMap;

use lazy_static::lazy_static;

pub use controller::ControllerService;
pub use node::NodeService;
pub use server::{serve, Endpoint, ServeError, Services};

#[derive(Eq, Clone, Copy, PartialEq, Debug, Hash)]
pub enum VolumeExpansionSupport {
  None,
  Offline,
  Online,
}

pub trait IdentityService: Send + Sync + 'static {
  /// Plugin name in domain name notation, at most 63 characters, for
  /// example `com.vdura.csi.panfs`.
  fn name(&self) -> &str;

  /// Plugin version. Value of this field is opaque to the CO.
  fn version(&self) -> &str;

  /// Whether or not this plugin supports volume accessibility constraints.
  #[inline]
  fn volume_accessibility_constraints_support(&self) -> bool {
    false
  }

  /// How volumes served by this plugin can be expanded.
  #[inline]
  fn volume_expansion_support(&self) -> VolumeExpansionSupport {
    VolumeExpansionSupport::None
  }

  #[inline]
  fn ready(&self) -> bool {
    true
  }

  #[inline]
  fn manifest(&self) -> &HashMap<String, String> {
    lazy_static! {
      static ref EMPTY_MANIFEST: HashMap<String, String> = HashMap::new();
    }

    &EMPTY_MANIFEST
  }
}
