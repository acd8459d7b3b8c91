use crate::{proto, IdentityService, VolumeExpansionSupport};
use tracing::debug;

use proto::plugin_capability::{service, volume_expansion, Service, Type, VolumeExpansion};

fn service_capability(ty: service::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(Type::Service(Service { r#type: ty.into() })),
  }
}

fn expansion_capability(ty: volume_expansion::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(Type::VolumeExpansion(VolumeExpansion { r#type: ty.into() })),
  }
}

pub(crate) fn get_capabilities(
  s: &impl IdentityService,
  controller_service: bool,
) -> proto::GetPluginCapabilitiesResponse {
  let mut response = proto::GetPluginCapabilitiesResponse::default();

  if controller_service {
    response
      .capabilities
      .push(service_capability(service::Type::ControllerService));
  }

  let volume_accessibility_constraints_support = s.volume_accessibility_constraints_support();
  if volume_accessibility_constraints_support {
    response
      .capabilities
      .push(service_capability(service::Type::VolumeAccessibilityConstraints));
  }

  let volume_expansion_support = s.volume_expansion_support();
  match volume_expansion_support {
    VolumeExpansionSupport::None => (),
    VolumeExpansionSupport::Offline => response
      .capabilities
      .push(expansion_capability(volume_expansion::Type::Offline)),
    VolumeExpansionSupport::Online => response
      .capabilities
      .push(expansion_capability(volume_expansion::Type::Online)),
  }

  debug!(
    controller_service,
    ?volume_accessibility_constraints_support,
    ?volume_expansion_support
  );
  response
}
