use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  pub struct ControllerCapabilities: u32 {
    const CREATE_DELETE_VOLUME         = 0b_0000_0000_0000_0001;
    const PUBLISH_UNPUBLISH_VOLUME     = 0b_0000_0000_0000_0010;
    const LIST_VOLUMES                 = 0b_0000_0000_0000_0100;
    const GET_CAPACITY                 = 0b_0000_0000_0000_1000;

    /// Indicates the SP supports ControllerPublishVolume.readonly
    /// field.
    const PUBLISH_READONLY             = 0b_0000_0000_1000_0000;

    /// See VolumeExpansion for details.
    const EXPAND_VOLUME                = 0b_0000_0001_0000_0000;

    /// Indicates the SP supports the ControllerGetVolume RPC.
    const GET_VOLUME                   = 0b_0000_1000_0000_0000;

    /// Indicates the SP supports the SINGLE_NODE_SINGLE_WRITER and/or
    /// SINGLE_NODE_MULTI_WRITER access modes.
    const SINGLE_NODE_MULTI_WRITER     = 0b_0001_0000_0000_0000;
  }
}

use proto::controller_service_capability::rpc::Type;

const CAPABILITY_TYPES: &[(ControllerCapabilities, Type)] = &[
  (ControllerCapabilities::CREATE_DELETE_VOLUME, Type::CreateDeleteVolume),
  (ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME, Type::PublishUnpublishVolume),
  (ControllerCapabilities::LIST_VOLUMES, Type::ListVolumes),
  (ControllerCapabilities::GET_CAPACITY, Type::GetCapacity),
  (ControllerCapabilities::PUBLISH_READONLY, Type::PublishReadonly),
  (ControllerCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (ControllerCapabilities::GET_VOLUME, Type::GetVolume),
  (ControllerCapabilities::SINGLE_NODE_MULTI_WRITER, Type::SingleNodeMultiWriter),
];

impl From<ControllerCapabilities> for proto::ControllerGetCapabilitiesResponse {
  fn from(value: ControllerCapabilities) -> Self {
    let capabilities = CAPABILITY_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::ControllerServiceCapability {
        r#type: Some(proto::controller_service_capability::Type::Rpc(
          proto::controller_service_capability::Rpc { r#type: *ty as i32 },
        )),
      })
      .collect();

    proto::ControllerGetCapabilitiesResponse { capabilities }
  }
}
