use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  fmt,
  num::NonZeroU64,
};

use crate::proto;

pub type Topology = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeContentSource {
  Snapshot(String),
  Volume(String),
}

impl TryFrom<proto::VolumeContentSource> for Option<VolumeContentSource> {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeContentSource) -> Result<Self, Self::Error> {
    #[inline]
    fn fail_if_empty(v: String, error: &'static str) -> Result<String, tonic::Status> {
      if v.is_empty() {
        Err(tonic::Status::invalid_argument(error))
      } else {
        Ok(v)
      }
    }

    Ok(match value.r#type {
      None => None,
      Some(proto::volume_content_source::Type::Volume(v)) => Some(VolumeContentSource::Volume(
        fail_if_empty(v.volume_id, "VolumeContentSource volume_id cannot be empty")?,
      )),
      Some(proto::volume_content_source::Type::Snapshot(v)) => {
        Some(VolumeContentSource::Snapshot(fail_if_empty(
          v.snapshot_id,
          "VolumeContentSource snapshot_id cannot be empty",
        )?))
      }
    })
  }
}

/// A provisioned volume as reported back to the CO.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
  capacity_bytes: Option<NonZeroU64>,
  volume_id: String,
  volume_context: HashMap<String, String>,
  accessible_topology: Vec<Topology>,
}

impl Volume {
  pub fn new(volume_id: impl Into<String>) -> Self {
    Volume {
      capacity_bytes: None,
      volume_id: volume_id.into(),
      volume_context: HashMap::new(),
      accessible_topology: Vec::new(),
    }
  }

  /// Sets the capacity. Zero means unknown and is omitted on the wire.
  pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Self {
    self.capacity_bytes = NonZeroU64::new(capacity_bytes);
    self
  }

  pub fn with_volume_context(mut self, volume_context: HashMap<String, String>) -> Self {
    self.volume_context = volume_context;
    self
  }

  pub fn with_accessible_topology(mut self, topology: Topology) -> Self {
    self.accessible_topology.push(topology);
    self
  }

  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn capacity_bytes(&self) -> Option<NonZeroU64> {
    self.capacity_bytes
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<Volume> for proto::Volume {
  type Error = tonic::Status;

  fn try_from(value: Volume) -> Result<Self, Self::Error> {
    let capacity_bytes = match value.capacity_bytes {
      None => 0,
      Some(v) => i64::try_from(v.get())
        .map_err(|_| tonic::Status::out_of_range("Volume.capacity_bytes overflows int64"))?,
    };
    let accessible_topology = value
      .accessible_topology
      .into_iter()
      .map(|segments| proto::Topology { segments })
      .collect();

    Ok(proto::Volume {
      capacity_bytes,
      volume_id: value.volume_id,
      volume_context: value.volume_context,
      content_source: None,
      accessible_topology,
    })
  }
}

impl TryFrom<Volume> for proto::CreateVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: Volume) -> Result<Self, Self::Error> {
    let volume = Some(value.try_into()?);

    Ok(proto::CreateVolumeResponse { volume })
  }
}

#[derive(Debug, Clone)]
pub struct VolumeCapability {
  access_mode: AccessMode,
  access_type: AccessType,
}

impl VolumeCapability {
  pub fn new(access_mode: AccessMode, access_type: AccessType) -> Self {
    VolumeCapability {
      access_mode,
      access_type,
    }
  }

  #[inline]
  pub fn access_mode(&self) -> AccessMode {
    self.access_mode
  }

  #[inline]
  pub fn access_type(&self) -> &AccessType {
    &self.access_type
  }

  /// The mount parameters, when the volume is accessed through the
  /// filesystem API.
  #[inline]
  pub fn mount(&self) -> Option<&MountVolume> {
    match &self.access_type {
      AccessType::Mount(v) => Some(v),
      AccessType::Block => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessMode {
  Unknown,
  /// Can only be published once as read/write on a single node, at
  /// any given time.
  SingleNodeWriter,
  /// Can only be published once as readonly on a single node, at
  /// any given time.
  SingleNodeReaderOnly,
  /// Can be published as readonly at multiple nodes simultaneously.
  MultiNodeReaderOnly,
  /// Can be published at multiple nodes simultaneously. Only one of
  /// the node can be used as read/write. The rest will be readonly.
  MultiNodeSingleWriter,
  /// Can be published as read/write at multiple nodes
  /// simultaneously.
  MultiNodeMultiWriter,
  /// Can only be published once as read/write at a single workload
  /// on a single node, at any given time.
  SingleNodeSingleWriter,
  /// Can be published as read/write at multiple workloads on a
  /// single node simultaneously.
  SingleNodeMultiWriter,
}

use proto::volume_capability::access_mode::Mode;

impl From<proto::volume_capability::AccessMode> for AccessMode {
  fn from(value: proto::volume_capability::AccessMode) -> Self {
    match Mode::from_i32(value.mode) {
      Some(Mode::SingleNodeWriter) => AccessMode::SingleNodeWriter,
      Some(Mode::SingleNodeReaderOnly) => AccessMode::SingleNodeReaderOnly,
      Some(Mode::MultiNodeReaderOnly) => AccessMode::MultiNodeReaderOnly,
      Some(Mode::MultiNodeSingleWriter) => AccessMode::MultiNodeSingleWriter,
      Some(Mode::MultiNodeMultiWriter) => AccessMode::MultiNodeMultiWriter,
      Some(Mode::SingleNodeSingleWriter) => AccessMode::SingleNodeSingleWriter,
      Some(Mode::SingleNodeMultiWriter) => AccessMode::SingleNodeMultiWriter,
      Some(Mode::Unknown) | None => AccessMode::Unknown,
    }
  }
}

impl From<AccessMode> for proto::volume_capability::AccessMode {
  fn from(value: AccessMode) -> Self {
    let mode = match value {
      AccessMode::Unknown => Mode::Unknown,
      AccessMode::SingleNodeWriter => Mode::SingleNodeWriter,
      AccessMode::SingleNodeReaderOnly => Mode::SingleNodeReaderOnly,
      AccessMode::MultiNodeReaderOnly => Mode::MultiNodeReaderOnly,
      AccessMode::MultiNodeSingleWriter => Mode::MultiNodeSingleWriter,
      AccessMode::MultiNodeMultiWriter => Mode::MultiNodeMultiWriter,
      AccessMode::SingleNodeSingleWriter => Mode::SingleNodeSingleWriter,
      AccessMode::SingleNodeMultiWriter => Mode::SingleNodeMultiWriter,
    } as i32;

    proto::volume_capability::AccessMode { mode }
  }
}

#[derive(Debug, Clone)]
pub enum AccessType {
  /// Indicate that the volume will be accessed via the block device API.
  Block,

  /// Indicate that the volume will be accessed via the filesystem API.
  Mount(MountVolume),
}

impl AccessType {
  #[inline]
  pub fn is_mount(&self) -> bool {
    matches!(self, AccessType::Mount(_))
  }
}

impl From<proto::volume_capability::AccessType> for AccessType {
  fn from(value: proto::volume_capability::AccessType) -> Self {
    match value {
      proto::volume_capability::AccessType::Block(_) => AccessType::Block,
      proto::volume_capability::AccessType::Mount(v) => AccessType::Mount(v.into()),
    }
  }
}

impl From<AccessType> for proto::volume_capability::AccessType {
  fn from(value: AccessType) -> Self {
    match value {
      AccessType::Block => {
        proto::volume_capability::AccessType::Block(proto::volume_capability::BlockVolume {})
      }
      AccessType::Mount(v) => proto::volume_capability::AccessType::Mount(v.into()),
    }
  }
}

#[derive(Clone, Default)]
pub struct MountVolume {
  fs_type: Option<String>,
  mount_flags: Vec<String>,
}

impl MountVolume {
  pub fn new(fs_type: Option<String>, mount_flags: Vec<String>) -> Self {
    MountVolume {
      fs_type,
      mount_flags,
    }
  }

  /// The filesystem type.
  #[inline]
  pub fn fs_type(&self) -> Option<&str> {
    self.fs_type.as_deref()
  }

  /// The mount options that can be used for the volume. `mount_flags` MAY
  /// contain sensitive information, so they are never printed.
  pub fn mount_flags(&self) -> impl Iterator<Item = &str> + ExactSizeIterator {
    self.mount_flags.iter().map(|v| &**v)
  }
}

impl From<proto::volume_capability::MountVolume> for MountVolume {
  fn from(value: proto::volume_capability::MountVolume) -> Self {
    let fs_type = match value.fs_type {
      v if v.is_empty() => None,
      v => Some(v),
    };

    MountVolume {
      fs_type,
      mount_flags: value.mount_flags,
    }
  }
}

impl From<MountVolume> for proto::volume_capability::MountVolume {
  fn from(value: MountVolume) -> Self {
    proto::volume_capability::MountVolume {
      fs_type: value.fs_type.unwrap_or_default(),
      mount_flags: value.mount_flags,
      volume_mount_group: String::new(),
    }
  }
}

impl fmt::Debug for MountVolume {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountVolume")
      .field("fs_type", &self.fs_type)
      .field(
        "mount_flags",
        &format!("REDACTED ({} items)", self.mount_flags.len()),
      )
      .finish()
  }
}

impl TryFrom<proto::VolumeCapability> for VolumeCapability {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeCapability) -> Result<Self, Self::Error> {
    let access_mode = value
      .access_mode
      .ok_or_else(|| tonic::Status::invalid_argument("Missing access_mode for VolumeCapability"))?
      .into();

    let access_type = value
      .access_type
      .ok_or_else(|| tonic::Status::invalid_argument("Missing access_type for VolumeCapability"))?
      .into();

    Ok(VolumeCapability {
      access_mode,
      access_type,
    })
  }
}

impl From<VolumeCapability> for proto::VolumeCapability {
  fn from(value: VolumeCapability) -> Self {
    proto::VolumeCapability {
      access_mode: Some(value.access_mode.into()),
      access_type: Some(value.access_type.into()),
    }
  }
}

/// The capacity requested by the CO. Zero means "not specified" for either
/// bound; sign and ordering rules are left to the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityRange {
  required_bytes: i64,
  limit_bytes: i64,
}

impl CapacityRange {
  pub fn new(required_bytes: i64, limit_bytes: i64) -> Self {
    CapacityRange {
      required_bytes,
      limit_bytes,
    }
  }

  /// Volume MUST be at least this big.
  #[inline]
  pub fn required_bytes(&self) -> i64 {
    self.required_bytes
  }

  /// Volume MUST not be bigger than this.
  #[inline]
  pub fn limit_bytes(&self) -> i64 {
    self.limit_bytes
  }
}

impl From<proto::CapacityRange> for CapacityRange {
  fn from(value: proto::CapacityRange) -> Self {
    CapacityRange::new(value.required_bytes, value.limit_bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mount_capability(flags: &[&str]) -> proto::VolumeCapability {
    proto::VolumeCapability {
      access_mode: Some(proto::volume_capability::AccessMode {
        mode: Mode::SingleNodeMultiWriter as i32,
      }),
      access_type: Some(proto::volume_capability::AccessType::Mount(
        proto::volume_capability::MountVolume {
          fs_type: String::new(),
          mount_flags: flags.iter().map(|f| (*f).to_owned()).collect(),
          volume_mount_group: String::new(),
        },
      )),
    }
  }

  #[test]
  fn capability_requires_access_mode() {
    let mut capability = mount_capability(&[]);
    capability.access_mode = None;

    let err = VolumeCapability::try_from(capability).unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn capability_requires_access_type() {
    let mut capability = mount_capability(&[]);
    capability.access_type = None;

    let err = VolumeCapability::try_from(capability).unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn capability_survives_the_wire_shape() {
    let capability = VolumeCapability::try_from(mount_capability(&["noatime"])).unwrap();
    assert_eq!(capability.access_mode(), AccessMode::SingleNodeMultiWriter);
    assert_eq!(
      capability.mount().unwrap().mount_flags().collect::<Vec<_>>(),
      vec!["noatime"]
    );

    assert_eq!(
      proto::VolumeCapability::from(capability),
      mount_capability(&["noatime"])
    );
  }

  #[test]
  fn unknown_access_modes_are_tolerated() {
    let mode = AccessMode::from(proto::volume_capability::AccessMode { mode: 42 });
    assert_eq!(mode, AccessMode::Unknown);
  }

  #[test]
  fn mount_flags_are_redacted_in_debug_output() {
    let mount = MountVolume::new(None, vec!["password=hunter2".to_owned()]);
    let debug = format!("{:?}", mount);

    assert!(debug.contains("REDACTED (1 items)"));
    assert!(!debug.contains("hunter2"));
  }

  #[test]
  fn empty_content_source_is_none() {
    let source = proto::VolumeContentSource { r#type: None };
    assert_eq!(Option::<VolumeContentSource>::try_from(source).unwrap(), None);
  }

  #[test]
  fn volume_without_capacity_reports_zero() {
    let volume = proto::Volume::try_from(Volume::new("vol1")).unwrap();
    assert_eq!(volume.capacity_bytes, 0);
    assert_eq!(volume.volume_id, "vol1");
  }
}
