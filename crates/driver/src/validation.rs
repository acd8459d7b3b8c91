use once_cell::sync::OnceCell;
use panfs_csi_proto::controller::{CapacityRange, CreateVolumeRequest};
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Prefix of every StorageClass parameter and volume context key owned by
/// this driver.
pub const PARAMETER_PREFIX: &str = "panfs.csi.vdura.com/";

/// Volume context key set by kubelet on inline ephemeral volumes.
pub const EPHEMERAL_CONTEXT_KEY: &str = "csi.storage.k8s.io/ephemeral";

pub mod params {
  pub const BLADESET: &str = "bladeset";
  pub const RECOVERY_PRIORITY: &str = "recoverypriority";
  pub const EFSA: &str = "efsa";
  pub const VOLSERVICE: &str = "volservice";
  pub const LAYOUT: &str = "layout";
  pub const MAX_WIDTH: &str = "maxwidth";
  pub const STRIPE_UNIT: &str = "stripeunit";
  pub const RG_WIDTH: &str = "rgwidth";
  pub const RG_DEPTH: &str = "rgdepth";
  pub const USER: &str = "user";
  pub const GROUP: &str = "group";
  pub const UPERM: &str = "uperm";
  pub const GPERM: &str = "gperm";
  pub const OPERM: &str = "operm";
  pub const DESCRIPTION: &str = "description";
  pub const ENCRYPTION: &str = "encryption";
  pub const SOFT: &str = "soft";
  pub const HARD: &str = "hard";
}

pub mod secret_keys {
  pub const REALM_IP: &str = "realm_ip";
  pub const USER: &str = "user";
  pub const PASSWORD: &str = "password";
  pub const PRIVATE_KEY: &str = "private_key";
  pub const PRIVATE_KEY_PASSPHRASE: &str = "private_key_passphrase";
  pub const KMIP_CONFIG_DATA: &str = "kmip_config_data";
}

pub const LAYOUTS: &[&str] = &["raid6+", "raid5+", "raid10+", "raid5", "raid10"];

pub const PERMISSIONS: &[&str] = &[
  "none",
  "read-only",
  "write-only",
  "execute-only",
  "read-write",
  "read-execute",
  "write-execute",
  "all",
];

pub const ENCRYPTION_MODES: &[&str] = &["on", "off"];

const STRIPE_UNIT_MAX_KB: u64 = 4096;
const STRIPE_UNIT_ALIGNMENT_KB: u64 = 16;
const RG_WIDTH_MIN: u64 = 3;
const RG_WIDTH_MAX: u64 = 20;

/// Full key of a driver parameter, e.g. `panfs.csi.vdura.com/layout`.
pub fn param_key(name: &str) -> String {
  format!("{}{}", PARAMETER_PREFIX, name)
}

/// Looks up a driver parameter by its short name.
pub fn param<'a>(parameters: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
  parameters.get(&param_key(name)).map(String::as_str)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("volume name is empty")]
  MissingName,

  #[error("no volume capabilities given")]
  MissingCapabilities,

  #[error("block volumes are not supported")]
  BlockUnsupported,

  #[error("volume content sources are not supported")]
  ContentSourceUnsupported,

  #[error("invalid capacity range: {0}")]
  CapacityRange(String),

  #[error("invalid value '{value}' for parameter {name}: {reason}")]
  Parameter {
    name: &'static str,
    value: String,
    reason: String,
  },

  #[error("missing secret {0}")]
  MissingSecret(&'static str),

  #[error("no valid authentication credentials")]
  NoCredentials,
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ValidationError {
  ValidationError::Parameter {
    name,
    value: value.to_owned(),
    reason: reason.into(),
  }
}

/// Checks a CreateVolume request before anything is sent to the realm.
pub fn validate_create_volume_request(request: &CreateVolumeRequest) -> Result<(), ValidationError> {
  if request.name().is_empty() {
    return Err(ValidationError::MissingName);
  }

  if request.volume_capabilities().is_empty() {
    return Err(ValidationError::MissingCapabilities);
  }

  if request
    .volume_capabilities()
    .iter()
    .any(|c| !c.access_type().is_mount())
  {
    return Err(ValidationError::BlockUnsupported);
  }

  if request.volume_content_source().is_some() {
    return Err(ValidationError::ContentSourceUnsupported);
  }

  validate_capacity_range(request.capacity_range())?;
  validate_parameters(request.parameters())
}

pub fn validate_capacity_range(range: Option<&CapacityRange>) -> Result<(), ValidationError> {
  let range = match range {
    None => return Ok(()),
    Some(range) => range,
  };

  let (required, limit) = (range.required_bytes(), range.limit_bytes());
  if required < 0 || limit < 0 {
    return Err(ValidationError::CapacityRange(
      "required and limit bytes must not be negative".into(),
    ));
  }

  if required != 0 && limit != 0 && required > limit {
    return Err(ValidationError::CapacityRange(format!(
      "required bytes {} exceed limit bytes {}",
      required, limit
    )));
  }

  Ok(())
}

type Check = fn(&'static str, &str) -> Result<(), ValidationError>;

const PARAMETER_CHECKS: &[(&str, Check)] = &[
  (params::BLADESET, check_non_empty),
  (params::RECOVERY_PRIORITY, check_non_empty),
  (params::EFSA, check_non_empty),
  (params::VOLSERVICE, check_non_empty),
  (params::LAYOUT, check_layout),
  (params::MAX_WIDTH, check_positive),
  (params::STRIPE_UNIT, check_stripe_unit),
  (params::RG_WIDTH, check_rg_width),
  (params::RG_DEPTH, check_positive),
  (params::USER, check_non_empty),
  (params::GROUP, check_non_empty),
  (params::UPERM, check_permission),
  (params::GPERM, check_permission),
  (params::OPERM, check_permission),
  (params::ENCRYPTION, check_encryption),
];

/// Checks the driver parameters that are present. Unknown keys are ignored.
pub fn validate_parameters(parameters: &HashMap<String, String>) -> Result<(), ValidationError> {
  for &(name, check) in PARAMETER_CHECKS {
    if let Some(value) = param(parameters, name) {
      check(name, value)?;
    }
  }

  Ok(())
}

fn check_non_empty(name: &'static str, value: &str) -> Result<(), ValidationError> {
  if value.trim().is_empty() {
    return Err(invalid(name, value, "must not be empty"));
  }

  Ok(())
}

fn check_one_of(
  name: &'static str,
  value: &str,
  allowed: &[&str],
) -> Result<(), ValidationError> {
  if !allowed.contains(&value) {
    return Err(invalid(
      name,
      value,
      format!("must be one of {}", allowed.join(", ")),
    ));
  }

  Ok(())
}

fn check_layout(name: &'static str, value: &str) -> Result<(), ValidationError> {
  check_one_of(name, value, LAYOUTS)
}

fn check_permission(name: &'static str, value: &str) -> Result<(), ValidationError> {
  check_one_of(name, value, PERMISSIONS)
}

fn check_encryption(name: &'static str, value: &str) -> Result<(), ValidationError> {
  check_one_of(name, value, ENCRYPTION_MODES)
}

fn parse_integer(name: &'static str, value: &str) -> Result<u64, ValidationError> {
  value
    .parse::<u64>()
    .map_err(|e| invalid(name, value, format!("not an integer: {}", e)))
}

fn check_positive(name: &'static str, value: &str) -> Result<(), ValidationError> {
  match parse_integer(name, value)? {
    0 => Err(invalid(name, value, "must be greater than 0")),
    _ => Ok(()),
  }
}

fn check_rg_width(name: &'static str, value: &str) -> Result<(), ValidationError> {
  let width = parse_integer(name, value)?;
  if !(RG_WIDTH_MIN..=RG_WIDTH_MAX).contains(&width) {
    return Err(invalid(
      name,
      value,
      format!("must be between {} and {}", RG_WIDTH_MIN, RG_WIDTH_MAX),
    ));
  }

  Ok(())
}

fn stripe_unit_pattern() -> Result<&'static Regex, regex::Error> {
  static PATTERN: OnceCell<Regex> = OnceCell::new();
  PATTERN.get_or_try_init(|| Regex::new(r"^[1-9][0-9]*[KkMm]$"))
}

/// Stripe units are given as `<n>K` or `<n>M` and must be a multiple of 16K
/// no larger than 4M.
fn check_stripe_unit(name: &'static str, value: &str) -> Result<(), ValidationError> {
  let pattern = stripe_unit_pattern().map_err(|e| invalid(name, value, e.to_string()))?;
  if !pattern.is_match(value) {
    return Err(invalid(name, value, "must look like 64K or 1M"));
  }

  let (number, unit) = value.split_at(value.len() - 1);
  let number = parse_integer(name, number)?;
  let kb = match unit {
    "M" | "m" => number.checked_mul(1024),
    _ => Some(number),
  };

  match kb {
    Some(kb) if kb <= STRIPE_UNIT_MAX_KB && kb % STRIPE_UNIT_ALIGNMENT_KB == 0 => Ok(()),
    _ => Err(invalid(
      name,
      value,
      format!(
        "must be a multiple of {}K between 1K and {}K",
        STRIPE_UNIT_ALIGNMENT_KB, STRIPE_UNIT_MAX_KB
      ),
    )),
  }
}

/// Checks that the secrets are enough to open a realm session.
pub fn validate_secrets(secrets: &HashMap<String, String>) -> Result<(), ValidationError> {
  for &key in &[secret_keys::REALM_IP, secret_keys::USER] {
    match secrets.get(key) {
      Some(v) if !v.is_empty() => {}
      _ => return Err(ValidationError::MissingSecret(key)),
    }
  }

  let has = |key: &str| secrets.get(key).map_or(false, |v| !v.is_empty());
  if !has(secret_keys::PASSWORD) && !has(secret_keys::PRIVATE_KEY) {
    return Err(ValidationError::NoCredentials);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use panfs_csi_proto::proto;
  use std::convert::TryFrom;
  use test_case::test_case;

  fn parameters(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (param_key(k), (*v).to_owned()))
      .collect()
  }

  fn check(name: &str, value: &str) -> Result<(), ValidationError> {
    validate_parameters(&parameters(&[(name, value)]))
  }

  fn mount_capability() -> proto::VolumeCapability {
    use proto::volume_capability::{access_mode::Mode, AccessMode, AccessType, MountVolume};

    proto::VolumeCapability {
      access_mode: Some(AccessMode {
        mode: Mode::SingleNodeMultiWriter as i32,
      }),
      access_type: Some(AccessType::Mount(MountVolume::default())),
    }
  }

  fn block_capability() -> proto::VolumeCapability {
    use proto::volume_capability::{AccessType, BlockVolume};

    proto::VolumeCapability {
      access_type: Some(AccessType::Block(BlockVolume::default())),
      ..mount_capability()
    }
  }

  fn create_request(
    capabilities: Vec<proto::VolumeCapability>,
    range: Option<(i64, i64)>,
  ) -> CreateVolumeRequest {
    let request = proto::CreateVolumeRequest {
      name: "vol1".into(),
      volume_capabilities: capabilities,
      capacity_range: range.map(|(required_bytes, limit_bytes)| proto::CapacityRange {
        required_bytes,
        limit_bytes,
      }),
      ..Default::default()
    };

    CreateVolumeRequest::try_from(request).unwrap()
  }

  #[test_case("16K" ; "16K")]
  #[test_case("32K" ; "32K")]
  #[test_case("64K" ; "64K")]
  #[test_case("128K" ; "128K")]
  #[test_case("256K" ; "256K")]
  #[test_case("512K" ; "512K")]
  #[test_case("1M" ; "1M")]
  #[test_case("2M" ; "2M")]
  #[test_case("4M" ; "4M")]
  #[test_case("48k" ; "lowercase k")]
  #[test_case("1m" ; "lowercase m")]
  fn valid_stripe_units(value: &str) {
    assert_eq!(check(params::STRIPE_UNIT, value), Ok(()));
  }

  #[test_case("1K" ; "1K")]
  #[test_case("5K" ; "5K")]
  #[test_case("17K" ; "17K")]
  #[test_case("5M" ; "5M")]
  #[test_case("4112K" ; "above 4M")]
  #[test_case("016K" ; "leading zero")]
  #[test_case("16" ; "missing unit")]
  #[test_case("16G" ; "unknown unit")]
  #[test_case("K" ; "missing number")]
  #[test_case("99999999999999999999M" ; "overflow")]
  fn invalid_stripe_units(value: &str) {
    assert!(matches!(
      check(params::STRIPE_UNIT, value),
      Err(ValidationError::Parameter {
        name: params::STRIPE_UNIT,
        ..
      })
    ));
  }

  #[test]
  fn rg_width_bounds() {
    for width in 3..=20 {
      assert_eq!(check(params::RG_WIDTH, &width.to_string()), Ok(()));
    }

    for width in &["2", "21", "0", "-3", "three"] {
      assert!(check(params::RG_WIDTH, width).is_err(), "{}", width);
    }
  }

  #[test_case(params::LAYOUT, "raid6+" ; "layout raid6+")]
  #[test_case(params::LAYOUT, "raid10" ; "layout raid10")]
  #[test_case(params::MAX_WIDTH, "8" ; "maxwidth")]
  #[test_case(params::RG_DEPTH, "1" ; "rgdepth")]
  #[test_case(params::UPERM, "read-write" ; "uperm")]
  #[test_case(params::GPERM, "read-execute" ; "gperm")]
  #[test_case(params::OPERM, "none" ; "operm")]
  #[test_case(params::ENCRYPTION, "on" ; "encryption on")]
  #[test_case(params::BLADESET, "Set 1" ; "bladeset")]
  fn accepts_parameter(name: &str, value: &str) {
    assert_eq!(check(name, value), Ok(()));
  }

  #[test_case(params::LAYOUT, "raid0" ; "unknown layout")]
  #[test_case(params::MAX_WIDTH, "0" ; "zero maxwidth")]
  #[test_case(params::MAX_WIDTH, "wide" ; "non numeric maxwidth")]
  #[test_case(params::RG_DEPTH, "0" ; "zero rgdepth")]
  #[test_case(params::UPERM, "rw" ; "short permission")]
  #[test_case(params::ENCRYPTION, "yes" ; "encryption yes")]
  #[test_case(params::BLADESET, "" ; "empty bladeset")]
  #[test_case(params::USER, " " ; "blank user")]
  fn rejects_parameter(name: &str, value: &str) {
    assert!(check(name, value).is_err());
  }

  #[test]
  fn unprefixed_and_unknown_parameters_are_ignored() {
    let mut parameters = HashMap::new();
    parameters.insert("layout".to_owned(), "raid0".to_owned());
    parameters.insert(param_key("unknown"), "".to_owned());
    parameters.insert("csi.storage.k8s.io/pvc/name".to_owned(), "claim".to_owned());

    assert_eq!(validate_parameters(&parameters), Ok(()));
  }

  #[test_case(-1, 0 ; "negative required")]
  #[test_case(0, -1 ; "negative limit")]
  #[test_case(20, 10 ; "required above limit")]
  fn rejects_capacity_range(required: i64, limit: i64) {
    let range = CapacityRange::new(required, limit);
    assert!(matches!(
      validate_capacity_range(Some(&range)),
      Err(ValidationError::CapacityRange(_))
    ));
  }

  #[test_case(10, 0 ; "no limit")]
  #[test_case(0, 10 ; "no requirement")]
  #[test_case(10, 10 ; "equal")]
  fn accepts_capacity_range(required: i64, limit: i64) {
    let range = CapacityRange::new(required, limit);
    assert_eq!(validate_capacity_range(Some(&range)), Ok(()));
  }

  #[test]
  fn create_request_with_block_capability_is_rejected() {
    let request = create_request(vec![mount_capability(), block_capability()], None);
    assert_eq!(
      validate_create_volume_request(&request),
      Err(ValidationError::BlockUnsupported)
    );
  }

  #[test]
  fn create_request_with_bad_range_is_rejected() {
    let request = create_request(vec![mount_capability()], Some((20, 10)));
    assert!(validate_create_volume_request(&request).is_err());
  }

  #[test]
  fn create_request_with_content_source_is_rejected() {
    use proto::volume_content_source::{SnapshotSource, Type};

    let request = proto::CreateVolumeRequest {
      name: "vol1".into(),
      volume_capabilities: vec![mount_capability()],
      volume_content_source: Some(proto::VolumeContentSource {
        r#type: Some(Type::Snapshot(SnapshotSource {
          snapshot_id: "snap1".into(),
        })),
      }),
      ..Default::default()
    };
    let request = CreateVolumeRequest::try_from(request).unwrap();

    assert_eq!(
      validate_create_volume_request(&request),
      Err(ValidationError::ContentSourceUnsupported)
    );
  }

  #[test]
  fn valid_create_request_passes() {
    let request = create_request(vec![mount_capability()], Some((1 << 30, 0)));
    assert_eq!(validate_create_volume_request(&request), Ok(()));
  }

  fn secrets_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
      .collect()
  }

  #[test_case(&[("realm_ip", "10.0.0.1"), ("user", "admin"), ("password", "pw")] ; "password")]
  #[test_case(&[("realm_ip", "10.0.0.1"), ("user", "admin"), ("private_key", "KEY")] ; "private key")]
  #[test_case(&[("realm_ip", "10.0.0.1"), ("user", "admin"), ("password", ""), ("private_key", "KEY")] ; "empty password with key")]
  fn accepts_secrets(pairs: &[(&str, &str)]) {
    assert_eq!(validate_secrets(&secrets_map(pairs)), Ok(()));
  }

  #[test_case(&[("user", "admin"), ("password", "pw")] => ValidationError::MissingSecret("realm_ip") ; "missing realm")]
  #[test_case(&[("realm_ip", "10.0.0.1"), ("password", "pw")] => ValidationError::MissingSecret("user") ; "missing user")]
  #[test_case(&[("realm_ip", "10.0.0.1"), ("user", "admin")] => ValidationError::NoCredentials ; "no credentials")]
  #[test_case(&[("realm_ip", "10.0.0.1"), ("user", "admin"), ("password", ""), ("private_key", "")] => ValidationError::NoCredentials ; "empty credentials")]
  fn rejects_secrets(pairs: &[(&str, &str)]) -> ValidationError {
    validate_secrets(&secrets_map(pairs)).unwrap_err()
  }

  #[test]
  fn no_credentials_message() {
    assert_eq!(
      ValidationError::NoCredentials.to_string(),
      "no valid authentication credentials"
    );
  }
}
