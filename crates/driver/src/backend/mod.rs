mod fake;
mod pasxml;
mod ssh;

use crate::{
  errors::BackendError,
  units,
  validation::{param_key, params},
};
use async_trait::async_trait;
use std::collections::HashMap;

pub use fake::FakeBackend;
pub use pasxml::parse_volumes;
pub use ssh::SshBackend;

pub type Secrets = HashMap<String, String>;

/// Volume management on a PanFS realm. Errors are already classified.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
  /// Creates `name` with the driver parameters in `params` (prefixed keys,
  /// including the computed `soft`/`hard` quotas) and returns the realm's
  /// view of the new volume.
  async fn create_volume(
    &self,
    name: &str,
    params: &HashMap<String, String>,
    secrets: &Secrets,
  ) -> Result<VolumeRecord, BackendError>;

  async fn delete_volume(&self, name: &str, secrets: &Secrets) -> Result<(), BackendError>;

  /// Grows the soft quota of `name` to `target_bytes`. A hard quota below
  /// the target is raised with it.
  async fn expand_volume(
    &self,
    name: &str,
    target_bytes: i64,
    secrets: &Secrets,
  ) -> Result<(), BackendError>;

  async fn get_volume(&self, name: &str, secrets: &Secrets) -> Result<VolumeRecord, BackendError>;

  async fn list_volumes(&self, secrets: &Secrets) -> Result<Vec<VolumeRecord>, BackendError>;
}

/// A volume as reported by the realm. Quotas are in gigabytes, zero meaning
/// no quota.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeRecord {
  pub name: String,
  pub id: String,
  pub state: String,
  pub bladeset: String,
  pub recovery_priority: String,
  pub efsa: String,
  pub volservice: String,
  pub layout: String,
  pub max_width: String,
  pub stripe_unit: String,
  pub rg_width: String,
  pub rg_depth: String,
  pub user: String,
  pub group: String,
  pub uperm: String,
  pub gperm: String,
  pub operm: String,
  pub description: String,
  pub encryption: String,
  pub soft_quota_gb: f64,
  pub hard_quota_gb: f64,
}

impl VolumeRecord {
  pub fn new(name: impl Into<String>) -> Self {
    VolumeRecord {
      name: name.into(),
      ..Default::default()
    }
  }

  /// Encryption mode, `off` when the realm does not report one.
  pub fn encryption(&self) -> &str {
    match self.encryption.as_str() {
      "" => "off",
      v => v,
    }
  }

  #[inline]
  pub fn soft_quota_bytes(&self) -> i64 {
    units::gb_to_bytes(self.soft_quota_gb)
  }

  #[inline]
  pub fn hard_quota_bytes(&self) -> i64 {
    units::gb_to_bytes(self.hard_quota_gb)
  }

  /// Attributes handed to the CO as volume context, keyed like the
  /// StorageClass parameters. Empty attributes are left out.
  pub fn volume_context(&self) -> HashMap<String, String> {
    let fields = vec![
      (params::BLADESET, self.bladeset.clone()),
      (params::RECOVERY_PRIORITY, self.recovery_priority.clone()),
      (params::EFSA, self.efsa.clone()),
      (params::VOLSERVICE, self.volservice.clone()),
      (params::LAYOUT, self.layout.clone()),
      (params::MAX_WIDTH, self.max_width.clone()),
      (params::STRIPE_UNIT, self.stripe_unit.clone()),
      (params::RG_WIDTH, self.rg_width.clone()),
      (params::RG_DEPTH, self.rg_depth.clone()),
      (params::USER, self.user.clone()),
      (params::GROUP, self.group.clone()),
      (params::UPERM, self.uperm.clone()),
      (params::GPERM, self.gperm.clone()),
      (params::OPERM, self.operm.clone()),
      (params::DESCRIPTION, self.description.clone()),
      (params::ENCRYPTION, self.encryption().to_owned()),
      (params::SOFT, units::format_gb(self.soft_quota_gb)),
      (params::HARD, units::format_gb(self.hard_quota_gb)),
    ];

    fields
      .into_iter()
      .filter(|(_, value)| !value.is_empty())
      .map(|(key, value)| (param_key(key), value))
      .collect()
  }
}
