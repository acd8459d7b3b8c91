use super::{BackendClient, Secrets, VolumeRecord};
use crate::{
  errors::{classify, BackendError},
  units,
  validation::{param, params},
};
use async_trait::async_trait;
use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, MutexGuard, PoisonError,
  },
};

#[derive(Default)]
struct Calls {
  create: AtomicUsize,
  delete: AtomicUsize,
  expand: AtomicUsize,
  get: AtomicUsize,
  list: AtomicUsize,
}

/// In-memory realm for harnesses and tests. Failures are produced by running
/// realm-like messages through the classifier.
#[derive(Default)]
pub struct FakeBackend {
  volumes: Mutex<HashMap<String, VolumeRecord>>,
  failure: Mutex<Option<String>>,
  reported_encryption: Mutex<Option<String>>,
  calls: Calls,
}

impl FakeBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a volume as if it had been created earlier.
  pub fn insert(&self, record: VolumeRecord) {
    self.volumes().insert(record.name.clone(), record);
  }

  pub fn volume(&self, name: &str) -> Option<VolumeRecord> {
    self.volumes().get(name).cloned()
  }

  /// Makes every following call fail with the classified `message`.
  pub fn fail_with(&self, message: impl Into<String>) {
    *lock(&self.failure) = Some(message.into());
  }

  /// Makes created volumes report `mode` regardless of the request.
  pub fn report_encryption(&self, mode: impl Into<String>) {
    *lock(&self.reported_encryption) = Some(mode.into());
  }

  /// Number of calls made against the realm so far.
  pub fn call_count(&self) -> usize {
    [
      &self.calls.create,
      &self.calls.delete,
      &self.calls.expand,
      &self.calls.get,
      &self.calls.list,
    ]
    .iter()
    .map(|c| c.load(Ordering::SeqCst))
    .sum()
  }

  pub fn create_count(&self) -> usize {
    self.calls.create.load(Ordering::SeqCst)
  }

  fn volumes(&self) -> MutexGuard<'_, HashMap<String, VolumeRecord>> {
    lock(&self.volumes)
  }

  fn call(&self, counter: &AtomicUsize) -> Result<(), BackendError> {
    counter.fetch_add(1, Ordering::SeqCst);
    match &*lock(&self.failure) {
      Some(message) => classify(message),
      None => Ok(()),
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn quota(params: &HashMap<String, String>, name: &str) -> Result<f64, BackendError> {
  match param(params, name) {
    None => Ok(0.0),
    Some(v) => v
      .parse()
      .map_err(|_| BackendError::InvalidArgument(format!("Invalid string '{}' for {}", v, name))),
  }
}

#[async_trait]
impl BackendClient for FakeBackend {
  async fn create_volume(
    &self,
    name: &str,
    params: &HashMap<String, String>,
    _secrets: &Secrets,
  ) -> Result<VolumeRecord, BackendError> {
    self.call(&self.calls.create)?;

    let name = name.trim_start_matches('/');
    let mut volumes = self.volumes();
    if volumes.contains_key(name) {
      classify(&format!("Error: volume /{} already exists", name))?;
    }

    let text = |key| param(params, key).unwrap_or_default().to_owned();
    let encryption = match &*lock(&self.reported_encryption) {
      Some(mode) => mode.clone(),
      None => text(params::ENCRYPTION),
    };
    let record = VolumeRecord {
      bladeset: text(params::BLADESET),
      recovery_priority: text(params::RECOVERY_PRIORITY),
      efsa: text(params::EFSA),
      volservice: text(params::VOLSERVICE),
      layout: text(params::LAYOUT),
      max_width: text(params::MAX_WIDTH),
      stripe_unit: text(params::STRIPE_UNIT),
      rg_width: text(params::RG_WIDTH),
      rg_depth: text(params::RG_DEPTH),
      user: text(params::USER),
      group: text(params::GROUP),
      uperm: text(params::UPERM),
      gperm: text(params::GPERM),
      operm: text(params::OPERM),
      description: text(params::DESCRIPTION),
      encryption,
      soft_quota_gb: quota(params, params::SOFT)?,
      hard_quota_gb: quota(params, params::HARD)?,
      state: "Online".to_owned(),
      id: (volumes.len() + 1).to_string(),
      ..VolumeRecord::new(name)
    };

    volumes.insert(record.name.clone(), record.clone());
    Ok(record)
  }

  async fn delete_volume(&self, name: &str, _secrets: &Secrets) -> Result<(), BackendError> {
    self.call(&self.calls.delete)?;

    match self.volumes().remove(name.trim_start_matches('/')) {
      Some(_) => Ok(()),
      None => classify("Error: volume(s) do not exist"),
    }
  }

  async fn expand_volume(
    &self,
    name: &str,
    target_bytes: i64,
    _secrets: &Secrets,
  ) -> Result<(), BackendError> {
    self.call(&self.calls.expand)?;

    let target_gb = units::bytes_to_gb(target_bytes);
    let name = name.trim_start_matches('/');
    let mut volumes = self.volumes();
    let record = match volumes.get_mut(name) {
      Some(record) => record,
      None => return classify(&format!("No volume with name /{}", name)),
    };

    if record.hard_quota_gb > 0.0 && record.hard_quota_gb < target_gb {
      record.hard_quota_gb = target_gb;
    }
    record.soft_quota_gb = target_gb;

    Ok(())
  }

  async fn get_volume(&self, name: &str, _secrets: &Secrets) -> Result<VolumeRecord, BackendError> {
    self.call(&self.calls.get)?;

    let name = name.trim_start_matches('/');
    match self.volume(name) {
      Some(record) => Ok(record),
      None => Err(BackendError::NotFound(format!("No volume with name /{}", name))),
    }
  }

  async fn list_volumes(&self, _secrets: &Secrets) -> Result<Vec<VolumeRecord>, BackendError> {
    self.call(&self.calls.list)?;

    let mut volumes = self.volumes().values().cloned().collect::<Vec<_>>();
    volumes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(volumes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::validation::param_key;

  const GIB: i64 = 1 << 30;

  fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (param_key(k), (*v).to_owned()))
      .collect()
  }

  #[tokio::test]
  async fn create_twice_reports_already_exists() {
    let backend = FakeBackend::new();
    let secrets = Secrets::new();
    let p = params(&[("soft", "10"), ("hard", "20")]);

    let record = backend.create_volume("vol1", &p, &secrets).await.unwrap();
    assert_eq!(record.soft_quota_bytes(), 10 * GIB);
    assert_eq!(record.encryption(), "off");

    let err = backend.create_volume("vol1", &p, &secrets).await.unwrap_err();
    assert!(matches!(err, BackendError::AlreadyExists(_)));
    assert_eq!(backend.create_count(), 2);
  }

  #[tokio::test]
  async fn missing_volumes_are_not_found() {
    let backend = FakeBackend::new();
    let secrets = Secrets::new();

    assert!(matches!(
      backend.get_volume("vol1", &secrets).await,
      Err(BackendError::NotFound(_))
    ));
    assert!(matches!(
      backend.delete_volume("vol1", &secrets).await,
      Err(BackendError::NotFound(_))
    ));
    assert!(matches!(
      backend.expand_volume("vol1", GIB, &secrets).await,
      Err(BackendError::NotFound(_))
    ));
    assert_eq!(backend.call_count(), 3);
  }

  #[tokio::test]
  async fn expansion_raises_a_lower_hard_quota() {
    let backend = FakeBackend::new();
    let secrets = Secrets::new();
    backend.insert(VolumeRecord {
      soft_quota_gb: 10.0,
      hard_quota_gb: 12.0,
      ..VolumeRecord::new("vol1")
    });

    backend.expand_volume("vol1", 15 * GIB, &secrets).await.unwrap();

    let record = backend.volume("vol1").unwrap();
    assert_eq!(record.soft_quota_bytes(), 15 * GIB);
    assert_eq!(record.hard_quota_bytes(), 15 * GIB);
  }

  #[tokio::test]
  async fn expansion_keeps_unlimited_hard_quota() {
    let backend = FakeBackend::new();
    let secrets = Secrets::new();
    backend.insert(VolumeRecord {
      soft_quota_gb: 10.0,
      ..VolumeRecord::new("vol1")
    });

    backend.expand_volume("vol1", 15 * GIB, &secrets).await.unwrap();
    assert_eq!(backend.volume("vol1").unwrap().hard_quota_gb, 0.0);
  }

  #[tokio::test]
  async fn injected_failures_are_classified() {
    let backend = FakeBackend::new();
    backend.fail_with("ssh: connect to host 10.0.0.1 port 22: exit status 255");

    assert!(matches!(
      backend.list_volumes(&Secrets::new()).await,
      Err(BackendError::Unavailable(_))
    ));
  }
}
