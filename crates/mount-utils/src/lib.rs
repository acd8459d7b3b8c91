cfg_if::cfg_if! {
  if #[cfg(unix)] {
    mod unix;
    use unix::OsMounter;
  } else {
    compile_error!("Only cfg(unix) is supported at this time")
  }
}

mod fake;
mod runner;

pub use fake::FakeAction;

use async_trait::async_trait;
use runner::{run, run_inst, MounterImpl, MounterWrapper};
use smallvec::SmallVec;
use static_assertions::assert_impl_all;
use std::{
  fmt, io,
  path::{Path, PathBuf},
  result,
  sync::Arc,
};
use thiserror::Error;

pub type Result<T> = result::Result<T, MountError>;

/// Host mount operations. Every call is handed to a dedicated dispatcher
/// thread so blocking `mount(8)` invocations never stall the async runtime.
#[async_trait]
pub trait Mounter: Send + Sync + 'static {
  /// Mounts `source` at `target` as `fstype` with the given options. The
  /// target directory is created if missing, and a target that is already
  /// mounted is left alone.
  async fn mount(&self, source: &str, target: &Path, fstype: &str, options: &[String])
    -> Result<()>;

  /// Bind mounts `source` at `target`. Bind mounts ignore most options, so
  /// they are applied with a second remount.
  async fn bind_mount(&self, source: &Path, target: &Path, options: &[String]) -> Result<()>;

  /// Unmounts `target`. Unmounting a path that is not mounted succeeds.
  async fn unmount(&self, target: &Path) -> Result<()>;

  /// All mounted filesystems.
  async fn list(&self) -> Result<Vec<MountPoint>>;

  async fn is_mount_point(&self, target: &Path) -> Result<bool>;
}

/// MountPoint represents a single line in /proc/mounts.
#[derive(Clone, PartialEq)]
pub struct MountPoint {
  device: String,
  path: PathBuf,
  ty: String,
  opts: Vec<String>,
  freq: isize,
  pass: isize,
}

impl fmt::Debug for MountPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountPoint")
      .field("device", &self.device)
      .field("path", &self.path)
      .field("type", &self.ty)
      .field("opts", &format!("length={}", self.opts.len()))
      .field("freq", &self.freq)
      .field("pass", &self.pass)
      .finish()
  }
}

impl MountPoint {
  #[inline]
  pub fn device(&self) -> &str {
    &self.device
  }

  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  #[inline]
  pub fn mount_type(&self) -> &str {
    &self.ty
  }

  #[inline]
  pub fn opts(&self) -> &[String] {
    &self.opts
  }

  /// Whether this entry is mounted at `dir`. The kernel suffixes mount
  /// points whose directory was removed with `\040(deleted)`.
  pub fn matches(&self, dir: &Path) -> bool {
    if self.path == dir {
      return true;
    }

    let deleted = format!("{}\\040(deleted)", dir.display());
    self.path == Path::new(&deleted)
  }
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("Mount failed: {0}")]
  MountFailed(String),

  #[error("Unmount failed: {0}")]
  UnmountFailed(String),

  #[error("Invalid mount table: {0}")]
  InvalidMountTable(String),

  #[error("Mount dispatcher failure: {0}")]
  Dispatcher(String),

  #[error(transparent)]
  Io(#[from] io::Error),
}

fn to_options(options: &[String]) -> SmallVec<[String; 4]> {
  options.iter().cloned().collect()
}

#[async_trait]
impl<T> Mounter for T
where
  T: MounterWrapper + Send + Sync + 'static,
{
  async fn mount(
    &self,
    source: &str,
    target: &Path,
    fstype: &str,
    options: &[String],
  ) -> Result<()> {
    let source = source.to_owned();
    let target = target.to_owned();
    let fstype = fstype.to_owned();
    let options = to_options(options);

    run_inst(self.mounter().clone(), move |mounter| {
      mounter.mount(source, target, fstype, options)
    })
    .await
  }

  async fn bind_mount(&self, source: &Path, target: &Path, options: &[String]) -> Result<()> {
    let source = source.to_owned();
    let target = target.to_owned();
    let options = to_options(options);

    run_inst(self.mounter().clone(), move |mounter| {
      mounter.bind_mount(source, target, options)
    })
    .await
  }

  async fn unmount(&self, target: &Path) -> Result<()> {
    let target = target.to_owned();

    run_inst(self.mounter().clone(), move |mounter| mounter.unmount(target)).await
  }

  async fn list(&self) -> Result<Vec<MountPoint>> {
    run_inst(self.mounter().clone(), move |mounter| mounter.list()).await
  }

  async fn is_mount_point(&self, target: &Path) -> Result<bool> {
    let target = target.to_owned();

    run_inst(self.mounter().clone(), move |mounter| {
      mounter.is_mount_point(target)
    })
    .await
  }
}

assert_impl_all!(OsMounter: MounterImpl);
assert_impl_all!(fake::FakeMounter: MounterImpl);
assert_impl_all!(DefaultMounter: Mounter);
assert_impl_all!(FakeMounter: Mounter);

/// Mounter backed by the host's `mount(8)` and `umount(8)`.
pub struct DefaultMounter(Arc<OsMounter>);

impl DefaultMounter {
  pub async fn new() -> Result<Self> {
    run(OsMounter::new)
      .await
      .map(|inner| DefaultMounter(Arc::new(inner)))
  }
}

impl MounterWrapper for DefaultMounter {
  type Mounter = OsMounter;

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}

/// In-memory mounter for harnesses. Records every action it is asked to
/// perform.
#[derive(Clone)]
pub struct FakeMounter(Arc<fake::FakeMounter>);

impl FakeMounter {
  pub fn new(mount_points: impl IntoIterator<Item = MountPoint>) -> Self {
    FakeMounter(Arc::new(fake::FakeMounter::new(mount_points)))
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.0.get_log()
  }

  pub fn reset_log(&self) {
    self.0.reset_log()
  }

  /// Makes every following mount fail with `message`.
  pub fn fail_mounts_with(&self, message: impl Into<String>) {
    self.0.fail_mounts_with(message.into())
  }

  /// Makes every following unmount of a mounted target fail with `message`.
  pub fn fail_unmounts_with(&self, message: impl Into<String>) {
    self.0.fail_unmounts_with(message.into())
  }
}

impl Default for FakeMounter {
  fn default() -> Self {
    FakeMounter::new(None)
  }
}

impl MounterWrapper for FakeMounter {
  type Mounter = fake::FakeMounter;

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deleted_mount_points_match() {
    let mp = MountPoint {
      device: "panfs://10.0.0.1/vol1".into(),
      path: "/mnt/vol1\\040(deleted)".into(),
      ty: "panfs".into(),
      opts: Vec::new(),
      freq: 0,
      pass: 0,
    };

    assert!(mp.matches(Path::new("/mnt/vol1")));
    assert!(!mp.matches(Path::new("/mnt/vol2")));
  }

  #[tokio::test]
  async fn fake_mounter_records_through_the_dispatcher() {
    let mounter = FakeMounter::default();
    let target = Path::new("/mnt/vol1");

    mounter
      .mount(
        "panfs://10.0.0.1/vol1",
        target,
        "panfs",
        &["noatime".to_owned()],
      )
      .await
      .unwrap();
    assert!(mounter.is_mount_point(target).await.unwrap());

    mounter.unmount(target).await.unwrap();
    assert!(!mounter.is_mount_point(target).await.unwrap());

    assert_eq!(mounter.get_log().len(), 2);
  }
}
