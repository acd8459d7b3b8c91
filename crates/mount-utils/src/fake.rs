use crate::{runner::MounterImpl, MountError, MountPoint, Result};
use smallvec::SmallVec;
use std::{
  path::PathBuf,
  sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
  Mount {
    source: String,
    target: PathBuf,
    fs_type: String,
    options: Vec<String>,
  },

  Unmount {
    target: PathBuf,
  },
}

struct FakeMounterInner {
  mount_points: Vec<MountPoint>,
  log: Vec<FakeAction>,
  mount_error: Option<String>,
  unmount_error: Option<String>,
}

pub struct FakeMounter(Mutex<FakeMounterInner>);

impl FakeMounter {
  pub fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    let inner = FakeMounterInner {
      mount_points: mps.into_iter().collect(),
      log: Vec::new(),
      mount_error: None,
      unmount_error: None,
    };

    Self(Mutex::new(inner))
  }

  fn inner(&self) -> MutexGuard<'_, FakeMounterInner> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn reset_log(&self) {
    self.inner().log.clear();
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.inner().log.clone()
  }

  pub fn fail_mounts_with(&self, message: String) {
    self.inner().mount_error = Some(message);
  }

  pub fn fail_unmounts_with(&self, message: String) {
    self.inner().unmount_error = Some(message);
  }
}

impl MounterImpl for FakeMounter {
  fn mount(
    &self,
    source: String,
    target: PathBuf,
    fstype: String,
    options: SmallVec<[String; 4]>,
  ) -> Result<()> {
    let mut inner = self.inner();
    if let Some(message) = &inner.mount_error {
      return Err(MountError::MountFailed(message.clone()));
    }

    let options = options.into_vec();
    let mut device = source.clone();
    if options.iter().any(|o| o == "bind") {
      // Mimic linux: a bind mount of a mount point shows the original
      // device in /proc/mounts, not the bind source.
      if let Some(mp) = inner
        .mount_points
        .iter()
        .find(|mp| mp.path.to_string_lossy() == source.as_str())
      {
        device = mp.device.clone();
      }
    }

    inner.mount_points.push(MountPoint {
      device,
      path: target.clone(),
      ty: fstype.clone(),
      opts: options.clone(),
      freq: 0,
      pass: 0,
    });
    info!("Fake mounter: mounted {} to {}", source, target.display());
    inner.log.push(FakeAction::Mount {
      source,
      target,
      fs_type: fstype,
      options,
    });

    Ok(())
  }

  fn unmount(&self, target: PathBuf) -> Result<()> {
    let mut inner = self.inner();

    if let Some(i) = inner.mount_points.iter().position(|mp| mp.matches(&target)) {
      if let Some(message) = &inner.unmount_error {
        return Err(MountError::UnmountFailed(message.clone()));
      }

      let mp = inner.mount_points.remove(i);
      info!(
        "Fake mounter: unmounted {} from {}",
        mp.device,
        target.display()
      );
    }

    inner.log.push(FakeAction::Unmount { target });
    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    Ok(self.inner().mount_points.clone())
  }

  fn is_mount_point(&self, target: PathBuf) -> Result<bool> {
    Ok(self.inner().mount_points.iter().any(|mp| mp.matches(&target)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use smallvec::smallvec;

  fn mp(device: &str, path: &str) -> MountPoint {
    MountPoint {
      device: device.into(),
      path: path.into(),
      ty: "panfs".into(),
      opts: Vec::new(),
      freq: 0,
      pass: 0,
    }
  }

  #[test]
  fn bind_mounts_report_the_original_device() {
    let fm = FakeMounter::new(vec![mp("panfs://10.0.0.1/vol1", "/mnt/vol1")]);

    fm.bind_mount("/mnt/vol1".into(), "/mnt/bound".into(), SmallVec::new())
      .unwrap();

    let mounts = fm.list().unwrap();
    assert_eq!(mounts[1].device(), "panfs://10.0.0.1/vol1");
    assert_eq!(mounts[1].opts(), &["bind".to_owned()]);
  }

  #[test]
  fn unmounting_an_unmounted_target_succeeds() {
    let fm = FakeMounter::new(None);

    fm.unmount("/mnt/nothing".into()).unwrap();
    assert_eq!(
      fm.get_log(),
      vec![FakeAction::Unmount {
        target: "/mnt/nothing".into()
      }]
    );
  }

  #[test]
  fn injected_mount_errors_are_returned() {
    let fm = FakeMounter::new(None);
    fm.fail_mounts_with("no route to realm".into());

    let err = fm
      .mount(
        "panfs://10.0.0.1/vol1".into(),
        "/mnt/vol1".into(),
        "panfs".into(),
        smallvec!["noatime".to_owned()],
      )
      .unwrap_err();
    assert!(matches!(err, MountError::MountFailed(m) if m == "no route to realm"));
    assert!(fm.get_log().is_empty());
  }

  #[test]
  fn injected_unmount_errors_keep_the_mount() {
    let fm = FakeMounter::new(vec![mp("panfs://10.0.0.1/vol1", "/mnt/vol1")]);
    fm.fail_unmounts_with("target is busy".into());

    assert!(fm.unmount("/mnt/vol1".into()).is_err());
    assert!(fm.is_mount_point("/mnt/vol1".into()).unwrap());
  }
}
