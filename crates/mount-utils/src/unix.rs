use crate::{
  runner::{make_bind_opts, MounterImpl},
  MountError, MountPoint, Result,
};
use duct::cmd;
use smallvec::SmallVec;
use std::{
  fmt::Write,
  fs, io,
  path::{Path, PathBuf},
  process::Output,
};
use tracing::{debug, error, info};
use which::which;

const PROC_MOUNTS_PATH: &str = "/proc/mounts";
const MAX_LIST_TRIES: usize = 3;
const EXPECTED_FIELDS_PER_MOUNTS_LINE: usize = 6;

pub struct OsMounter {
  mount_cmd: PathBuf,
  umount_cmd: PathBuf,
}

impl OsMounter {
  /// Locates `mount` and `umount` on the host.
  pub(crate) fn new() -> Result<Self> {
    let lookup = |name: &str| {
      which(name).map_err(|e| {
        MountError::Io(io::Error::new(
          io::ErrorKind::NotFound,
          format!("{} not found in PATH: {}", name, e),
        ))
      })
    };

    let mount_cmd = lookup("mount")?;
    let umount_cmd = lookup("umount")?;
    debug!(
      mount = %mount_cmd.display(),
      umount = %umount_cmd.display(),
      "located mount binaries"
    );

    Ok(OsMounter {
      mount_cmd,
      umount_cmd,
    })
  }

  fn do_mount(&self, source: &str, target: &Path, fstype: &str, options: &[String]) -> Result<()> {
    let (mount_args, log_str) = make_mount_args(source, target, fstype, options);

    info!(
      "Mounting cmd {} with arguments ({})",
      self.mount_cmd.display(),
      log_str
    );
    let output = cmd(&*self.mount_cmd, mount_args)
      .stderr_to_stdout()
      .stdout_capture()
      .unchecked()
      .run()?;

    check_output(output).map_err(|message| {
      error!("Mount failed: {}", message);
      MountError::MountFailed(format!(
        "mount {} on {}: {}",
        source,
        target.display(),
        message
      ))
    })
  }
}

impl MounterImpl for OsMounter {
  fn mount(
    &self,
    source: String,
    target: PathBuf,
    fstype: String,
    options: SmallVec<[String; 4]>,
  ) -> Result<()> {
    fs::create_dir_all(&target)?;
    if self.is_mount_point(target.clone())? {
      info!("{} is already mounted, skipping mount", target.display());
      return Ok(());
    }

    let (bind, bind_opts, bind_remount_opts) = make_bind_opts(&options);
    if bind {
      self.do_mount(&source, &target, &fstype, &bind_opts)?;
      self.do_mount(&source, &target, &fstype, &bind_remount_opts)
    } else {
      self.do_mount(&source, &target, &fstype, &options)
    }
  }

  fn unmount(&self, target: PathBuf) -> Result<()> {
    if !self.is_mount_point(target.clone())? {
      info!("{} is not mounted, nothing to unmount", target.display());
      return Ok(());
    }

    info!("Unmounting {}", target.display());
    let output = cmd!(&*self.umount_cmd, &target)
      .stderr_to_stdout()
      .stdout_capture()
      .unchecked()
      .run()?;

    check_output(output).map_err(|message| {
      error!("Unmount failed: {}", message);
      MountError::UnmountFailed(format!("umount {}: {}", target.display(), message))
    })
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    let content = consistent_read(Path::new(PROC_MOUNTS_PATH), MAX_LIST_TRIES)?;

    parse_proc_mounts(&content)
  }
}

fn check_output(output: Output) -> std::result::Result<(), String> {
  if output.status.success() {
    return Ok(());
  }

  let text = String::from_utf8_lossy(&output.stdout);
  Err(format!("{}, output: {}", output.status, text.trim()))
}

/// Builds the arguments to mount(8):
///   mount [-t $fstype] [-o $options] $source $target
/// The returned log string only reports how many options were passed since
/// they may carry sensitive material.
fn make_mount_args(
  source: &str,
  target: &Path,
  fstype: &str,
  options: &[String],
) -> (Vec<String>, String) {
  let mut mount_args = Vec::with_capacity(6);
  let mut log_str = String::new();

  if !fstype.is_empty() {
    mount_args.push("-t".to_owned());
    mount_args.push(fstype.to_owned());
    let _ = write!(log_str, "-t {} ", fstype);
  }

  if !options.is_empty() {
    mount_args.push("-o".to_owned());
    mount_args.push(options.join(","));
    let _ = write!(log_str, "-o <{} options> ", options.len());
  }

  mount_args.push(source.to_owned());
  mount_args.push(target.to_string_lossy().into_owned());
  let _ = write!(log_str, "{} {}", source, target.display());

  (mount_args, log_str)
}

/// Reads a file until two consecutive reads agree. /proc files larger than a
/// page may change between read() calls.
fn consistent_read(path: &Path, attempts: usize) -> io::Result<Vec<u8>> {
  let mut old_content = fs::read(path)?;

  for _ in 0..attempts {
    let new_content = fs::read(path)?;
    if new_content == old_content {
      return Ok(new_content);
    }

    old_content = new_content;
  }

  Err(io::Error::new(
    io::ErrorKind::Other,
    format!(
      "could not get consistent content of '{}' after {} attempts",
      path.display(),
      attempts
    ),
  ))
}

fn parse_proc_mounts(content: &[u8]) -> Result<Vec<MountPoint>> {
  let s = std::str::from_utf8(content)
    .map_err(|_| MountError::InvalidMountTable("proc mounts contain invalid UTF8".into()))?;

  let mut out = Vec::new();
  for line in s.lines() {
    if line.trim().is_empty() {
      continue;
    }

    let fields = line
      .split_whitespace()
      .collect::<SmallVec<[&str; EXPECTED_FIELDS_PER_MOUNTS_LINE]>>();
    if fields.len() != EXPECTED_FIELDS_PER_MOUNTS_LINE {
      return Err(MountError::InvalidMountTable(format!(
        "wrong number of fields (expected {}, got {})",
        EXPECTED_FIELDS_PER_MOUNTS_LINE,
        fields.len()
      )));
    }

    let freq = fields[4]
      .parse()
      .map_err(|e| MountError::InvalidMountTable(format!("invalid freq: {}", e)))?;
    let pass = fields[5]
      .parse()
      .map_err(|e| MountError::InvalidMountTable(format!("invalid pass: {}", e)))?;

    out.push(MountPoint {
      device: fields[0].to_owned(),
      path: PathBuf::from(fields[1]),
      ty: fields[2].to_owned(),
      opts: fields[3].split(',').map(ToOwned::to_owned).collect(),
      freq,
      pass,
    })
  }

  Ok(out)
}
