use std::{
  fs::{self, DirBuilder},
  io::{self, Write},
  os::unix::fs::{DirBuilderExt, PermissionsExt},
  path::Path,
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KmipError {
  #[error("Failed to create KMIP config directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("Failed to create KMIP config file: {0}")]
  Create(#[source] io::Error),

  #[error("Failed to set permissions on KMIP config file: {0}")]
  Permissions(#[source] io::Error),

  #[error("KMIP config data is required for encrypted volumes")]
  MissingData,

  #[error("Failed to write KMIP config data to file: {0}")]
  Write(#[source] io::Error),
}

/// Single-use KMIP configuration handed to the panfs mount helper. The file
/// is closed and removed when this value is dropped, whichever way the
/// mount went.
#[derive(Debug)]
pub struct KmipConfigFile {
  file: NamedTempFile,
}

impl KmipConfigFile {
  /// Writes `data` to a new owner-only file under `dir`. `dir` is created
  /// owner-only when missing.
  pub fn create(dir: &Path, data: Option<&str>) -> Result<Self, KmipError> {
    DirBuilder::new()
      .recursive(true)
      .mode(0o700)
      .create(dir)
      .map_err(KmipError::CreateDir)?;

    let file = tempfile::Builder::new()
      .prefix("kmip-config-")
      .suffix(".conf")
      .tempfile_in(dir)
      .map_err(KmipError::Create)?;
    let mut config = KmipConfigFile { file };

    fs::set_permissions(config.path(), fs::Permissions::from_mode(0o600))
      .map_err(KmipError::Permissions)?;

    let data = match data {
      Some(data) if !data.is_empty() => data,
      _ => return Err(KmipError::MissingData),
    };

    config
      .file
      .write_all(data.as_bytes())
      .and_then(|()| config.file.flush())
      .map_err(KmipError::Write)?;
    debug!(path = %config.path().display(), "wrote KMIP config file");

    Ok(config)
  }

  #[inline]
  pub fn path(&self) -> &Path {
    self.file.path()
  }

  /// Mount option pointing the panfs mount helper at this file.
  pub fn mount_option(&self) -> String {
    format!("kmip-config-file={}", self.path().display())
  }
}
