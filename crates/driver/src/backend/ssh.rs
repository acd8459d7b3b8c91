use super::{pasxml::parse_volumes, BackendClient, Secrets, VolumeRecord};
use crate::{
  errors::{classify, BackendError},
  units,
  validation::{param, params, secret_keys},
};
use async_trait::async_trait;
use duct::cmd;
use std::{
  collections::HashMap,
  ffi::OsString,
  fs,
  io::Write,
  os::unix::fs::PermissionsExt,
  path::PathBuf,
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};
use which::which;

/// Parameters forwarded to `volume create`, in the order they are passed.
const CREATE_OPTIONS: &[&str] = &[
  params::BLADESET,
  params::RECOVERY_PRIORITY,
  params::EFSA,
  params::VOLSERVICE,
  params::LAYOUT,
  params::MAX_WIDTH,
  params::STRIPE_UNIT,
  params::RG_WIDTH,
  params::RG_DEPTH,
  params::USER,
  params::GROUP,
  params::UPERM,
  params::GPERM,
  params::OPERM,
  params::DESCRIPTION,
  params::ENCRYPTION,
  params::SOFT,
  params::HARD,
];

/// sshpass exits with 5 when the password was refused.
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Realm client that runs the PanFS CLI on the realm over `ssh`.
///
/// Without a known_hosts file the realm's host key is not verified, so the
/// credentials go to whichever host answers on the realm address. Set one
/// with [`SshBackend::with_known_hosts`] to pin the realm's key.
pub struct SshBackend {
  connect_timeout: u64,
  known_hosts: Option<PathBuf>,
}

impl SshBackend {
  /// `connect_timeout` is in seconds.
  pub fn new(connect_timeout: u64) -> Self {
    SshBackend {
      connect_timeout,
      known_hosts: None,
    }
  }

  /// Verifies realm host keys against `path`, refusing unknown hosts.
  pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
    self.known_hosts = Some(path.into());
    self
  }

  fn ssh_options(&self) -> Vec<OsString> {
    let mut options: Vec<OsString> = vec![
      "-o".into(),
      format!("ConnectTimeout={}", self.connect_timeout).into(),
    ];

    match &self.known_hosts {
      Some(path) => {
        let mut known_hosts = OsString::from("UserKnownHostsFile=");
        known_hosts.push(path);
        options.extend(vec![
          "-o".into(),
          "StrictHostKeyChecking=yes".into(),
          "-o".into(),
          known_hosts,
        ]);
      }
      None => options.extend(vec![
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        "-o".into(),
        "UserKnownHostsFile=/dev/null".into(),
      ]),
    }

    options.push("-o".into());
    options.push("LogLevel=ERROR".into());
    options
  }

  async fn run(&self, secrets: &Secrets, command: Vec<String>) -> Result<String, BackendError> {
    let command_line = shell_join(&command);
    debug!(command = %command_line, "running realm command");

    let secrets = secrets.clone();
    let options = self.ssh_options();
    tokio::task::spawn_blocking(move || Session::open(&secrets, options)?.exec(command_line))
      .await
      .map_err(|e| BackendError::Internal(format!("realm command task failed: {}", e)))?
  }
}

#[async_trait]
impl BackendClient for SshBackend {
  #[instrument(skip(self, params, secrets))]
  async fn create_volume(
    &self,
    name: &str,
    params: &HashMap<String, String>,
    secrets: &Secrets,
  ) -> Result<VolumeRecord, BackendError> {
    self.run(secrets, create_command(name, params)).await?;
    info!("volume created");

    self.get_volume(name, secrets).await
  }

  #[instrument(skip(self, secrets))]
  async fn delete_volume(&self, name: &str, secrets: &Secrets) -> Result<(), BackendError> {
    self.run(secrets, delete_command(name)).await?;
    info!("volume deleted");

    Ok(())
  }

  #[instrument(skip(self, secrets))]
  async fn expand_volume(
    &self,
    name: &str,
    target_bytes: i64,
    secrets: &Secrets,
  ) -> Result<(), BackendError> {
    let current = self.get_volume(name, secrets).await?;
    let target_gb = units::bytes_to_gb(target_bytes);

    // the hard quota may never drop below the soft quota
    if current.hard_quota_gb > 0.0 && current.hard_quota_gb < target_gb {
      self
        .run(secrets, set_quota_command(name, params::HARD, target_gb))
        .await?;
    }

    self
      .run(secrets, set_quota_command(name, params::SOFT, target_gb))
      .await?;
    info!(soft_quota_gb = target_gb, "volume expanded");

    Ok(())
  }

  #[instrument(skip(self, secrets))]
  async fn get_volume(&self, name: &str, secrets: &Secrets) -> Result<VolumeRecord, BackendError> {
    let output = self.run(secrets, get_command(name)).await?;
    let wanted = name.trim_start_matches('/');

    parse_volumes(&output)?
      .into_iter()
      .find(|v| v.name == wanted)
      .ok_or_else(|| BackendError::NotFound(format!("no volume with name {}", volume_path(name))))
  }

  #[instrument(skip(self, secrets))]
  async fn list_volumes(&self, secrets: &Secrets) -> Result<Vec<VolumeRecord>, BackendError> {
    let output = self.run(secrets, list_command()).await?;

    parse_volumes(&output)
  }
}

/// Realm volumes live under the root of the namespace.
fn volume_path(name: &str) -> String {
  format!("/{}", name.trim_start_matches('/'))
}

fn create_command(name: &str, params: &HashMap<String, String>) -> Vec<String> {
  let mut command = vec!["volume".to_owned(), "create".to_owned(), volume_path(name)];
  for option in CREATE_OPTIONS {
    if let Some(value) = param(params, option) {
      command.push((*option).to_owned());
      command.push(value.to_owned());
    }
  }

  command
}

fn delete_command(name: &str) -> Vec<String> {
  vec![
    "volume".to_owned(),
    "delete".to_owned(),
    volume_path(name),
    "force".to_owned(),
  ]
}

fn set_quota_command(name: &str, quota: &str, gb: f64) -> Vec<String> {
  vec![
    "volume".to_owned(),
    "set".to_owned(),
    quota.to_owned(),
    volume_path(name),
    units::format_gb(gb),
  ]
}

fn get_command(name: &str) -> Vec<String> {
  vec![
    "pasxml".to_owned(),
    "volumes".to_owned(),
    "volume".to_owned(),
    volume_path(name),
  ]
}

fn list_command() -> Vec<String> {
  vec!["pasxml".to_owned(), "volumes".to_owned()]
}

/// Quotes an argument for the remote shell.
fn shell_quote(arg: &str) -> String {
  let safe = !arg.is_empty()
    && arg
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-_./+=:,@".contains(c));
  if safe {
    return arg.to_owned();
  }

  format!("'{}'", arg.replace('\'', r#"'\''"#))
}

fn shell_join(command: &[String]) -> String {
  command
    .iter()
    .map(|arg| shell_quote(arg))
    .collect::<Vec<_>>()
    .join(" ")
}

fn secret<'a>(secrets: &'a Secrets, key: &str) -> Option<&'a str> {
  secrets
    .get(key)
    .map(String::as_str)
    .filter(|v| !v.is_empty())
}

/// One `ssh` invocation against the realm. The private key file, if any,
/// lives as long as the session.
struct Session {
  program: PathBuf,
  args: Vec<OsString>,
  sshpass: bool,
  password: Option<String>,
  _key: Option<NamedTempFile>,
}

impl Session {
  fn open(secrets: &Secrets, ssh_options: Vec<OsString>) -> Result<Self, BackendError> {
    let missing = |key| BackendError::Unauthenticated(format!("missing secret {}", key));
    let realm = secret(secrets, secret_keys::REALM_IP).ok_or_else(|| missing(secret_keys::REALM_IP))?;
    let user = secret(secrets, secret_keys::USER).ok_or_else(|| missing(secret_keys::USER))?;

    let ssh = which("ssh").map_err(|e| BackendError::Unavailable(format!("ssh not found: {}", e)))?;
    let mut ssh_args = ssh_options;

    let (key, password, prompt) = match secret(secrets, secret_keys::PRIVATE_KEY) {
      Some(private_key) => {
        let key = write_private_key(private_key)?;
        ssh_args.push("-i".into());
        ssh_args.push(key.path().into());

        let passphrase = secret(secrets, secret_keys::PRIVATE_KEY_PASSPHRASE);
        if passphrase.is_none() {
          ssh_args.push("-o".into());
          ssh_args.push("BatchMode=yes".into());
        }

        (Some(key), passphrase, Some("passphrase"))
      }
      None => {
        let password = secret(secrets, secret_keys::PASSWORD).ok_or_else(|| {
          BackendError::Unauthenticated("no valid authentication credentials".into())
        })?;
        ssh_args.push("-o".into());
        ssh_args.push("PubkeyAuthentication=no".into());
        (None, Some(password), None)
      }
    };
    ssh_args.push(format!("{}@{}", user, realm).into());

    let (program, args) = match password {
      None => (ssh, ssh_args),
      Some(_) => {
        let sshpass = which("sshpass")
          .map_err(|e| BackendError::Unavailable(format!("sshpass not found: {}", e)))?;
        let mut args: Vec<OsString> = vec!["-e".into()];
        if let Some(prompt) = prompt {
          args.push("-P".into());
          args.push(prompt.into());
        }
        args.push(ssh.into());
        args.extend(ssh_args);
        (sshpass, args)
      }
    };

    Ok(Session {
      program,
      args,
      sshpass: password.is_some(),
      password: password.map(ToOwned::to_owned),
      _key: key,
    })
  }

  fn exec(self, command_line: String) -> Result<String, BackendError> {
    let mut args = self.args.clone();
    args.push(command_line.into());

    let mut expression = cmd(self.program.as_path(), args)
      .stderr_to_stdout()
      .stdout_capture()
      .unchecked();
    if let Some(password) = &self.password {
      expression = expression.env("SSHPASS", password);
    }

    let output = expression.run().map_err(|e| {
      BackendError::Unavailable(format!("failed to run {}: {}", self.program.display(), e))
    })?;
    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
      return Ok(text);
    }

    let code = output.status.code().unwrap_or(-1);
    if (self.sshpass && code == SSHPASS_BAD_PASSWORD)
      || text.to_lowercase().contains("permission denied")
    {
      return Err(BackendError::Unauthenticated(text.trim().to_owned()));
    }

    classify(&format!("{}: exit status {}", text.trim(), code)).map(|()| text)
  }
}

/// Writes the key to an owner-only temporary file, removed on drop.
fn write_private_key(private_key: &str) -> Result<NamedTempFile, BackendError> {
  let io_error = |e: std::io::Error| BackendError::Internal(format!("private key file: {}", e));

  let mut file = tempfile::Builder::new()
    .prefix("panfs-csi-key-")
    .tempfile()
    .map_err(io_error)?;
  fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).map_err(io_error)?;

  file.write_all(private_key.as_bytes()).map_err(io_error)?;
  if !private_key.ends_with('\n') {
    file.write_all(b"\n").map_err(io_error)?;
  }
  file.flush().map_err(io_error)?;

  Ok(file)
}
