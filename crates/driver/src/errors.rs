use thiserror::Error;

/// Failures reported by the realm. Every variant carries the text the realm
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
  #[error("already exists: {0}")]
  AlreadyExists(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("unauthenticated: {0}")]
  Unauthenticated(String),

  #[error("unavailable: {0}")]
  Unavailable(String),

  #[error("internal: {0}")]
  Internal(String),
}

impl BackendError {
  /// Short name of the failure, safe to hand back to the CO.
  pub fn kind(&self) -> &'static str {
    match self {
      BackendError::AlreadyExists(_) => "already exists",
      BackendError::NotFound(_) => "not found",
      BackendError::InvalidArgument(_) => "invalid argument",
      BackendError::Unauthenticated(_) => "unauthenticated",
      BackendError::Unavailable(_) => "unavailable",
      BackendError::Internal(_) => "internal",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
  Success,
  AlreadyExists,
  NotFound,
  InvalidArgument,
  Unavailable,
}

// Checked in order, first match wins. Keep the specific phrases ahead of the
// generic ones.
const PHRASES: &[(&str, Verdict)] = &[
  ("already exists", Verdict::AlreadyExists),
  ("no volume with name", Verdict::NotFound),
  ("successfully", Verdict::Success),
  ("<volumes>", Verdict::Success),
  ("do not exist", Verdict::NotFound),
  ("invalid string", Verdict::InvalidArgument),
  ("should be", Verdict::InvalidArgument),
  ("status 255", Verdict::Unavailable),
];

/// Turns free-text realm output into a typed result. Text matching none of
/// the known phrases is an internal error.
pub fn classify(text: &str) -> Result<(), BackendError> {
  let lower = text.to_lowercase();
  let verdict = PHRASES
    .iter()
    .find(|(phrase, _)| lower.contains(phrase))
    .map(|(_, verdict)| *verdict);

  let text = text.trim().to_owned();
  match verdict {
    Some(Verdict::Success) => Ok(()),
    Some(Verdict::AlreadyExists) => Err(BackendError::AlreadyExists(text)),
    Some(Verdict::NotFound) => Err(BackendError::NotFound(text)),
    Some(Verdict::InvalidArgument) => Err(BackendError::InvalidArgument(text)),
    Some(Verdict::Unavailable) => Err(BackendError::Unavailable(text)),
    None => Err(BackendError::Internal(text)),
  }
}
