use std::{convert::TryFrom, fmt};
use tracing::{debug, field, Span};

/// Records a value on the current span under the given field name. Fields
/// must be declared up front in the handler's `#[instrument(fields(..))]`.
pub(crate) trait Record: Sized {
  fn record_field(self, field: &'static str) -> Self;

  #[inline]
  fn record_response(self) -> Self {
    self.record_field("response")
  }
}

impl<T: fmt::Debug> Record for T {
  #[inline]
  fn record_field(self, field: &'static str) -> Self {
    Span::current().record(field, &field::debug(&self));
    self
  }
}

/// Converts a wire request into its typed form and records it on the handler
/// span. Malformed requests never reach the service.
pub(crate) fn parse_request<P, T>(request: tonic::Request<P>) -> Result<T, tonic::Status>
where
  T: TryFrom<P, Error = tonic::Status> + fmt::Debug,
{
  match T::try_from(request.into_inner()) {
    Ok(request) => Ok(request.record_field("request")),
    Err(status) => {
      debug!(code = ?status.code(), "rejected request: {}", status.message());
      Err(status)
    }
  }
}
