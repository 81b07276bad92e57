//! Error and Result types.

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

/// Result type used throughout the dispatch core.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// An error produced while dispatching, decoding, invoking, or responding to
/// a request.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// The framing layer could not parse the request.
    DecoderFailure,
    /// Request method was `CONNECT`.
    MethodNotAllowed,
    /// No virtual host or service matched, or the codec declined the
    /// request.
    NotFound,
    /// The codec's `decode_request` returned `Failure`.
    RequestDecode,
    /// The codec's `decode_request` returned `NotFound`.
    ServiceNotFound,
    /// The per-request deadline elapsed before the handler completed.
    RequestTimeout,
    /// The handler returned or panicked with an unexpected error.
    Internal,
    /// An I/O error occurred on the underlying transport.
    Transport,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with(mut self, cause: impl Into<Cause>) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn new_decoder_failure(cause: impl Into<Cause>) -> Error {
        Error::new(Kind::DecoderFailure).with(cause)
    }

    pub(crate) fn new_method_not_allowed() -> Error {
        Error::new(Kind::MethodNotAllowed)
    }

    pub(crate) fn new_not_found() -> Error {
        Error::new(Kind::NotFound)
    }

    pub(crate) fn new_request_decode(cause: impl Into<Cause>) -> Error {
        Error::new(Kind::RequestDecode).with(cause)
    }

    pub(crate) fn new_service_not_found() -> Error {
        Error::new(Kind::ServiceNotFound)
    }

    pub(crate) fn new_request_timeout() -> Error {
        Error::new(Kind::RequestTimeout)
    }

    pub(crate) fn new_internal(cause: impl Into<Cause>) -> Error {
        Error::new(Kind::Internal).with(cause)
    }

    pub(crate) fn new_transport(cause: impl Into<Cause>) -> Error {
        Error::new(Kind::Transport).with(cause)
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    /// Whether this error should be logged at `debug` (benign, e.g. a
    /// dropped connection) rather than `warn`.
    pub fn is_request_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::RequestTimeout)
    }

    /// The HTTP status this error maps to when a response must be
    /// synthesized from it. See [`crate::classify`] for the full mapping,
    /// which also applies to handler-thrown causes that never became an
    /// `Error`.
    pub fn status_code(&self) -> StatusCode {
        match self.inner.kind {
            Kind::DecoderFailure | Kind::RequestDecode => StatusCode::BAD_REQUEST,
            Kind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Kind::NotFound | Kind::ServiceNotFound => StatusCode::NOT_FOUND,
            Kind::RequestTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Kind::Internal | Kind::Transport => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::DecoderFailure => f.write_str("failed to decode request"),
            Kind::MethodNotAllowed => f.write_str("method not allowed"),
            Kind::NotFound => f.write_str("no matching virtual host or service"),
            Kind::RequestDecode => f.write_str("codec declined to decode the request"),
            Kind::ServiceNotFound => f.write_str("codec reported no matching service"),
            Kind::RequestTimeout => f.write_str("request exceeded its deadline"),
            Kind::Internal => f.write_str("internal error handling request"),
            Kind::Transport => f.write_str("transport error"),
        }?;
        if let Some(ref cause) = self.inner.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
