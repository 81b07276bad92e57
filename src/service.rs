//! The collaborator interfaces this core consumes: virtual host routing,
//! service codecs, and service handlers.
//!
//! These are modeled as object-safe traits behind `Arc`/boxed futures, the
//! same shape the framework's own `Service`/`MakeServiceRef` traits use to
//! stay dyn-compatible while still being `async`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Response};

use crate::context::{InvocationContext, Promise};
use crate::error::Error;
use crate::exec::BlockingExecutor;
use crate::payload::PayloadGuard;

/// A future boxed for storage behind a trait object.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The inputs a codec needs to attempt decoding a request.
pub struct DecodeRequest<'a> {
    /// The negotiated session protocol.
    pub session_protocol: crate::protocol::SessionProtocol,
    /// The lowercased-or-as-is hostname from the `Host` header, port
    /// stripped.
    pub hostname: &'a str,
    /// The request path, query string stripped.
    pub path: &'a str,
    /// The path the virtual host mapped the request to.
    pub mapped_path: &'a str,
    /// The full request, including headers and method.
    pub request: &'a http::Request<()>,
    /// The request's payload.
    pub payload: PayloadGuard,
    /// The dispatcher-assigned sequence number this request will carry as
    /// [`InvocationContext::req_seq`] -- the codec must stamp it onto the
    /// context it builds, since sequencing is connection-owned bookkeeping
    /// the codec has no other way to learn.
    pub req_seq: u32,
    /// The `x-http2-stream-id` extension header value, if present, to carry
    /// through onto [`InvocationContext::h2_stream_id`] unchanged.
    pub h2_stream_id: Option<http::HeaderValue>,
}

impl std::fmt::Debug for DecodeRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeRequest")
            .field("session_protocol", &self.session_protocol)
            .field("hostname", &self.hostname)
            .field("path", &self.path)
            .field("mapped_path", &self.mapped_path)
            .field("payload", &self.payload)
            .field("req_seq", &self.req_seq)
            .field("h2_stream_id", &self.h2_stream_id)
            .finish()
    }
}

/// The result of a codec's attempt to decode a request.
pub enum DecodeOutcome {
    /// Decoding succeeded; dispatch should proceed to invocation.
    Success {
        /// The invocation context to publish and hand to the handler.
        ctx: InvocationContext,
    },
    /// Decoding failed. If `error_response` is set, the dispatcher writes
    /// it directly; otherwise it releases the payload and responds `400`.
    Failure {
        /// An explicit cause for the decode failure.
        cause: Error,
        /// A codec-supplied response to use verbatim, if any.
        error_response: Option<Response<Bytes>>,
    },
    /// The codec recognizes the mapped path but declines to service this
    /// particular request (e.g. an unsupported RPC method name inside the
    /// payload); dispatch responds `404`.
    NotFound,
}

impl std::fmt::Debug for DecodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeOutcome::Success { ctx } => f.debug_struct("Success").field("ctx", ctx).finish(),
            DecodeOutcome::Failure { cause, error_response } => f
                .debug_struct("Failure")
                .field("cause", cause)
                .field("error_response", error_response)
                .finish(),
            DecodeOutcome::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Pluggable request/response marshaling attached to a service.
pub trait ServiceCodec: Send + Sync {
    /// Attempts to decode a request into an invocation context.
    fn decode_request<'a>(&'a self, req: DecodeRequest<'a>) -> BoxFuture<'a, DecodeOutcome>;

    /// Encodes a successful handler result into a response body.
    fn encode_response(&self, ctx: &InvocationContext, outcome: Box<dyn std::any::Any + Send>) -> Bytes;

    /// Encodes a failure cause into a response body.
    fn encode_failure_response(&self, ctx: &InvocationContext, cause: &Error) -> Bytes;

    /// Whether a failure response should be written with a classified
    /// non-2xx status (`true`), or suppressed behind a `200 OK` so the
    /// wire-level transport stays healthy for e.g. a streaming RPC protocol
    /// that encodes its own status inside the body (`false`).
    fn failure_response_fails_session(&self, ctx: &InvocationContext) -> bool;
}

/// A service handler: given an invocation context, completes a promise with
/// either a [`HandlerOutcome`] or a failure.
pub trait ServiceHandler: Send + Sync {
    /// Invokes the handler. The handler may complete `promise` synchronously
    /// before the returned future resolves, or asynchronously after it
    /// resolves -- both are valid per SPEC_FULL §4.D step 5.
    fn invoke(
        &self,
        ctx: InvocationContext,
        blocking: BlockingExecutor,
        promise: Promise,
    ) -> BoxFuture<'static, ()>;
}

/// The result of routing a request within a virtual host.
pub struct MappedService {
    /// Whether a service was found for the requested path.
    pub is_present: bool,
    /// The path the service is mounted at (may differ from the request
    /// path, e.g. with prefix stripping).
    pub mapped_path: Arc<str>,
    /// The codec attached to this service.
    pub codec: Arc<dyn ServiceCodec>,
    /// The handler attached to this service.
    pub handler: Arc<dyn ServiceHandler>,
}

impl std::fmt::Debug for MappedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedService")
            .field("is_present", &self.is_present)
            .field("mapped_path", &self.mapped_path)
            .finish()
    }
}

impl MappedService {
    /// A "no service here" result, used when no route matches.
    pub fn absent() -> MappedService {
        struct Unreachable;
        impl ServiceCodec for Unreachable {
            fn decode_request<'a>(&'a self, _req: DecodeRequest<'a>) -> BoxFuture<'a, DecodeOutcome> {
                unreachable!("absent MappedService is never invoked")
            }
            fn encode_response(&self, _ctx: &InvocationContext, _outcome: Box<dyn std::any::Any + Send>) -> Bytes {
                unreachable!("absent MappedService is never invoked")
            }
            fn encode_failure_response(&self, _ctx: &InvocationContext, _cause: &Error) -> Bytes {
                unreachable!("absent MappedService is never invoked")
            }
            fn failure_response_fails_session(&self, _ctx: &InvocationContext) -> bool {
                unreachable!("absent MappedService is never invoked")
            }
        }
        impl ServiceHandler for Unreachable {
            fn invoke(
                &self,
                _ctx: InvocationContext,
                _blocking: BlockingExecutor,
                _promise: Promise,
            ) -> BoxFuture<'static, ()> {
                unreachable!("absent MappedService is never invoked")
            }
        }
        MappedService {
            is_present: false,
            mapped_path: Arc::from(""),
            codec: Arc::new(Unreachable),
            handler: Arc::new(Unreachable),
        }
    }
}

/// A named routing partition within the server, selected by the `Host`
/// header.
pub trait VirtualHost: Send + Sync {
    /// Finds the service mounted at `path` on this virtual host.
    fn find_service(&self, path: &str) -> MappedService;
}

/// The registry of virtual hosts for a server.
pub trait ServerConfig: Send + Sync {
    /// Finds the virtual host matching `hostname`, falling back to a
    /// default host when no match.
    fn find_virtual_host(&self, hostname: &str) -> Arc<dyn VirtualHost>;
}

/// Decides the per-request deadline for a matched service.
pub trait RequestTimeoutPolicy: Send + Sync {
    /// Returns the timeout for `mapped_path`, or `Duration::ZERO` to
    /// disable the deadline entirely.
    fn timeout(&self, mapped_path: &str) -> Duration;
}

/// A [`RequestTimeoutPolicy`] that applies the same duration to every
/// request.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeout(pub Duration);

impl RequestTimeoutPolicy for FixedTimeout {
    fn timeout(&self, _mapped_path: &str) -> Duration {
        self.0
    }
}

/// Rejects `CONNECT` up front, matching SPEC_FULL §4.C's dispatch pipeline.
pub(crate) fn is_connect(method: &Method) -> bool {
    method == Method::CONNECT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_mapped_service_reports_not_present() {
        let svc = MappedService::absent();
        assert!(!svc.is_present);
    }

    #[test]
    fn fixed_timeout_ignores_path() {
        let policy = FixedTimeout(Duration::from_millis(250));
        assert_eq!(policy.timeout("/any"), Duration::from_millis(250));
        assert_eq!(policy.timeout("/other"), Duration::from_millis(250));
    }

    #[test]
    fn connect_is_detected() {
        assert!(is_connect(&Method::CONNECT));
        assert!(!is_connect(&Method::GET));
    }
}
