//! The server-side HTTP request dispatch core of an RPC/HTTP server
//! framework.
//!
//! Given a connection that has already negotiated an HTTP/1.1 or HTTP/2
//! session, this crate routes each request to a service registered under a
//! virtual host, decodes it through that service's codec, invokes the
//! handler under a per-request deadline, and writes the response back onto
//! the wire in the order the wire protocol requires.
//!
//! The pieces, leaves first:
//!
//! - [`idle`] — closes a client connection idle for longer than a configured
//!   interval.
//! - [`orderer`] — preserves HTTP/1.1 pipelined response order.
//! - [`dispatcher`] — the per-connection state machine tying everything
//!   together.
//! - [`invocation`] — runs a decoded request through a service handler under
//!   a deadline.
//! - [`response`] — builds responses and applies keep-alive/close semantics.
//! - [`classify`] — maps failures to status codes and log levels.
//!
//! TLS, HTTP framing, the virtual-host registry, service codecs and
//! handlers, and executors are collaborators this crate consumes through the
//! traits in [`service`] -- it does not implement any of them.
#![deny(missing_debug_implementations)]

pub mod classify;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod exec;
pub mod idle;
pub mod invocation;
pub mod orderer;
pub mod payload;
pub mod protocol;
pub mod response;
pub mod service;

pub use config::DispatcherConfig;
pub use context::{HandlerOutcome, InvocationContext, Promise};
pub use dispatcher::{Message, RequestDispatcher};
pub use error::{Error, Result};
pub use exec::{BlockingExecutor, Executor};
pub use idle::IdleTimeoutMonitor;
pub use invocation::InvocationResult;
pub use orderer::ResponseOrderer;
pub use protocol::SessionProtocol;
pub use response::{ResponseWriter, Transport, WriteOutcome};
pub use service::{
    DecodeOutcome, DecodeRequest, MappedService, RequestTimeoutPolicy, ServerConfig, ServiceCodec,
    ServiceHandler, VirtualHost,
};
