//! The invocation context and its task-local "currently executing" slot.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::Error;
use crate::payload::PayloadGuard;

/// A value the service handler produces on success: either a response the
/// handler built directly, or an opaque result the codec knows how to
/// encode.
///
/// The opaque case is represented with `Box<dyn Any + Send>` because a
/// single dispatch core serves many heterogeneous services, each with its
/// own result type the core has no reason to know about -- the same
/// resolution `http::Extensions` uses internally for per-request extension
/// values.
pub enum HandlerOutcome {
    /// The handler already produced a complete HTTP response.
    Response(http::Response<bytes::Bytes>),
    /// An opaque result for `ServiceCodec::encode_response` to serialize.
    Value(Box<dyn std::any::Any + Send>),
}

impl std::fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutcome::Response(resp) => f.debug_tuple("Response").field(resp).finish(),
            HandlerOutcome::Value(_) => f.debug_tuple("Value").field(&"..").finish(),
        }
    }
}

/// The promise a handler completes, either with a [`HandlerOutcome`] or a
/// failure [`Error`].
///
/// This is a thin wrapper over a `tokio::sync::oneshot::Sender`: the first
/// completion attempt wins, exactly matching the "first transition wins"
/// requirement for racing a handler against its timeout (SPEC_FULL §5).
pub struct Promise {
    tx: oneshot::Sender<Result<HandlerOutcome, Error>>,
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish()
    }
}

impl Promise {
    pub(crate) fn new() -> (Promise, oneshot::Receiver<Result<HandlerOutcome, Error>>) {
        let (tx, rx) = oneshot::channel();
        (Promise { tx }, rx)
    }

    /// Completes the promise successfully. A no-op if already completed,
    /// but logged -- SPEC_FULL §4.D step 2 only wants this observed when it
    /// indicates the handler raced its own completion (e.g. completed, then
    /// threw from cleanup code).
    pub fn try_succeed(self, outcome: HandlerOutcome) {
        if self.tx.send(Ok(outcome)).is_err() {
            tracing::debug!("invocation promise already completed; dropping successful result");
        }
    }

    /// Fails the promise. A no-op if already completed, logged for the same
    /// reason as [`Promise::try_succeed`].
    pub fn try_fail(self, cause: Error) {
        if self.tx.send(Err(cause)).is_err() {
            tracing::debug!("invocation promise already completed; dropping failure");
        }
    }
}

/// Identifies one in-flight invocation: its sequence number, the decoded
/// request payload, and the channel/service identity the handler needs.
///
/// Cheaply cloneable: the handler is handed one clone to consume, while the
/// invocation runner keeps another to pass to `ServiceCodec::encode_response`
/// / `encode_failure_response` once the handler's promise completes.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// The connection-assigned sequence number of this request.
    pub req_seq: u32,
    /// The path the request was routed to, after virtual-host mapping.
    pub mapped_path: Arc<str>,
    /// The decoded request payload, owned by the invocation once dispatch
    /// hands it off.
    pub payload: PayloadGuard,
    /// Whether the originating request carried an `x-http2-stream-id`
    /// extension header, and if so, its value -- propagated onto the
    /// eventual response per SPEC_FULL §4.E step 1.
    pub h2_stream_id: Option<http::HeaderValue>,
}

tokio::task_local! {
    static CURRENT: InvocationContext;
}

impl InvocationContext {
    /// Runs `fut` with `ctx` published as "currently executing" for the
    /// duration of the future, task-local per SPEC_FULL §5. The slot is
    /// cleared on every exit path -- including early drop/cancellation --
    /// because `task_local!`'s scope future clears its value on drop.
    pub async fn scope<F, T>(ctx: InvocationContext, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        CURRENT.scope(ctx, fut).await
    }

    /// Whether an invocation context is currently published on this task.
    pub fn is_published() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    /// The currently published invocation context, if any.
    pub fn try_current() -> Option<InvocationContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    /// The currently published invocation context.
    ///
    /// # Panics
    ///
    /// Panics if called outside an [`InvocationContext::scope`] -- code
    /// reachable only from within a handler invocation (e.g. a codec
    /// callback run on the handler's behalf) may rely on this; anything
    /// else should use [`InvocationContext::try_current`].
    pub fn current() -> InvocationContext {
        Self::try_current().expect("no invocation context is published on this task")
    }
}
