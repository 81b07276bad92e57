//! Executes a decoded request through a service handler, races it against a
//! per-request deadline, and converts the outcome into a finished response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode};

use crate::classify;
use crate::context::{HandlerOutcome, InvocationContext, Promise};
use crate::error::Error;
use crate::exec::BlockingExecutor;
use crate::response;
use crate::service::{ServiceCodec, ServiceHandler};

/// The finished response produced by an invocation, addressed back to its
/// request's sequence number so a [`crate::response::ResponseWriter`] can
/// order it correctly.
#[derive(Debug)]
pub struct InvocationResult {
    /// The sequence number of the request this response answers.
    pub req_seq: u32,
    /// Propagated from the request, see SPEC_FULL §4.E step 1.
    pub h2_stream_id: Option<HeaderValue>,
    /// The response to hand to the writer.
    pub response: Response<Bytes>,
}

/// Runs `handler.invoke(ctx, ..)` to completion (success, failure, handler
/// panic, or timeout) and produces the resulting response.
///
/// Publication of `ctx` on a task-local (SPEC_FULL §5) happens on a spawned
/// task so the handler's own code runs with the current-invocation slot set
/// regardless of which task polls this future to completion; spawning also
/// means a handler panic surfaces as a dropped promise rather than
/// unwinding into the connection's own task.
pub async fn run_invocation(
    ctx: InvocationContext,
    codec: Arc<dyn ServiceCodec>,
    handler: Arc<dyn ServiceHandler>,
    blocking: BlockingExecutor,
    timeout: Duration,
) -> InvocationResult {
    let req_seq = ctx.req_seq;
    let h2_stream_id = ctx.h2_stream_id.clone();
    let completion_ctx = ctx.clone();
    let payload = ctx.payload.clone();
    let scope_ctx = ctx.clone();

    let (promise, mut rx) = Promise::new();

    tokio::spawn(InvocationContext::scope(
        scope_ctx,
        handler.invoke(ctx, blocking, promise),
    ));

    let completion = if timeout.is_zero() {
        await_promise(&mut rx).await
    } else {
        tokio::select! {
            biased;
            result = await_promise(&mut rx) => result,
            _ = tokio::time::sleep(timeout) => Err(Error::new_request_timeout()),
        }
    };

    // Whichever path produced `completion`, the payload handed off at
    // dispatch has now reached its one release point (SPEC_FULL §3
    // invariant 4): success, failure, handler panic, and timeout all flow
    // through here.
    payload.release();

    let response = build_response(&completion_ctx, codec.as_ref(), completion);

    InvocationResult {
        req_seq,
        h2_stream_id,
        response,
    }
}

async fn await_promise(
    rx: &mut tokio::sync::oneshot::Receiver<Result<HandlerOutcome, Error>>,
) -> Result<HandlerOutcome, Error> {
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(Error::new_internal(
            "handler dropped its completion promise without completing it",
        )),
    }
}

/// Converts a completed (or failed/timed-out) invocation into a response,
/// trapping any panic raised while asking the codec to encode the result --
/// SPEC_FULL §4.D's "any exception thrown while handling the invocation
/// result is itself converted into a 500".
fn build_response(
    ctx: &InvocationContext,
    codec: &dyn ServiceCodec,
    completion: Result<HandlerOutcome, Error>,
) -> Response<Bytes> {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| match completion {
        Ok(outcome) => success_response(ctx, codec, outcome),
        Err(cause) => failure_response(ctx, codec, cause),
    }));

    result.unwrap_or_else(|_| {
        tracing::error!("panic while building response from invocation result");
        response::error_response(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

fn success_response(ctx: &InvocationContext, codec: &dyn ServiceCodec, outcome: HandlerOutcome) -> Response<Bytes> {
    match outcome {
        HandlerOutcome::Response(resp) => resp,
        HandlerOutcome::Value(value) => {
            let body = codec.encode_response(ctx, value);
            Response::builder()
                .status(StatusCode::OK)
                .body(body)
                .expect("status and body are always well-formed here")
        }
    }
}

fn failure_response(ctx: &InvocationContext, codec: &dyn ServiceCodec, cause: Error) -> Response<Bytes> {
    let body = codec.encode_failure_response(ctx, &cause);
    if codec.failure_response_fails_session(ctx) {
        Response::builder()
            .status(classify::invocation_status(&cause))
            .body(body)
            .expect("status and body are always well-formed here")
    } else {
        Response::builder()
            .status(StatusCode::OK)
            .body(body)
            .expect("status and body are always well-formed here")
    }
}
