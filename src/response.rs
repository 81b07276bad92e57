//! Builds error and success responses, applies keep-alive headers, and
//! consults the [`ResponseOrderer`] before anything hits the wire.

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Response, StatusCode};

use crate::error::{Error, Result};
use crate::orderer::ResponseOrderer;
use crate::service::BoxFuture;

/// Propagated onto a response whenever the originating request carried it,
/// so an H2 stream tunnelled over H1 stays correlated (SPEC_FULL §4.E step
/// 1, §6 "Wire behaviors").
pub fn x_http2_stream_id_header() -> HeaderName {
    HeaderName::from_static("x-http2-stream-id")
}

/// The byte sink a [`ResponseWriter`] writes completed responses to. An
/// embedder implements this over its framing layer; this crate never
/// touches raw bytes itself.
pub trait Transport: Send + Sync {
    /// Writes `response` to the wire. Whether this succeeds or fails
    /// determines which close listener the writer attaches (SPEC_FULL
    /// §4.E step 3).
    fn write(&self, response: Response<Bytes>) -> BoxFuture<'static, std::io::Result<()>>;

    /// Flushes any buffered writes.
    fn flush(&self) -> BoxFuture<'static, std::io::Result<()>>;

    /// Closes the connection. Called after the final response of a
    /// non-keep-alive exchange, or after any write failure.
    fn close(&self);
}

/// What happened to a response handed to [`ResponseWriter::respond`].
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The response (and possibly others it unblocked) was written.
    Written,
    /// `use_hol_blocking` is set and this response is still waiting on an
    /// earlier one; nothing was written yet.
    Buffered,
    /// The pending-response buffer exceeded its configured bound. The
    /// caller must close the connection.
    Overflow,
}

/// Builds the literal `"<code> <reason-phrase>"` plain-text body SPEC_FULL
/// §4.E specifies for a status with no explicit payload.
pub fn error_response(status: StatusCode) -> Response<Bytes> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = Bytes::from(format!("{} {}", status.as_u16(), reason));
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=UTF-8")
        .body(body)
        .expect("status, header, and body are always well-formed here")
}

/// Consults the [`ResponseOrderer`] (when HOL blocking applies) and applies
/// keep-alive / close semantics before handing responses to a [`Transport`].
pub struct ResponseWriter<T> {
    transport: T,
    orderer: Option<ResponseOrderer>,
}

impl<T: Transport> ResponseWriter<T> {
    /// Creates a writer for a freshly accepted connection.
    pub fn new(transport: T, use_hol_blocking: bool, max_pending_responses: Option<usize>) -> Self {
        ResponseWriter {
            transport,
            orderer: if use_hol_blocking {
                Some(ResponseOrderer::new().with_max_pending(max_pending_responses))
            } else {
                None
            },
        }
    }

    /// Stops ordering responses, once the connection has upgraded to a
    /// multiplexed protocol (SPEC_FULL §4.C message classification).
    pub fn disable_ordering(&mut self) {
        self.orderer = None;
    }

    /// Flushes any writes accumulated since the last flush.
    pub async fn flush(&self) -> Result<()> {
        self.transport.flush().await.map_err(Error::new_transport)
    }

    /// Closes the underlying transport.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Submits `response` (tagged `seq`) for writing, per SPEC_FULL §4.E.
    ///
    /// `final_req_seq` is the sequence number of the connection's actual
    /// last accepted request (set once a non-keep-alive request has been
    /// dispatched), or `None` if the connection hasn't latched closed yet.
    /// It is compared against each response's own sequence number --
    /// *not* applied uniformly -- because a single call can drain several
    /// buffered out-of-order responses from [`ResponseOrderer`] at once
    /// (e.g. an earlier keep-alive request's response arriving late behind
    /// the connection's final response): only the response whose `seq`
    /// actually equals `final_req_seq` gets close-on-success semantics,
    /// every other response in the same batch is still a keep-alive
    /// response.
    pub async fn respond(
        &mut self,
        seq: u32,
        h2_stream_id: Option<HeaderValue>,
        mut response: Response<Bytes>,
        final_req_seq: Option<u32>,
        is_reading: bool,
    ) -> Result<WriteOutcome> {
        if let Some(stream_id) = h2_stream_id {
            response.headers_mut().insert(x_http2_stream_id_header(), stream_id);
        }

        let ready = match &mut self.orderer {
            Some(orderer) => {
                let ready = orderer.submit(seq, response);
                if ready.is_empty() {
                    if orderer.is_over_capacity() {
                        tracing::warn!(
                            seq,
                            "pending response buffer exceeded its configured bound, closing connection"
                        );
                        return Ok(WriteOutcome::Overflow);
                    }
                    return Ok(WriteOutcome::Buffered);
                }
                ready
            }
            None => vec![(seq, response)],
        };

        for (res_seq, res) in ready {
            let is_final = final_req_seq == Some(res_seq);
            self.write_one(res, is_final).await?;
        }

        if !is_reading {
            self.flush().await?;
        }

        Ok(WriteOutcome::Written)
    }

    /// Writes a single response. `is_final` must be true for exactly the
    /// response answering the connection's actual last accepted request --
    /// that one gets no keep-alive headers and a close-on-success listener;
    /// every other response gets keep-alive headers and a close-on-failure
    /// listener, even if it is written in the same batch as the final one.
    async fn write_one(&self, mut response: Response<Bytes>, is_final: bool) -> Result<()> {
        if !is_final {
            let len = response.body().len();
            response.headers_mut().insert(
                CONTENT_LENGTH,
                HeaderValue::from_str(&len.to_string())
                    .expect("a decimal byte length is always a valid header value"),
            );
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("keep-alive"));

            if let Err(err) = self.transport.write(response).await {
                self.transport.close();
                return Err(Error::new_transport(err));
            }
        } else {
            let result = self.transport.write(response).await;
            self.transport.close();
            result.map_err(Error::new_transport)?;
        }
        Ok(())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ResponseWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("transport", &self.transport)
            .field("ordered", &self.orderer.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// An in-memory [`Transport`] for tests: records every write, and
    /// whether/how `close` was called.
    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        pub writes: Mutex<Vec<Response<Bytes>>>,
        pub closed: AtomicBool,
        pub fail_next_write: AtomicBool,
    }

    impl Transport for std::sync::Arc<RecordingTransport> {
        fn write(&self, response: Response<Bytes>) -> BoxFuture<'static, std::io::Result<()>> {
            let this = self.clone();
            Box::pin(async move {
                if this.fail_next_write.swap(false, Ordering::SeqCst) {
                    return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "boom"));
                }
                this.writes.lock().unwrap().push(response);
                Ok(())
            })
        }

        fn flush(&self) -> BoxFuture<'static, std::io::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingTransport;
    use super::*;
    use std::sync::Arc;

    fn ok_response(body: &'static str) -> Response<Bytes> {
        Response::builder()
            .status(StatusCode::OK)
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    #[tokio::test]
    async fn keep_alive_response_gets_content_length_and_connection_header() {
        let transport = Arc::new(RecordingTransport::default());
        let mut writer = ResponseWriter::new(transport.clone(), false, None);
        let outcome = writer
            .respond(0, None, ok_response("hi"), None, true)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].headers().get(CONTENT_LENGTH).unwrap(), "2");
        assert_eq!(writes[0].headers().get(CONNECTION).unwrap(), "keep-alive");
        assert!(!transport.closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn final_response_closes_after_write_regardless_of_keep_alive_headers() {
        let transport = Arc::new(RecordingTransport::default());
        let mut writer = ResponseWriter::new(transport.clone(), false, None);
        writer
            .respond(0, None, ok_response("bye"), Some(0), true)
            .await
            .unwrap();

        let writes = transport.writes.lock().unwrap();
        assert!(writes[0].headers().get(CONNECTION).is_none());
        assert!(transport.closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn write_failure_on_keep_alive_path_closes_connection() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_next_write.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut writer = ResponseWriter::new(transport.clone(), false, None);
        let result = writer.respond(0, None, ok_response("x"), None, true).await;
        assert!(result.is_err());
        assert!(transport.closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn out_of_order_response_is_buffered_until_predecessor_written() {
        let transport = Arc::new(RecordingTransport::default());
        let mut writer = ResponseWriter::new(transport.clone(), true, None);

        let outcome = writer
            .respond(1, None, ok_response("fast"), None, true)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Buffered);
        assert!(transport.writes.lock().unwrap().is_empty());

        let outcome = writer
            .respond(0, None, ok_response("slow"), None, true)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].body(), &Bytes::from_static(b"slow"));
        assert_eq!(writes[1].body(), &Bytes::from_static(b"fast"));
    }

    #[tokio::test]
    async fn overflow_is_reported_instead_of_buffering_unbounded() {
        let transport = Arc::new(RecordingTransport::default());
        let mut writer = ResponseWriter::new(transport.clone(), true, Some(1));

        writer.respond(1, None, ok_response("a"), None, true).await.unwrap();
        let outcome = writer.respond(2, None, ok_response("b"), None, true).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Overflow);
    }

    /// A batch drained from the orderer in one `respond` call must only
    /// apply close-on-success treatment to the response whose `seq` is the
    /// connection's actual final request -- not to every response in the
    /// batch. Here req 1 (the final, non-keep-alive request) completes and
    /// buffers first; req 0 (an earlier keep-alive request) completing
    /// drains both in one call.
    #[tokio::test]
    async fn only_the_true_final_response_in_a_drained_batch_closes_the_connection() {
        let transport = Arc::new(RecordingTransport::default());
        let mut writer = ResponseWriter::new(transport.clone(), true, None);

        let outcome = writer
            .respond(1, None, ok_response("last"), Some(1), true)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Buffered);
        assert!(!transport.closed.load(std::sync::atomic::Ordering::SeqCst));

        let outcome = writer
            .respond(0, None, ok_response("first"), Some(1), true)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        // req 0 is not the final request: keep-alive headers, no close yet.
        assert_eq!(writes[0].body(), &Bytes::from_static(b"first"));
        assert_eq!(writes[0].headers().get(CONTENT_LENGTH).unwrap(), "5");
        assert_eq!(writes[0].headers().get(CONNECTION).unwrap(), "keep-alive");
        // req 1 is the true final request: no keep-alive headers, closes.
        assert_eq!(writes[1].body(), &Bytes::from_static(b"last"));
        assert!(writes[1].headers().get(CONNECTION).is_none());
        assert!(transport.closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn error_response_body_matches_spec_format() {
        let res = error_response(StatusCode::NOT_FOUND);
        assert_eq!(res.body(), &Bytes::from_static(b"404 Not Found"));
        assert_eq!(
            res.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=UTF-8"
        );
    }

    #[tokio::test]
    async fn h2_stream_id_header_is_copied_onto_response() {
        let transport = Arc::new(RecordingTransport::default());
        let mut writer = ResponseWriter::new(transport.clone(), false, None);
        writer
            .respond(
                0,
                Some(HeaderValue::from_static("7")),
                ok_response("hi"),
                None,
                true,
            )
            .await
            .unwrap();
        let writes = transport.writes.lock().unwrap();
        assert_eq!(
            writes[0].headers().get(x_http2_stream_id_header()).unwrap(),
            "7"
        );
    }
}
