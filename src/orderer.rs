//! Preserves HTTP/1.1 pipelined response order by buffering out-of-order
//! completions.

use std::collections::BTreeMap;

use http::Response;
use bytes::Bytes;

/// Orders responses by ascending `req_seq`, buffering completions that
/// arrive before the response they must follow.
///
/// Used only when `use_hol_blocking` is true (SPEC_FULL §4.B).
#[derive(Debug, Default)]
pub struct ResponseOrderer {
    res_seq: u32,
    pending: BTreeMap<u32, Response<Bytes>>,
    max_pending: Option<usize>,
}

impl ResponseOrderer {
    /// Creates an orderer starting at sequence 0, with no bound on buffered
    /// out-of-order responses.
    pub fn new() -> Self {
        ResponseOrderer {
            res_seq: 0,
            pending: BTreeMap::new(),
            max_pending: None,
        }
    }

    /// Sets the maximum number of buffered out-of-order responses this
    /// orderer will hold before [`ResponseOrderer::is_over_capacity`] reports
    /// true (SPEC_FULL §4.B.1). `None` leaves it unbounded.
    pub fn with_max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// The sequence number of the oldest response not yet emitted.
    pub fn res_seq(&self) -> u32 {
        self.res_seq
    }

    /// Whether there are no buffered out-of-order responses.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the buffered out-of-order response count exceeds the
    /// configured bound. Callers should close the connection rather than
    /// let this grow without bound.
    pub fn is_over_capacity(&self) -> bool {
        match self.max_pending {
            Some(max) => self.pending.len() > max,
            None => false,
        }
    }

    /// Submits `res` tagged with `seq`. Returns the in-order run of
    /// `(seq, response)` pairs -- possibly empty, possibly more than one --
    /// that should now be written to the wire, in order. Each entry keeps
    /// its own sequence number so a caller draining a multi-response batch
    /// can still tell exactly which response is which (e.g. to decide which
    /// one, if any, is the connection's true final response).
    pub fn submit(&mut self, seq: u32, res: Response<Bytes>) -> Vec<(u32, Response<Bytes>)> {
        if seq != self.res_seq {
            if let Some(displaced) = self.pending.insert(seq, res) {
                // A response already occupied this slot: `req_seq` must have
                // wrapped around u32::MAX requests on one connection, which
                // isn't reachable in practice. Log and drop the older one
                // rather than silently losing the new submission.
                tracing::error!(
                    seq,
                    "orphaned pending response displaced by a new submission at the same sequence; \
                     this indicates req_seq wraparound"
                );
                drop(displaced);
            }
            return Vec::new();
        }

        let mut ready = vec![(seq, res)];
        self.res_seq += 1;
        while let Some(next) = self.pending.remove(&self.res_seq) {
            ready.push((self.res_seq, next));
            self.res_seq += 1;
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn response(tag: &'static str) -> Response<Bytes> {
        Response::builder()
            .status(StatusCode::OK)
            .body(Bytes::from_static(tag.as_bytes()))
            .unwrap()
    }

    #[test]
    fn in_order_submission_emits_immediately() {
        let mut orderer = ResponseOrderer::new();
        let ready = orderer.submit(0, response("a"));
        assert_eq!(ready.len(), 1);
        assert_eq!(orderer.res_seq(), 1);
    }

    #[test]
    fn out_of_order_submission_buffers_until_predecessor_arrives() {
        let mut orderer = ResponseOrderer::new();
        // /fast (seq 1) completes before /slow (seq 0).
        let ready = orderer.submit(1, response("fast"));
        assert!(ready.is_empty());
        assert!(!orderer.is_empty());

        let ready = orderer.submit(0, response("slow"));
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].0, 0);
        assert_eq!(ready[0].1.body(), &Bytes::from_static(b"slow"));
        assert_eq!(ready[1].0, 1);
        assert_eq!(ready[1].1.body(), &Bytes::from_static(b"fast"));
        assert!(orderer.is_empty());
        assert_eq!(orderer.res_seq(), 2);
    }

    #[test]
    fn three_requests_completing_in_reverse_order() {
        let mut orderer = ResponseOrderer::new();
        assert!(orderer.submit(2, response("c")).is_empty());
        assert!(orderer.submit(1, response("b")).is_empty());
        let ready = orderer.submit(0, response("a"));
        assert_eq!(ready.len(), 3);
        assert_eq!(orderer.res_seq(), 3);
        assert!(orderer.is_empty());
    }

    #[test]
    fn over_capacity_is_reported_once_bound_is_exceeded() {
        let mut orderer = ResponseOrderer::new().with_max_pending(Some(1));
        assert!(orderer.submit(1, response("a")).is_empty());
        assert!(!orderer.is_over_capacity());
        assert!(orderer.submit(2, response("b")).is_empty());
        assert!(orderer.is_over_capacity());
    }

    #[test]
    fn displaced_pending_response_is_logged_and_dropped() {
        let mut orderer = ResponseOrderer::new();
        assert!(orderer.submit(5, response("first")).is_empty());
        // Resubmitting the same out-of-order seq displaces the old entry.
        assert!(orderer.submit(5, response("second")).is_empty());
        assert_eq!(orderer.pending.len(), 1);
    }
}
