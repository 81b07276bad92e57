//! Per-connection dispatcher configuration and its builder, in the same
//! method-chaining, `Default`-backed shape as the framework's own connection
//! `Builder`.

use std::time::Duration;

use crate::service::FixedTimeout;

/// Options controlling a single [`crate::dispatcher::RequestDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Whether a freshly accepted HTTP/1.1 connection starts with HOL
    /// blocking enabled. Always `false` for a connection that begins on
    /// H2/H2C.
    pub use_hol_blocking: bool,
    /// Bounds how many out-of-order responses the [`crate::orderer::ResponseOrderer`]
    /// will buffer before the connection is closed (SPEC_FULL §4.B.1).
    /// `None` leaves it unbounded.
    pub max_pending_responses: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            use_hol_blocking: true,
            max_pending_responses: None,
        }
    }
}

impl DispatcherConfig {
    /// Starts a [`Builder`] with every option at its default.
    pub fn builder() -> Builder {
        Builder::new()
    }
}

/// Builds a [`DispatcherConfig`] one option at a time.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    inner: DispatcherConfig,
}

impl Builder {
    /// Starts from every option at its default.
    pub fn new() -> Self {
        Builder {
            inner: DispatcherConfig::default(),
        }
    }

    /// Sets whether the connection begins with HOL-blocking response
    /// ordering enabled (should be `true` for H1/H1C, `false` for H2/H2C).
    pub fn use_hol_blocking(mut self, enabled: bool) -> Self {
        self.inner.use_hol_blocking = enabled;
        self
    }

    /// Bounds the number of buffered out-of-order responses.
    pub fn max_pending_responses(mut self, max: usize) -> Self {
        self.inner.max_pending_responses = Some(max);
        self
    }

    /// Finishes the config.
    pub fn build(self) -> DispatcherConfig {
        self.inner
    }
}

/// Convenience for embedders that want the same request timeout for every
/// service rather than a per-path [`crate::service::RequestTimeoutPolicy`].
pub fn fixed_timeout(timeout: Duration) -> FixedTimeout {
    FixedTimeout(timeout)
}
