use super::Runtime;
use crate::error::Result;
use crate::reactor::ReactorConfig;

use std::time::Duration;

/// Settings shared by every part of a runtime.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RuntimeConfig {
    pub(crate) reactor: ReactorConfig,

    /// Upper bound of a single socket read.
    pub(crate) read_chunk: usize,

    /// Upper bound of a single socket write.
    pub(crate) write_chunk: usize,

    /// Out queue limit given to new connections.
    pub(crate) out_queue_limit: Option<usize>,

    /// Delay before a keep-alive task is restarted.
    pub(crate) keep_alive_delay: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reactor: ReactorConfig::default(),
            read_chunk: 16 * 1024,
            write_chunk: 16 * 1024,
            out_queue_limit: None,
            keep_alive_delay: Duration::from_millis(500),
        }
    }
}

/// Builder for configuring and creating a runtime.
///
/// Every setting has a default, so `RuntimeBuilder::new().build()` is the
/// same as [`Runtime::new`].
///
/// # Examples
///
/// ```rust,ignore
/// let runtime = RuntimeBuilder::new()
///     .timer_allowance(Duration::from_millis(10))
///     .out_queue_limit(64 * 1024)
///     .build()?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Creates a new `RuntimeBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Window inside which a timer counts as due (default 30 ms).
    ///
    /// Timers falling into the same window fire in the same pass.
    pub fn timer_allowance(mut self, allowance: Duration) -> Self {
        self.config.reactor.allowance = allowance;
        self
    }

    /// Poll timeout when no timer is pending (default one hour).
    pub fn idle_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.reactor.idle_poll_timeout = timeout;
        self
    }

    /// Readiness events collected per poll (default 256, at least 1).
    pub fn max_events(mut self, n: usize) -> Self {
        self.config.reactor.max_events = n.max(1);
        self
    }

    /// Bytes read from a socket per readiness event (default 16 KiB).
    pub fn read_chunk(mut self, n: usize) -> Self {
        self.config.read_chunk = n.max(1);
        self
    }

    /// Bytes written to a socket per readiness event (default 16 KiB).
    pub fn write_chunk(mut self, n: usize) -> Self {
        self.config.write_chunk = n.max(1);
        self
    }

    /// Out queue limit of new connections (default unlimited).
    pub fn out_queue_limit(mut self, limit: usize) -> Self {
        self.config.out_queue_limit = Some(limit).filter(|l| *l > 0);
        self
    }

    /// Restart delay of keep-alive tasks (default 500 ms).
    pub fn keep_alive_delay(mut self, delay: Duration) -> Self {
        self.config.keep_alive_delay = delay;
        self
    }

    /// Builds the runtime with the configured options.
    ///
    /// This creates the poller; failures to do so are returned.
    pub fn build(self) -> Result<Runtime> {
        Runtime::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeBuilder;

    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = RuntimeBuilder::new().config;

        assert_eq!(config.reactor.allowance, Duration::from_millis(30));
        assert_eq!(config.reactor.max_events, 256);
        assert_eq!(config.read_chunk, 16 * 1024);
        assert_eq!(config.out_queue_limit, None);
        assert_eq!(config.keep_alive_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let config = RuntimeBuilder::new().out_queue_limit(0).max_events(0).config;

        assert_eq!(config.out_queue_limit, None);
        assert_eq!(config.reactor.max_events, 1);
    }
}
