//! Session timing and retry options.
//!
//! Every correlator exchange carries a deadline; the print watchdog bounds
//! the whole wait for the printer to finish a page.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for a [`PrinterSession`](crate::PrinterSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a scan listens for advertisements.
    pub scan_timeout: Duration,

    /// Deadline for establishing the BLE link.
    pub connect_timeout: Duration,

    /// Deadline for a single request/reply exchange.
    pub command_timeout: Duration,

    /// Upper bound on waiting for the printer to report a page finished.
    pub print_timeout: Duration,

    /// Delay between `EndPrint` polls while the printer is still busy.
    pub end_print_poll: Duration,

    /// Pause after the last row before polling for completion.
    pub settle_delay: Duration,

    /// Retry policy for transient write/connect failures.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            print_timeout: Duration::from_secs(30),
            end_print_poll: Duration::from_millis(100),
            settle_delay: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Create options with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set scan window.
    pub fn with_scan_timeout(mut self, val: Duration) -> Self {
        self.scan_timeout = val;
        self
    }

    /// Builder: set connect deadline.
    pub fn with_connect_timeout(mut self, val: Duration) -> Self {
        self.connect_timeout = val;
        self
    }

    /// Builder: set per-command deadline.
    ///
    /// # Panics
    /// Panics if the deadline is zero; every exchange needs a watchdog.
    pub fn with_command_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "command timeout must be non-zero");
        self.command_timeout = val;
        self
    }

    /// Builder: set print watchdog.
    pub fn with_print_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "print timeout must be non-zero");
        self.print_timeout = val;
        self
    }

    pub fn with_end_print_poll(mut self, val: Duration) -> Self {
        self.end_print_poll = val;
        self
    }

    pub fn with_settle_delay(mut self, val: Duration) -> Self {
        self.settle_delay = val;
        self
    }

    pub fn with_retry(mut self, val: RetryPolicy) -> Self {
        self.retry = val;
        self
    }
}
