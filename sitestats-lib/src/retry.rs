use std::time::Duration;

use http::StatusCode;

use crate::ErrorKind;

/// An extension trait to help determine if a failed HTTP exchange
/// is worth another attempt.
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for StatusCode {
    /// Rate limiting and server-side failures are transient.
    /// Every other rejection is final; the endpoint will keep giving
    /// the same answer no matter how often it is asked.
    fn should_retry(&self) -> bool {
        self.is_server_error() || *self == StatusCode::TOO_MANY_REQUESTS
    }
}

impl RetryExt for reqwest::Error {
    fn should_retry(&self) -> bool {
        // Builder errors are programming errors. Anything that failed
        // on the wire (connect, timeout, interrupted body) may succeed
        // next time.
        !self.is_builder()
    }
}

impl RetryExt for ErrorKind {
    fn should_retry(&self) -> bool {
        match self {
            ErrorKind::NetworkRequest(e) | ErrorKind::ReadResponseBody(e) => e.should_retry(),
            ErrorKind::RejectedStatusCode(code) => code.should_retry(),
            _ => false,
        }
    }
}

/// Delays between retry attempts.
///
/// Grows along the Fibonacci sequence, scaled by a base wait time.
/// The sequence is deliberately gentler than exponential backoff:
/// retries here respond to short rate limit windows, not to outages.
#[derive(Debug, Clone)]
pub(crate) struct Fibonacci {
    base: Duration,
    curr: u32,
    next: u32,
}

impl Fibonacci {
    pub(crate) const fn new(base: Duration) -> Self {
        Self {
            base,
            curr: 1,
            next: 1,
        }
    }
}

impl Iterator for Fibonacci {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.base.saturating_mul(self.curr);
        (self.curr, self.next) = (self.next, self.curr.saturating_add(self.next));
        Some(delay)
    }
}
