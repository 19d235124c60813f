use crate::{ErrorKind, Payload};

/// Classification of a completed HTTP exchange.
///
/// Failures are split by whether another attempt could plausibly
/// succeed. Rate limiting, server hiccups and connection problems are
/// transient; a rejected request stays rejected no matter how often it
/// is sent.
#[derive(Debug, PartialEq)]
pub enum HttpOutcome {
    /// The exchange produced a usable payload
    Success(Payload),
    /// The exchange failed, but a later attempt may succeed
    Retriable(ErrorKind),
    /// The exchange failed for good
    Fatal(ErrorKind),
}

impl HttpOutcome {
    /// Returns `true` if the exchange produced a payload
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` if the exchange is worth another attempt
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }

    /// Returns `true` if the exchange failed permanently
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
