use url::Url;

/// Receiver for completion events during bulk fetches.
///
/// A sink is shared across all in-flight requests of a bulk fetch, so
/// every method takes `&self`. Implementations decide what a
/// completion means to them; the library only reports it.
pub trait ProgressSink: Send + Sync + std::fmt::Debug {
    /// Called once per request as soon as its result is settled, no
    /// matter whether the answer came from the cache or the network.
    fn item_completed(&self, url: &Url);

    /// Polled after every completed request.
    ///
    /// Returning `true` stops the current bulk fetch; it fails with
    /// [`crate::ErrorKind::Aborted`] and drops all requests that have
    /// not settled yet.
    fn abort_requested(&self) -> bool {
        false
    }
}
