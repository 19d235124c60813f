/// Per-request tweaks for a single fetch.
///
/// The default options use the cache and share the rate limiter with
/// all other in-flight requests, which is what bulk fetching wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the cache lookup and always go to the network.
    ///
    /// The fresh response is still written back to the cache
    /// afterwards, so later lookups benefit from it.
    pub bypass_cache: bool,
    /// Hold the fetcher's exclusive slot for the whole request,
    /// including all retries.
    ///
    /// Other exclusive fetches wait until this one finishes. Useful for
    /// preflight requests whose answer decides whether a run should
    /// continue at all.
    pub exclusive: bool,
}

impl FetchOptions {
    /// Options for a request that must not be answered from the cache
    #[must_use]
    pub const fn bypass_cache() -> Self {
        Self {
            bypass_cache: true,
            exclusive: false,
        }
    }

    /// Options for a request that runs alone, shutting out other
    /// exclusive requests until it completes
    #[must_use]
    pub const fn exclusive() -> Self {
        Self {
            bypass_cache: false,
            exclusive: true,
        }
    }
}
