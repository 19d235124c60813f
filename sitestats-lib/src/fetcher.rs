use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, warn};
use tokio::sync::Mutex;
use typed_builder::TypedBuilder;
use url::Url;

use crate::cache::Cache;
use crate::retry::Fibonacci;
use crate::throttle::Throttle;
use crate::transport::Transport;
use crate::{ErrorKind, FetchOptions, HttpOutcome, Payload, ProgressSink, Result};

/// Default total number of attempts per request, including the first
pub const DEFAULT_MAX_ATTEMPTS: u64 = 3;

/// Default wait time in seconds between attempts, scaled by the
/// Fibonacci sequence
pub const DEFAULT_RETRY_WAIT_TIME_SECS: usize = 1;

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: usize = 20;

/// Default number of requests admitted per rate window
pub const DEFAULT_REQUESTS_PER_WINDOW: usize = 9;

/// Default length of the rate window in seconds
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 1;

/// Default number of days a cached response stays usable
pub const DEFAULT_MAX_CACHE_AGE_DAYS: i64 = 50;

/// Default user agent
pub const DEFAULT_USER_AGENT: &str = concat!("sitestats/", env!("CARGO_PKG_VERSION"));

/// Default value of the identifying source header
pub const DEFAULT_SOURCE_TAG: &str = concat!("sitestats/", env!("CARGO_PKG_VERSION"));

/// Builder for [`Fetcher`].
///
/// # Example
///
/// ```
/// use sitestats_lib::FetcherBuilder;
///
/// let fetcher = FetcherBuilder::builder()
///     .requests_per_window(5_usize)
///     .build()
///     .fetcher();
/// ```
#[derive(Debug, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct FetcherBuilder {
    /// Cache holding previously fetched responses.
    /// Defaults to a disabled cache, which stores nothing.
    #[builder(default_code = "Cache::disabled()")]
    cache: Cache,
    /// User agent of outbound requests
    #[builder(default_code = "DEFAULT_USER_AGENT.to_string()")]
    user_agent: String,
    /// Value of the identifying source header attached to every
    /// outbound request
    #[builder(default_code = "DEFAULT_SOURCE_TAG.to_string()")]
    source_tag: String,
    /// Number of requests admitted per rate window
    #[builder(default_code = "DEFAULT_REQUESTS_PER_WINDOW")]
    requests_per_window: usize,
    /// Length of the rate window
    #[builder(default_code = "Duration::from_secs(DEFAULT_RATE_WINDOW_SECS)")]
    rate_window: Duration,
    /// Total number of attempts per request, including the first
    #[builder(default_code = "DEFAULT_MAX_ATTEMPTS")]
    max_attempts: u64,
    /// Base wait time between attempts, scaled by the Fibonacci
    /// sequence
    #[builder(default_code = "Duration::from_secs(DEFAULT_RETRY_WAIT_TIME_SECS as u64)")]
    retry_wait_time: Duration,
    /// Days a cached response stays usable before it is evicted on
    /// close
    #[builder(default_code = "DEFAULT_MAX_CACHE_AGE_DAYS")]
    max_cache_age_days: i64,
    /// Request timeout
    #[builder(default_code = "Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64)")]
    timeout: Duration,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FetcherBuilder {
    /// Instantiate a [`Fetcher`].
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be created, the source tag is
    /// not a valid header value, or the cache retention is negative.
    pub fn fetcher(self) -> Result<Fetcher> {
        let Self {
            cache,
            user_agent,
            source_tag,
            requests_per_window,
            rate_window,
            max_attempts,
            retry_wait_time,
            max_cache_age_days,
            timeout,
        } = self;

        if max_cache_age_days < 0 {
            return Err(ErrorKind::InvalidMaxAge(max_cache_age_days));
        }

        let transport = Transport::new(&user_agent, &source_tag, timeout)?;

        Ok(Fetcher {
            transport,
            throttle: Throttle::new(requests_per_window, rate_window),
            cache,
            exclusive: Mutex::new(()),
            closed: AtomicBool::new(false),
            max_attempts,
            retry_wait_time,
            max_cache_age_days,
        })
    }
}

/// Fetches JSON payloads over HTTP with caching, rate limiting and
/// retries.
///
/// One fetcher is meant to live for the whole process and be shared by
/// everything that talks to the endpoint, so the rate budget and the
/// cache connection are global by construction.
///
/// A fetch never surfaces network failures to the caller: a request
/// that stays unanswered after all attempts simply yields `None`. Only
/// misuse (fetching after [`close`](Self::close)) and a requested
/// abort produce errors.
#[derive(Debug)]
pub struct Fetcher {
    transport: Transport,
    throttle: Throttle,
    cache: Cache,
    /// Serializes fetches that demand mutual exclusion
    exclusive: Mutex<()>,
    closed: AtomicBool,
    max_attempts: u64,
    retry_wait_time: Duration,
    max_cache_age_days: i64,
}

impl Fetcher {
    /// Fetch the payload for a single URL.
    ///
    /// Answers from the cache when possible; otherwise goes to the
    /// network and stores the result. Returns `None` when the request
    /// failed permanently or exhausted its attempts.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Closed`] once the fetcher is closed.
    pub async fn fetch(&self, url: &Url, options: FetchOptions) -> Result<Option<Payload>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorKind::Closed);
        }

        if !options.bypass_cache {
            match self.cache.get(url).await {
                Ok(Some(payload)) => {
                    debug!("Answered {url} from cache");
                    return Ok(Some(payload));
                }
                Ok(None) => {}
                Err(e) => warn!("Cache lookup for {url} failed: {e}"),
            }
        }

        let payload = self.fetch_from_network(url, options).await?;
        if let Some(payload) = &payload
            && let Err(e) = self.cache.insert(url, payload).await
        {
            warn!("Cannot store response for {url} in cache: {e}");
        }
        Ok(payload)
    }

    /// Fetch the payloads for many URLs concurrently.
    ///
    /// The returned vector aligns with `urls`: position `i` holds the
    /// payload for `urls[i]` or `None` if that request failed. Cached
    /// answers are used where available; everything else goes to the
    /// network under the shared rate budget, and fresh responses are
    /// written back to the cache in one batch.
    ///
    /// The progress sink, when given, is told about every settled
    /// request, cache hits included. URLs appearing twice are fetched
    /// twice if they miss the cache; deduplication within one batch is
    /// not guaranteed.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Closed`] once the fetcher is closed and
    /// with [`ErrorKind::Aborted`] when the progress sink requests an
    /// abort; unsettled requests are dropped in both cases.
    pub async fn fetch_many(
        &self,
        urls: &[Url],
        options: FetchOptions,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Vec<Option<Payload>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorKind::Closed);
        }

        let mut results = if options.bypass_cache {
            vec![None; urls.len()]
        } else {
            match self.cache.get_many(urls).await {
                Ok(results) => results,
                Err(e) => {
                    warn!("Cache lookup for {} URLs failed: {e}", urls.len());
                    vec![None; urls.len()]
                }
            }
        };

        if let Some(sink) = progress {
            for (url, result) in urls.iter().zip(&results) {
                if result.is_some() {
                    sink.item_completed(url);
                    if sink.abort_requested() {
                        return Err(ErrorKind::Aborted);
                    }
                }
            }
        }

        let mut in_flight: FuturesUnordered<_> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_none())
            .map(|(index, _)| async move {
                (index, self.fetch_from_network(&urls[index], options).await)
            })
            .collect();

        let mut fresh = Vec::new();
        while let Some((index, result)) = in_flight.next().await {
            let payload = result?;
            if let Some(payload) = &payload {
                fresh.push((urls[index].clone(), payload.clone()));
            }
            results[index] = payload;

            if let Some(sink) = progress {
                sink.item_completed(&urls[index]);
                if sink.abort_requested() {
                    return Err(ErrorKind::Aborted);
                }
            }
        }

        // Only fresh responses get written back; cache hits are
        // already stored
        if let Err(e) = self.cache.insert_many(&fresh).await {
            warn!("Cannot store {} responses in cache: {e}", fresh.len());
        }

        Ok(results)
    }

    /// Change the number of requests admitted per rate window.
    ///
    /// Takes effect for all requests admitted from now on; lowering
    /// the rate waits until enough admission slots have returned.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Closed`] once the fetcher is closed.
    pub async fn set_rate(&self, requests_per_window: usize) -> Result<()> {
        self.throttle.set_rate(requests_per_window).await
    }

    /// Close the fetcher.
    ///
    /// Stale cache entries are evicted, buffered cache writes are
    /// committed, and pending admissions are unblocked with an error.
    /// Cache maintenance runs before the storage handle is released.
    /// Closing twice is fine; fetching afterwards fails fast with
    /// [`ErrorKind::Closed`].
    ///
    /// # Errors
    ///
    /// Fails if the final cache commit fails.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.cache.evict_older_than(self.max_cache_age_days).await {
            warn!("Cache eviction on close failed: {e}");
        }
        let result = self.cache.close().await;
        self.throttle.close();
        result
    }

    /// Fetch from the network, honoring the exclusive slot when
    /// requested
    async fn fetch_from_network(&self, url: &Url, options: FetchOptions) -> Result<Option<Payload>> {
        if options.exclusive {
            let _guard = self.exclusive.lock().await;
            self.fetch_with_retries(url).await
        } else {
            self.fetch_with_retries(url).await
        }
    }

    /// Run the admit/request/classify sequence until a terminal
    /// outcome is reached or the attempt budget runs out
    async fn fetch_with_retries(&self, url: &Url) -> Result<Option<Payload>> {
        let delays = Fibonacci::new(self.retry_wait_time);

        for (attempt, delay) in (1..=self.max_attempts).zip(delays) {
            self.throttle.acquire().await?;

            match self.transport.fetch(url).await {
                HttpOutcome::Success(payload) => return Ok(Some(payload)),
                HttpOutcome::Fatal(e) => {
                    error!("Request for {url} failed: {e}");
                    return Ok(None);
                }
                HttpOutcome::Retriable(e) => {
                    if attempt == self.max_attempts {
                        error!("Request for {url} failed after {attempt} attempts: {e}");
                        return Ok(None);
                    }
                    warn!("Attempt {attempt} for {url} failed: {e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Ok(None)
    }
}

/// A convenience function to fetch a single URL with the default
/// configuration and no cache
///
/// # Errors
///
/// Fails if the fetcher cannot be created
pub async fn fetch(url: &Url) -> Result<Option<Payload>> {
    let fetcher = FetcherBuilder::builder().build().fetcher()?;
    fetcher.fetch(url, FetchOptions::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::website;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_body() -> serde_json::Value {
        json!({"visits": [{"date": "2023-01-01", "visits": 42.0}]})
    }

    /// A fetcher with short retry waits, suitable for tests
    fn quick_fetcher(cache: Cache) -> Fetcher {
        FetcherBuilder::builder()
            .cache(cache)
            .retry_wait_time(Duration::from_millis(50))
            .build()
            .fetcher()
            .unwrap()
    }

    async fn request_count(mock_server: &MockServer) -> usize {
        mock_server.received_requests().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_fetch_returns_payload() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = quick_fetcher(Cache::disabled());
        let payload = fetcher
            .fetch(&website(&mock_server.uri()), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(payload, Some(Payload::Json(sample_body())));
    }

    #[tokio::test]
    async fn test_second_fetch_answered_from_cache() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("responses.db")).await.unwrap();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = quick_fetcher(cache);
        let url = website(&mock_server.uri());
        let first = fetcher.fetch(&url, FetchOptions::default()).await.unwrap();
        let second = fetcher.fetch(&url, FetchOptions::default()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            request_count(&mock_server).await,
            1,
            "second fetch must not hit the network"
        );
    }

    #[tokio::test]
    async fn test_bypass_cache_goes_to_network() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("responses.db")).await.unwrap();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = quick_fetcher(cache);
        let url = website(&mock_server.uri());
        fetcher.fetch(&url, FetchOptions::default()).await.unwrap();
        fetcher
            .fetch(&url, FetchOptions::bypass_cache())
            .await
            .unwrap();

        assert_eq!(request_count(&mock_server).await, 2);
    }

    #[tokio::test]
    async fn test_not_found_is_cached_as_no_data() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("responses.db")).await.unwrap();
        let mock_server = mock_server!(StatusCode::NOT_FOUND);

        let fetcher = quick_fetcher(cache);
        let url = website(&mock_server.uri());
        let first = fetcher.fetch(&url, FetchOptions::default()).await.unwrap();
        let second = fetcher.fetch(&url, FetchOptions::default()).await.unwrap();

        assert_eq!(first, Some(Payload::NoData));
        assert_eq!(second, Some(Payload::NoData));
        assert_eq!(
            request_count(&mock_server).await,
            1,
            "a not-found answer is a real answer and must be cached"
        );
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = quick_fetcher(Cache::disabled());
        let start = Instant::now();
        let payload = fetcher
            .fetch(&website(&mock_server.uri()), FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(payload, Some(Payload::Json(sample_body())));
        assert_eq!(request_count(&mock_server).await, 3);
        // Two waits of one base unit each before the third attempt
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "retries must be spaced by backoff delays"
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_yield_absence() {
        let mock_server = mock_server!(StatusCode::SERVICE_UNAVAILABLE);

        let fetcher = quick_fetcher(Cache::disabled());
        let payload = fetcher
            .fetch(&website(&mock_server.uri()), FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(payload, None);
        assert_eq!(
            request_count(&mock_server).await,
            DEFAULT_MAX_ATTEMPTS as usize
        );
    }

    #[tokio::test]
    async fn test_fatal_rejection_is_not_retried() {
        let mock_server = mock_server!(StatusCode::FORBIDDEN);

        let fetcher = quick_fetcher(Cache::disabled());
        let payload = fetcher
            .fetch(&website(&mock_server.uri()), FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(payload, None);
        assert_eq!(request_count(&mock_server).await, 1);
    }

    #[tokio::test]
    async fn test_absence_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("responses.db")).await.unwrap();
        let mock_server = mock_server!(
            StatusCode::OK,
            set_body_string("<html>not json</html>".to_string())
        );

        let fetcher = quick_fetcher(cache);
        let url = website(&mock_server.uri());
        assert_eq!(fetcher.fetch(&url, FetchOptions::default()).await.unwrap(), None);
        assert_eq!(fetcher.fetch(&url, FetchOptions::default()).await.unwrap(), None);

        assert_eq!(
            request_count(&mock_server).await,
            2,
            "failures must not poison the cache"
        );
    }

    #[tokio::test]
    async fn test_fetch_after_close_fails_fast() {
        let fetcher = quick_fetcher(Cache::disabled());
        fetcher.close().await.unwrap();
        fetcher.close().await.unwrap();

        let result = fetcher
            .fetch(&website("https://example.com"), FetchOptions::default())
            .await;
        assert!(matches!(result, Err(ErrorKind::Closed)));

        let result = fetcher
            .fetch_many(&[website("https://example.com")], FetchOptions::default(), None)
            .await;
        assert!(matches!(result, Err(ErrorKind::Closed)));
    }

    #[tokio::test]
    async fn test_close_evicts_and_persists_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("responses.db");
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let cache = Cache::open(&path).await.unwrap();
        let fetcher = quick_fetcher(cache);
        let url = website(&mock_server.uri());
        fetcher.fetch(&url, FetchOptions::default()).await.unwrap();
        fetcher.close().await.unwrap();

        // A fresh fetcher over the same file sees the stored response
        let cache = Cache::open(&path).await.unwrap();
        let fetcher = quick_fetcher(cache);
        fetcher.fetch(&url, FetchOptions::default()).await.unwrap();
        assert_eq!(request_count(&mock_server).await, 1);
    }

    #[tokio::test]
    async fn test_negative_cache_age_rejected_at_build() {
        let result = FetcherBuilder::builder()
            .max_cache_age_days(-1_i64)
            .build()
            .fetcher();
        assert!(matches!(result, Err(ErrorKind::InvalidMaxAge(-1))));
    }

    #[tokio::test]
    async fn test_fetch_many_aligns_with_input() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("responses.db")).await.unwrap();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"page": "a"})))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let fetcher = quick_fetcher(cache);
        let urls = vec![
            website(&format!("{}/a", mock_server.uri())),
            website(&format!("{}/b", mock_server.uri())),
            website(&format!("{}/c", mock_server.uri())),
        ];
        let results = fetcher
            .fetch_many(&urls, FetchOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(
            results,
            vec![
                Some(Payload::Json(json!({"page": "a"}))),
                Some(Payload::NoData),
                None,
            ]
        );

        // Second pass: the payload and the no-data answer come from
        // the cache, only the failure is requested again
        let before = request_count(&mock_server).await;
        fetcher
            .fetch_many(&urls, FetchOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(request_count(&mock_server).await, before + 1);
    }

    #[derive(Debug, Default)]
    struct CountingSink {
        completed: AtomicUsize,
    }

    impl ProgressSink for CountingSink {
        fn item_completed(&self, _url: &Url) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Requests an abort once a fixed number of items have settled
    #[derive(Debug)]
    struct AbortAfter {
        limit: usize,
        completed: AtomicUsize,
    }

    impl ProgressSink for AbortAfter {
        fn item_completed(&self, _url: &Url) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn abort_requested(&self) -> bool {
            self.completed.load(Ordering::SeqCst) >= self.limit
        }
    }

    #[tokio::test]
    async fn test_fetch_many_reports_each_completion() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("responses.db")).await.unwrap();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = quick_fetcher(cache);
        let urls = vec![
            website(&format!("{}/a", mock_server.uri())),
            website(&format!("{}/b", mock_server.uri())),
        ];
        // Settle one URL beforehand so it becomes a cache hit
        fetcher.fetch(&urls[0], FetchOptions::default()).await.unwrap();

        let sink = CountingSink::default();
        fetcher
            .fetch_many(&urls, FetchOptions::default(), Some(&sink))
            .await
            .unwrap();

        assert_eq!(
            sink.completed.load(Ordering::SeqCst),
            2,
            "cache hits and network answers both count as completions"
        );
    }

    #[tokio::test]
    async fn test_abort_stops_bulk_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = quick_fetcher(Cache::disabled());
        let urls: Vec<Url> = (0..5)
            .map(|i| website(&format!("{}/page/{i}", mock_server.uri())))
            .collect();

        let sink = AbortAfter {
            limit: 2,
            completed: AtomicUsize::new(0),
        };
        let result = fetcher
            .fetch_many(&urls, FetchOptions::default(), Some(&sink))
            .await;

        assert!(matches!(result, Err(ErrorKind::Aborted)));
        assert_eq!(
            sink.completed.load(Ordering::SeqCst),
            2,
            "no further completions after the abort was requested"
        );
    }

    #[tokio::test]
    async fn test_exclusive_fetches_serialize() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(sample_body())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let fetcher = Arc::new(quick_fetcher(Cache::disabled()));
        let url = website(&mock_server.uri());

        // Two exclusive fetches must not overlap
        let start = Instant::now();
        let first = {
            let fetcher = Arc::clone(&fetcher);
            let url = url.clone();
            tokio::spawn(async move { fetcher.fetch(&url, FetchOptions::exclusive()).await })
        };
        let second = {
            let fetcher = Arc::clone(&fetcher);
            let url = url.clone();
            tokio::spawn(async move { fetcher.fetch(&url, FetchOptions::exclusive()).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        let serialized = start.elapsed();
        assert!(
            serialized >= Duration::from_millis(950),
            "exclusive fetches overlapped: {serialized:?}"
        );

        // The same pair without exclusivity runs concurrently
        let start = Instant::now();
        let first = {
            let fetcher = Arc::clone(&fetcher);
            let url = url.clone();
            tokio::spawn(async move { fetcher.fetch(&url, FetchOptions::default()).await })
        };
        let second = {
            let fetcher = Arc::clone(&fetcher);
            let url = url.clone();
            tokio::spawn(async move { fetcher.fetch(&url, FetchOptions::default()).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        let pooled = start.elapsed();
        assert!(
            pooled < Duration::from_millis(950),
            "pooled fetches did not overlap: {pooled:?}"
        );
    }

    #[tokio::test]
    async fn test_rate_limits_bulk_admissions() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = FetcherBuilder::builder()
            .requests_per_window(2_usize)
            .rate_window(Duration::from_millis(500))
            .build()
            .fetcher()
            .unwrap();
        let urls: Vec<Url> = (0..6)
            .map(|i| website(&format!("{}/page/{i}", mock_server.uri())))
            .collect();

        let start = Instant::now();
        let results = fetcher
            .fetch_many(&urls, FetchOptions::default(), None)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(results.iter().all(|result| result.is_some()));
        // Six requests at two per window need at least two full windows
        assert!(
            elapsed >= Duration::from_millis(900),
            "rate limit was not applied; all requests admitted in {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_raising_rate_speeds_up_admissions() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&mock_server)
            .await;

        let fetcher = FetcherBuilder::builder()
            .requests_per_window(1_usize)
            .rate_window(Duration::from_secs(10))
            .build()
            .fetcher()
            .unwrap();

        let url = website(&mock_server.uri());
        fetcher.fetch(&url, FetchOptions::default()).await.unwrap();
        fetcher.set_rate(3).await.unwrap();

        // Two more admissions fit into the raised budget right away
        let start = Instant::now();
        fetcher
            .fetch(&url, FetchOptions::bypass_cache())
            .await
            .unwrap();
        fetcher
            .fetch(&url, FetchOptions::bypass_cache())
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
