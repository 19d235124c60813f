//! `sitestats` is a library for fetching JSON payloads from rate-limited
//! web APIs with a persistent response cache.
//! "Hello world" example:
//! ```no_run
//! use sitestats_lib::Result;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let url = Url::parse("https://httpbin.org/json").unwrap();
//!   if let Some(payload) = sitestats_lib::fetch(&url).await? {
//!     println!("{payload:?}");
//!   }
//!   Ok(())
//! }
//! ```
//!
//! For more specific use-cases you can build a fetcher yourself,
//! using the `FetcherBuilder` which can be used to
//! configure the cache, the rate budget and the retry behavior:
//!
//! ```no_run
//! use sitestats_lib::{Cache, FetchOptions, FetcherBuilder, Result};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let fetcher = FetcherBuilder::builder()
//!       .cache(Cache::open("responses.db").await?)
//!       .requests_per_window(5_usize)
//!       .build()
//!       .fetcher()?;
//!   let url = Url::parse("https://httpbin.org/json").unwrap();
//!   let payload = fetcher.fetch(&url, FetchOptions::default()).await?;
//!   assert!(payload.is_some());
//!   fetcher.close().await?;
//!   Ok(())
//! }
//! ```
// #![deny(missing_docs)]

#[cfg(doctest)]
doc_comment::doctest!("../../README.md");

#[cfg(test)]
#[macro_use]
pub mod test_utils;

mod cache;
mod fetcher;
mod retry;
mod throttle;
mod transport;
mod types;

pub use cache::Cache;
pub use fetcher::fetch;
pub use fetcher::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CACHE_AGE_DAYS, DEFAULT_RATE_WINDOW_SECS,
    DEFAULT_REQUESTS_PER_WINDOW, DEFAULT_RETRY_WAIT_TIME_SECS, DEFAULT_SOURCE_TAG,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, Fetcher, FetcherBuilder,
};
pub use types::*;
