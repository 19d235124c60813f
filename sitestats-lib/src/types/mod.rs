#![allow(unreachable_pub)]

mod error;
mod options;
mod outcome;
mod payload;
mod progress;

pub use error::ErrorKind;
pub use options::FetchOptions;
pub use outcome::HttpOutcome;
pub use payload::Payload;
pub use progress::ProgressSink;

/// The sitestats `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
