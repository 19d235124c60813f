use http::StatusCode;
use thiserror::Error;

/// Possible Errors when interacting with `sitestats_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Network error while handling request
    #[error("Network error while handling request")]
    NetworkRequest(#[from] reqwest::Error),
    /// Cannot read the body of the received response
    #[error("Error while reading the response body")]
    ReadResponseBody(#[source] reqwest::Error),
    /// The network client required for making requests cannot be created
    #[error("Error creating request client")]
    BuildRequestClient(#[source] reqwest::Error),
    /// The given header value could not be parsed
    #[error("Header could not be parsed")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The endpoint rejected the request with a structured error body
    #[error("API rejected the request ({}): {}",
        .code.as_deref().unwrap_or("unknown"),
        .message.as_deref().unwrap_or("no error message")
    )]
    Api {
        /// Machine-readable error code reported by the endpoint
        code: Option<String>,
        /// Human-readable error message reported by the endpoint
        message: Option<String>,
    },
    /// The endpoint answered with an unexpected status code
    #[error("Rejected status code: {0}")]
    RejectedStatusCode(StatusCode),
    /// The response body could not be decoded as JSON
    #[error("Response body is not valid JSON")]
    InvalidJsonBody(#[from] serde_json::Error),
    /// The response cache could not be read or written
    #[error("Response cache error")]
    Cache(#[from] sqlx::Error),
    /// The response cache was used after it was closed
    #[error("Response cache is closed")]
    CacheClosed,
    /// The fetcher was used after it was closed
    #[error("Fetcher is closed and accepts no further requests")]
    Closed,
    /// An abort was requested through the progress sink
    #[error("Aborted on request before all fetches completed")]
    Aborted,
    /// The given cache retention is not a valid duration
    #[error("Invalid max cache age: {0} days")]
    InvalidMaxAge(i64),
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NetworkRequest(e1), Self::NetworkRequest(e2))
            | (Self::ReadResponseBody(e1), Self::ReadResponseBody(e2))
            | (Self::BuildRequestClient(e1), Self::BuildRequestClient(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (
                Self::Api {
                    code: c1,
                    message: m1,
                },
                Self::Api {
                    code: c2,
                    message: m2,
                },
            ) => c1 == c2 && m1 == m2,
            (Self::RejectedStatusCode(s1), Self::RejectedStatusCode(s2)) => s1 == s2,
            (Self::InvalidHeader(_), Self::InvalidHeader(_)) => true,
            (Self::InvalidJsonBody(e1), Self::InvalidJsonBody(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (Self::Cache(e1), Self::Cache(e2)) => e1.to_string() == e2.to_string(),
            (Self::InvalidMaxAge(d1), Self::InvalidMaxAge(d2)) => d1 == d2,
            (Self::CacheClosed, Self::CacheClosed)
            | (Self::Closed, Self::Closed)
            | (Self::Aborted, Self::Aborted) => true,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}
