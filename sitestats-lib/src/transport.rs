//! HTTP transport.
//!
//! Sends a single GET request and classifies the complete exchange
//! into an [`HttpOutcome`]. Retry loops, caching and rate limiting all
//! live above this layer; the transport's only job is to talk to the
//! endpoint once and say how it went.

use std::time::Duration;

use http::StatusCode;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use log::{debug, error};
use serde_json::Value;
use url::Url;

use crate::retry::RetryExt;
use crate::{ErrorKind, HttpOutcome, Payload, Result};

/// Identifying header attached to every outbound request.
/// Endpoints use it to attribute traffic to the calling application.
const SOURCE_HEADER: &str = "x-sw-source";

#[derive(Debug, Clone)]
pub(crate) struct Transport {
    client: reqwest::Client,
}

impl Transport {
    /// Build the underlying HTTP client.
    ///
    /// TLS verification uses the platform trust store; response
    /// bodies are transparently decompressed.
    pub(crate) fn new(user_agent: &str, source_tag: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(SOURCE_HEADER),
            HeaderValue::from_str(source_tag)?,
        );

        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(ErrorKind::BuildRequestClient)?;

        Ok(Self { client })
    }

    /// Perform one GET request and classify the exchange.
    ///
    /// Never fails outright; every way the exchange can go wrong is
    /// expressed in the returned outcome.
    pub(crate) async fn fetch(&self, url: &Url) -> HttpOutcome {
        debug!("Sending GET request to {url}");
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(ErrorKind::NetworkRequest(e)),
        };

        let status = response.status();
        if status.should_retry() {
            return HttpOutcome::Retriable(ErrorKind::RejectedStatusCode(status));
        }
        if status == StatusCode::BAD_REQUEST && is_json(&response) {
            return HttpOutcome::Fatal(api_error(response).await);
        }
        if status == StatusCode::NOT_FOUND {
            // A not-found answer is data ("nothing there") and gets
            // cached like any other payload
            return HttpOutcome::Success(Payload::NoData);
        }
        if status.is_client_error() {
            return HttpOutcome::Fatal(ErrorKind::RejectedStatusCode(status));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return classify_error(ErrorKind::ReadResponseBody(e)),
        };
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => HttpOutcome::Success(value.into()),
            Err(e) => {
                error!("Non-JSON response for {url} (status {status})");
                HttpOutcome::Fatal(ErrorKind::InvalidJsonBody(e))
            }
        }
    }
}

/// Wrap an error in the outcome matching its retry classification
fn classify_error(error: ErrorKind) -> HttpOutcome {
    if error.should_retry() {
        HttpOutcome::Retriable(error)
    } else {
        HttpOutcome::Fatal(error)
    }
}

fn is_json(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// Extract the structured error a rejected request carries in its body
async fn api_error(response: reqwest::Response) -> ErrorKind {
    let meta = match response.json::<Value>().await {
        Ok(body) => body.get("meta").cloned().unwrap_or(Value::Null),
        Err(_) => Value::Null,
    };
    ErrorKind::Api {
        code: error_field(meta.get("error_code")),
        message: error_field(meta.get("error_message")),
    }
}

/// Render an error body field, which may be a string, a number, or
/// missing entirely
fn error_field(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}
