use url::Url;

/// Helper method to convert a string into a URL
/// Note: This panics on error, so it should only be used for testing
pub(crate) fn website(url: &str) -> Url {
    Url::parse(url).expect("Expected valid website URL")
}

#[macro_export]
/// Creates a mock web server which responds with the given status and
/// optional response template adjustments to every GET request
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}
