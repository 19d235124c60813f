use std::fmt::{self, Display};

use url::Url;

/// Query parameter carrying the API credential.
/// It must never end up in cache keys or on disk.
pub(crate) const CREDENTIAL_PARAM: &str = "api_key";

/// Canonical cache identity of a request URL.
///
/// Two URLs that differ only in query parameter order, fragment, or
/// the credential parameter address the same resource and must share
/// one cache entry. The key is the URL with the fragment removed, the
/// credential parameter stripped, and the remaining query pairs sorted
/// by name and value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RequestKey(String);

impl RequestKey {
    /// Derive the cache key for a request URL
    pub(crate) fn new(url: &Url) -> Self {
        let mut canonical = url.clone();
        canonical.set_fragment(None);

        let mut pairs: Vec<(String, String)> = canonical
            .query_pairs()
            .filter(|(name, _)| name != CREDENTIAL_PARAM)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            canonical.set_query(None);
        } else {
            canonical.query_pairs_mut().clear().extend_pairs(pairs);
        }

        Self(canonical.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn key(url: &str) -> String {
        RequestKey::new(&Url::parse(url).unwrap()).to_string()
    }

    #[rstest]
    #[case(
        "https://api.example.com/v1/visits?api_key=s3cret&country=de",
        "https://api.example.com/v1/visits?country=de"
    )]
    #[case(
        "https://api.example.com/v1/visits#section",
        "https://api.example.com/v1/visits"
    )]
    #[case(
        "https://api.example.com/v1/visits?api_key=only",
        "https://api.example.com/v1/visits"
    )]
    #[case(
        "https://api.example.com:8080/v1/website/example.org/visits",
        "https://api.example.com:8080/v1/website/example.org/visits"
    )]
    fn test_canonical_form(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(key(input), expected);
    }

    #[rstest]
    // Query parameter order must not matter, credential values neither
    #[case(
        "https://api.example.com/v1/visits?format=json&country=de&api_key=x",
        "https://api.example.com/v1/visits?country=de&api_key=y&format=json"
    )]
    // Repeated parameters sort by value
    #[case(
        "https://api.example.com/?country=us&country=de",
        "https://api.example.com/?country=de&country=us"
    )]
    fn test_equivalent_urls_share_a_key(#[case] left: &str, #[case] right: &str) {
        assert_eq!(key(left), key(right));
    }
}
