use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use log::{info, warn};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;

/// Matches anything that plausibly is a domain or URL
static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}(?:/.*)?")
        .expect("Valid domain pattern")
});

/// Everything except unreserved characters gets percent-encoded when a
/// domain is placed into a URL path
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Strip a domain of everything the API doesn't accept: surrounding
/// whitespace, the scheme, a leading `www.` and any path. The result
/// is encoded for use inside a URL path.
pub(crate) fn clean_domain(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let domain = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let domain = domain.strip_prefix("www.").unwrap_or(domain);
    let domain = domain.split('/').next().unwrap_or_default();

    utf8_percent_encode(domain, ENCODE_SET).to_string()
}

/// Clean a list of domains given on the command line, skipping entries
/// that don't look like domains
pub(crate) fn clean_all(raw: &[String]) -> Vec<String> {
    raw.iter()
        .filter_map(|entry| {
            if DOMAIN.is_match(entry) {
                Some(clean_domain(entry))
            } else {
                warn!("Skipping `{entry}`: not a valid domain");
                None
            }
        })
        .collect()
}

/// Read domains from a file.
///
/// The file is treated as CSV and every cell that looks like a domain
/// is used; everything else is skipped, so stray labels or dates in
/// the file do no harm. Lines starting with `#` are comments.
pub(crate) fn load_domains_file(path: &Path) -> Result<Vec<String>> {
    info!("Loading domains from file: {}", path.display());

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Cannot read domains from `{}`", path.display()))?;

    let mut domains = Vec::new();
    for record in reader.records() {
        let record = record?;
        for cell in record.iter() {
            if !cell.is_empty() && DOMAIN.is_match(cell) {
                domains.push(clean_domain(cell));
            }
        }
    }

    info!("Loaded {} domains", domains.len());
    Ok(domains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clean_domain_strips_scheme_www_and_path() {
        assert_eq!(clean_domain("https://www.Example.com/some/path"), "example.com");
        assert_eq!(clean_domain("http://example.com"), "example.com");
        assert_eq!(clean_domain("  EXAMPLE.ORG  "), "example.org");
        assert_eq!(clean_domain("sub.domain.co.uk"), "sub.domain.co.uk");
    }

    #[test]
    fn test_clean_domain_percent_encodes_unsafe_characters() {
        assert_eq!(clean_domain("héllo.com"), "h%C3%A9llo.com");
    }

    #[test]
    fn test_clean_all_skips_invalid_entries() {
        let raw = vec![
            "example.com".to_string(),
            "not a domain".to_string(),
            "https://www.wrapped.net/about".to_string(),
        ];
        assert_eq!(clean_all(&raw), vec!["example.com", "wrapped.net"]);
    }

    #[test]
    fn test_load_domains_file_picks_domain_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("domains.csv");
        std::fs::write(
            &path,
            "# our portfolio\n\
             example.com,also-valid.org\n\
             not a domain\n\
             https://www.wrapped.net/about\n",
        )
        .unwrap();

        let domains = load_domains_file(&path).unwrap();
        assert_eq!(domains, vec!["example.com", "also-valid.org", "wrapped.net"]);
    }

    #[test]
    fn test_load_domains_file_missing_file() {
        let result = load_domains_file(Path::new("no-such-file.csv"));
        assert!(result.is_err());
    }
}
