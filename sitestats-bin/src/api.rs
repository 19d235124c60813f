//! Everything Similarweb specific: endpoint URLs and the fields we
//! pull out of its JSON payloads.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use sitestats_lib::Payload;
use url::Url;

/// A single month of visits for one domain, as written to the report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct VisitRow {
    pub(crate) domain: String,
    pub(crate) country: String,
    pub(crate) month: String,
    /// Raw visits figure as reported by the endpoint. Left as JSON so
    /// integers, floats and missing values survive unchanged.
    pub(crate) visits: Value,
}

/// URL builder for the Similarweb REST endpoints
#[derive(Debug)]
pub(crate) struct SimilarwebApi {
    host: Url,
    api_key: SecretString,
}

impl SimilarwebApi {
    pub(crate) fn new(host: &str, api_key: SecretString) -> Result<Self> {
        let host = Url::parse(host).with_context(|| format!("Invalid API host `{host}`"))?;
        Ok(Self { host, api_key })
    }

    /// Monthly visits for one domain and country over a date range.
    ///
    /// The domain is expected to be cleaned already; it goes into the
    /// URL path as-is.
    pub(crate) fn visits_url(
        &self,
        domain: &str,
        country: &str,
        start_date: &str,
        end_date: &str,
    ) -> Url {
        let mut url = self.host.clone();
        url.set_path(&format!(
            "/v1/website/{domain}/total-traffic-and-engagement/visits"
        ));
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("api_key", self.api_key.expose_secret())
            .append_pair("start_date", start_date)
            .append_pair("end_date", end_date)
            .append_pair("country", country)
            .append_pair("main_domain_only", "false")
            .append_pair("show_verified", "false")
            .append_pair("format", "json");
        url
    }

    /// The describe endpoint reports account-wide data availability.
    /// It takes a literal `xxx` website placeholder and no key.
    pub(crate) fn describe_url(&self) -> Url {
        let mut url = self.host.clone();
        url.set_path("/v1/website/xxx/traffic-and-engagement/describe");
        url.set_query(None);
        url
    }

    /// Account-wide quota figures
    pub(crate) fn capabilities_url(&self) -> Url {
        self.keyed_url("/capabilities")
    }

    /// Per-user quota figures
    pub(crate) fn user_capabilities_url(&self) -> Url {
        self.keyed_url("/user-capabilities")
    }

    /// The API key, masked for log output
    pub(crate) fn masked_key(&self) -> String {
        mask(self.api_key.expose_secret(), 6)
    }

    fn keyed_url(&self, path: &str) -> Url {
        let mut url = self.host.clone();
        url.set_path(path);
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("api_key", self.api_key.expose_secret());
        url
    }
}

/// Extract the first and last available month from a describe payload
pub(crate) fn available_range(payload: &Payload) -> Option<(String, String)> {
    let world = payload
        .as_json()?
        .pointer("/response/traffic_and_engagement/countries/world")?;
    let start = world.get("start_date")?.as_str()?.to_string();
    let end = world.get("end_date")?.as_str()?.to_string();
    Some((start, end))
}

/// Remaining API quota, preferring the per-user figure over the
/// account-wide one
pub(crate) fn remaining_hits(account: Option<&Payload>, user: Option<&Payload>) -> Option<u64> {
    let account_hits = account
        .and_then(Payload::as_json)
        .and_then(|data| data.get("remaining_hits"))
        .and_then(Value::as_u64);
    let user_hits = user
        .and_then(Payload::as_json)
        .and_then(|data| data.get("user_remaining"))
        .and_then(Value::as_u64);
    user_hits.or(account_hits)
}

/// Report rows from one visits payload. An empty vec means the
/// payload carried no usable visits data.
pub(crate) fn visit_rows(domain: &str, country: &str, payload: &Payload) -> Vec<VisitRow> {
    let Some(visits) = payload
        .as_json()
        .and_then(|data| data.get("visits"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    visits
        .iter()
        .map(|entry| VisitRow {
            domain: domain.to_string(),
            country: decode_country(country),
            month: entry
                .get("date")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            visits: entry.get("visits").cloned().unwrap_or(Value::Null),
        })
        .collect()
}

/// Human-readable name for a country code. The API uses `world` (or
/// the numeric `999`) for worldwide figures; other codes are passed
/// through uppercased.
pub(crate) fn decode_country(code: &str) -> String {
    if code.eq_ignore_ascii_case("world") || code == "999" {
        "World".to_string()
    } else {
        code.to_uppercase()
    }
}

/// Obfuscate a secret for log output, keeping only the last
/// `show_last` characters in clear. Secrets shorter than that are
/// shown whole.
pub(crate) fn mask(unmasked: &str, show_last: usize) -> String {
    let hidden = unmasked.chars().count().saturating_sub(show_last);
    unmasked
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}
