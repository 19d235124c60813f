use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::{LevelFilter, info, warn};
use sitestats_lib::{ErrorKind, FetchOptions};

use crate::ExitCode;
use crate::api::{self, VisitRow};
use crate::commands::CommandParams;
use crate::dates;
use crate::options::Config;
use crate::progress::Progress;
use crate::writer::CsvReport;

/// Domains handed to the fetcher in one go
const DOMAINS_PER_CHUNK: usize = 20;

/// Fetch visits for all domains and write them to a CSV report
pub(crate) async fn fetch(params: &CommandParams) -> Result<ExitCode> {
    let countries = countries(&params.cfg)?;
    let planned = (params.domains.len() * countries.len()) as u64;

    check_quota(params, planned).await;

    let (start_date, end_date) = date_range(params).await?;
    info!(
        "Fetching visits for {} domains from {start_date} to {end_date}",
        params.domains.len()
    );

    let (output_dir, base_name) = report_location(&params.cfg);
    let mut report = CsvReport::create(&output_dir, &base_name)?;

    // The bar garbles debug output, so verbose runs go without it
    let hide_bar =
        params.cfg.no_progress || params.cfg.verbose.log_level_filter() >= LevelFilter::Debug;
    let progress = Progress::new(hide_bar, planned, "Loading data");

    let abort_handle = progress.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stopping after the current request...");
            abort_handle.abort();
        }
    });

    let mut aborted = false;
    'chunks: for chunk in params.domains.chunks(DOMAINS_PER_CHUNK) {
        let mut urls = Vec::with_capacity(chunk.len() * countries.len());
        let mut meta = Vec::with_capacity(chunk.len() * countries.len());
        for domain in chunk {
            for country in &countries {
                urls.push(
                    params
                        .api
                        .visits_url(domain, country, &start_date, &end_date),
                );
                meta.push((domain.as_str(), country.as_str()));
            }
        }

        let payloads = match params
            .fetcher
            .fetch_many(&urls, FetchOptions::default(), Some(&progress))
            .await
        {
            Ok(payloads) => payloads,
            Err(ErrorKind::Aborted) => {
                warn!("Aborted; keeping the results fetched so far");
                aborted = true;
                break 'chunks;
            }
            Err(e) => return Err(e.into()),
        };

        for ((domain, country), payload) in meta.into_iter().zip(payloads) {
            if let Some(payload) = payload {
                let rows: Vec<VisitRow> = api::visit_rows(domain, country, &payload);
                report.add_rows(&rows)?;
            }
        }
    }

    progress.finish(if aborted { "Aborted" } else { "Done" });
    report.close()?;

    Ok(if aborted {
        ExitCode::Aborted
    } else {
        ExitCode::Success
    })
}

/// Compare the planned number of requests against the remaining API
/// quota.
///
/// Purely advisory. A failing quota lookup must not stop the run, so
/// every outcome short of success turns into a warning.
async fn check_quota(params: &CommandParams, planned: u64) {
    let CommandParams { fetcher, api, .. } = params;

    let account = match fetcher
        .fetch(&api.capabilities_url(), FetchOptions::bypass_cache())
        .await
    {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Capabilities request failed: {e}");
            None
        }
    };
    let user = match fetcher
        .fetch(&api.user_capabilities_url(), FetchOptions::bypass_cache())
        .await
    {
        Ok(payload) => payload,
        Err(e) => {
            warn!("User capabilities request failed: {e}");
            None
        }
    };

    match api::remaining_hits(account.as_ref(), user.as_ref()) {
        Some(remaining) => {
            info!(
                "API key {} has {remaining} hits remaining",
                api.masked_key()
            );
            if planned > remaining {
                warn!(
                    "This run needs up to {planned} hits but only {remaining} are left; \
                     some domains will come up empty"
                );
            }
        }
        None => warn!("Could not load capabilities for API key {}", api.masked_key()),
    }
}

/// The months to fetch, as an inclusive `YYYY-MM` range.
///
/// An explicit range on the command line wins. Otherwise the describe
/// endpoint tells us which months the account can see and the last
/// `last_months` of those are used.
async fn date_range(params: &CommandParams) -> Result<(String, String)> {
    let CommandParams {
        fetcher, api, cfg, ..
    } = params;

    if let (Some(start), Some(end)) = (&cfg.start_date, &cfg.end_date) {
        // Validated here so typos fail before any quota is spent
        dates::months_between(start, end)?;
        return Ok((start.clone(), end.clone()));
    }

    let payload = fetcher
        .fetch(&api.describe_url(), FetchOptions::bypass_cache())
        .await?;
    let (_, available_end) = payload
        .as_ref()
        .and_then(api::available_range)
        .context("Cannot determine the available date range")?;

    let months = dates::months_before(&available_end, cfg.last_months)?;
    let (Some(first), Some(last)) = (months.first(), months.last()) else {
        bail!("No months available before {available_end}");
    };
    Ok((first.clone(), last.clone()))
}

/// Country codes to fetch, normalized to what the API expects
fn countries(cfg: &Config) -> Result<Vec<String>> {
    let countries: Vec<String> = cfg
        .countries
        .iter()
        .map(|country| country.trim().to_lowercase())
        .filter(|country| !country.is_empty())
        .collect();

    if countries.is_empty() {
        bail!("No countries given");
    }
    Ok(countries)
}

/// Where the report goes and what it is called.
///
/// Reports are named after the domains file and stored next to it,
/// unless an output directory is given.
fn report_location(cfg: &Config) -> (PathBuf, String) {
    let base_name = cfg
        .domains_file
        .as_deref()
        .and_then(Path::file_stem)
        .map_or_else(|| "sitestats".to_string(), |stem| {
            stem.to_string_lossy().into_owned()
        });

    let output_dir = match (&cfg.output_dir, &cfg.domains_file) {
        (Some(dir), _) => dir.clone(),
        (None, Some(file)) => file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        (None, None) => PathBuf::from("."),
    };

    (output_dir, base_name)
}
