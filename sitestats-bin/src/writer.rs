use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use log::info;

use crate::api::VisitRow;

/// CSV report under construction.
///
/// Rows go into a `.temp` file first; only [`close`](Self::close)
/// moves the report to its timestamped final name. A crashed run
/// leaves nothing behind that looks like a finished report.
pub(crate) struct CsvReport {
    writer: csv::Writer<File>,
    final_path: PathBuf,
    temp_path: PathBuf,
}

impl CsvReport {
    /// Start a report named after `base_name` inside a results folder
    /// under `output_dir`
    pub(crate) fn create(output_dir: &Path, base_name: &str) -> Result<Self> {
        let results_folder = output_dir.join(format!("{base_name}-similarweb-results"));
        fs::create_dir_all(&results_folder).with_context(|| {
            format!(
                "Cannot create results folder `{}`",
                results_folder.display()
            )
        })?;

        let final_path = results_folder.join(format!("{base_name}-results.csv"));
        let temp_path = results_folder.join(format!("{base_name}-results.csv.temp"));

        let file = File::create(&temp_path)
            .with_context(|| format!("Cannot create report file `{}`", temp_path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

        // Header goes out up front; even a run without any results
        // leaves a readable file behind
        writer.write_record(["Domain", "Country", "Month", "Visits"])?;

        Ok(Self {
            writer,
            final_path,
            temp_path,
        })
    }

    pub(crate) fn add_rows(&mut self, rows: &[VisitRow]) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        Ok(())
    }

    /// Finish the report and move it to its final, timestamped name.
    /// Returns the path of the finished report.
    pub(crate) fn close(self) -> Result<PathBuf> {
        let Self {
            mut writer,
            final_path,
            temp_path,
        } = self;

        writer.flush()?;
        drop(writer);

        let target = unique_path(&final_path, &timestamp());
        fs::rename(&temp_path, &target)
            .with_context(|| format!("Cannot move report to `{}`", target.display()))?;

        info!("Results stored in file: {}", target.display());
        Ok(target)
    }
}

/// Insert a timestamp before the extension, appending a numeric
/// suffix if the name is already taken
fn unique_path(path: &Path, timestamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let extension = path
        .extension()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();

    let mut candidate = path.with_file_name(format!("{stem}-{timestamp}.{extension}"));
    let mut n = 0;
    while candidate.exists() {
        n += 1;
        candidate = path.with_file_name(format!("{stem}-{timestamp}-{n}.{extension}"));
    }
    candidate
}

/// Current time as `YYYYmmdd-HHMMSS` (UTC)
fn timestamp() -> String {
    let now = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
    let digits: String = now.chars().filter(char::is_ascii_digit).collect();
    format!("{}-{}", &digits[..8], &digits[8..])
}
