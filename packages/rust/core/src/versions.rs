//! Import of dated title snapshots.
//!
//! A snapshot directory holds one subdirectory per version date, each laid
//! out like the current bulk directory: `<root>/<YYYY-MM-DD>/title-<N>.xml`.
//! Versions are stored beside the current titles and never replace them.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument};

use regindex_runner::Runner;
use regindex_shared::{EventSink, RegIndexError, Result, RunnerConfig, TitleVersionRecord};
use regindex_storage::Storage;

use crate::import::{TitleFile, compute_hash, discover_title_files};
use crate::{TitleError, TitleFilter};

/// Format of version dates in directory names, storage, and computed keys.
pub const VERSION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` version date.
pub fn parse_version_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), VERSION_DATE_FORMAT).map_err(|e| {
        RegIndexError::validation(format!("invalid version date '{raw}' (expected YYYY-MM-DD): {e}"))
    })
}

pub fn format_version_date(date: NaiveDate) -> String {
    date.format(VERSION_DATE_FORMAT).to_string()
}

#[derive(Debug)]
pub enum VersionOutcome {
    Imported(TitleVersionRecord),
    Unchanged(u32),
}

/// Aggregate of one snapshot import, each list sorted by title number.
#[derive(Debug, Default)]
pub struct VersionImportSummary {
    pub version_date: String,
    pub imported: Vec<TitleVersionRecord>,
    pub unchanged: Vec<u32>,
    pub errors: Vec<TitleError>,
}

/// Import every selected `title-<N>.xml` under `<root>/<version_date>/`.
#[instrument(skip_all, fields(root = %root.display(), date = %version_date))]
pub async fn import_versions(
    storage: Arc<Storage>,
    root: &Path,
    version_date: NaiveDate,
    filter: &TitleFilter,
    config: RunnerConfig,
    events: Arc<dyn EventSink>,
) -> Result<VersionImportSummary> {
    let date = format_version_date(version_date);
    let files = discover_title_files(&root.join(&date), filter)?;
    info!(files = files.len(), "discovered title versions");

    let runner = Runner::new(config).with_events(events);
    let worker_date = date.clone();
    let result = runner
        .run(files, move |file: TitleFile, progress| {
            let storage = Arc::clone(&storage);
            let date = worker_date.clone();
            async move {
                let outcome = import_version_file(&storage, &date, &file)
                    .await
                    .map_err(|source| TitleError::new(file.number, source))?;
                match &outcome {
                    VersionOutcome::Imported(record) => progress.message(format!(
                        "Success: Title {} ({} bytes)",
                        record.title_number, record.size_bytes
                    )),
                    VersionOutcome::Unchanged(number) => {
                        progress.message(format!("Unchanged: Title {number}"))
                    }
                }
                Ok::<_, TitleError>(outcome)
            }
        })
        .await;

    let mut summary = VersionImportSummary {
        version_date: date,
        ..VersionImportSummary::default()
    };
    for outcome in result.results {
        match outcome {
            VersionOutcome::Imported(record) => summary.imported.push(record),
            VersionOutcome::Unchanged(number) => summary.unchanged.push(number),
        }
    }
    summary.errors = result.errors;

    summary.imported.sort_by_key(|r| r.title_number);
    summary.unchanged.sort_unstable();
    summary.errors.sort_by_key(|e| e.title);

    info!(
        imported = summary.imported.len(),
        unchanged = summary.unchanged.len(),
        failed = summary.errors.len(),
        "version import finished"
    );
    Ok(summary)
}

/// Store one snapshot file unless the same version already has its hash.
pub async fn import_version_file(
    storage: &Storage,
    version_date: &str,
    file: &TitleFile,
) -> Result<VersionOutcome> {
    let content = tokio::fs::read_to_string(&file.path)
        .await
        .map_err(|e| RegIndexError::io(&file.path, e))?;
    let hash = compute_hash(&content);

    if let Some(existing) = storage.get_title_version(file.number, version_date).await? {
        if existing.content_hash == hash {
            return Ok(VersionOutcome::Unchanged(file.number));
        }
    }

    let record = storage
        .upsert_title_version(file.number, version_date, &content, &hash)
        .await?;
    Ok(VersionOutcome::Imported(record))
}
