//! Import of bulk `title-<N>.xml` files from a local directory.
//!
//! Each file is hashed and compared with the stored copy; only new or changed
//! documents are written. Files are imported concurrently through the runner.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use regindex_runner::Runner;
use regindex_shared::{EventSink, RegIndexError, Result, RunnerConfig, TitleRecord};
use regindex_storage::Storage;

use crate::{TitleError, TitleFilter};

static TITLE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^title-(\d+)\.xml$").expect("valid regex"));

/// A bulk file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleFile {
    pub number: u32,
    pub path: PathBuf,
}

/// What happened to one imported file.
#[derive(Debug)]
pub enum ImportOutcome {
    /// New or changed content was stored.
    Imported(TitleRecord),
    /// Stored content already had the same hash.
    Unchanged(u32),
}

/// Aggregate of one import run, each list sorted by title number.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub imported: Vec<TitleRecord>,
    pub unchanged: Vec<u32>,
    pub errors: Vec<TitleError>,
}

/// List `title-<N>.xml` files in `dir` selected by `filter`, ordered by number.
pub fn discover_title_files(dir: &Path, filter: &TitleFilter) -> Result<Vec<TitleFile>> {
    let entries = std::fs::read_dir(dir).map_err(|e| RegIndexError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RegIndexError::io(dir, e))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(caps) = TITLE_FILE_RE.captures(name) else {
            continue;
        };
        let Ok(number) = caps[1].parse::<u32>() else {
            warn!(file = name, "title number out of range, skipping");
            continue;
        };

        let path = entry.path();
        if filter.matches(number) && path.is_file() {
            files.push(TitleFile { number, path });
        }
    }

    files.sort_by_key(|f| f.number);
    Ok(files)
}

/// Import every selected title file in `dir` into storage.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn import_titles(
    storage: Arc<Storage>,
    dir: &Path,
    filter: &TitleFilter,
    config: RunnerConfig,
    events: Arc<dyn EventSink>,
) -> Result<ImportSummary> {
    let files = discover_title_files(dir, filter)?;
    info!(files = files.len(), "discovered title files");

    let runner = Runner::new(config).with_events(events);
    let result = runner
        .run(files, move |file: TitleFile, progress| {
            let storage = Arc::clone(&storage);
            async move {
                let outcome = import_file(&storage, &file)
                    .await
                    .map_err(|source| TitleError::new(file.number, source))?;
                match &outcome {
                    ImportOutcome::Imported(record) => progress.message(format!(
                        "Success: Title {} ({} bytes)",
                        record.number, record.size_bytes
                    )),
                    ImportOutcome::Unchanged(number) => {
                        progress.message(format!("Unchanged: Title {number}"))
                    }
                }
                Ok::<_, TitleError>(outcome)
            }
        })
        .await;

    let mut summary = ImportSummary::default();
    for outcome in result.results {
        match outcome {
            ImportOutcome::Imported(record) => summary.imported.push(record),
            ImportOutcome::Unchanged(number) => summary.unchanged.push(number),
        }
    }
    summary.errors = result.errors;

    summary.imported.sort_by_key(|r| r.number);
    summary.unchanged.sort_unstable();
    summary.errors.sort_by_key(|e| e.title);

    info!(
        imported = summary.imported.len(),
        unchanged = summary.unchanged.len(),
        failed = summary.errors.len(),
        "import finished"
    );
    Ok(summary)
}

/// Read one file and store it unless the stored hash already matches.
pub async fn import_file(storage: &Storage, file: &TitleFile) -> Result<ImportOutcome> {
    let content = tokio::fs::read_to_string(&file.path)
        .await
        .map_err(|e| RegIndexError::io(&file.path, e))?;
    let hash = compute_hash(&content);

    if let Some(existing) = storage.get_title(file.number).await? {
        if existing.content_hash == hash {
            return Ok(ImportOutcome::Unchanged(file.number));
        }
    }

    let record = storage.upsert_title(file.number, &content, &hash).await?;
    Ok(ImportOutcome::Imported(record))
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
