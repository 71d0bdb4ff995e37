//! Change tracking between two dated title versions.
//!
//! Both versions of a title are flattened with [`StructureParser`] and their
//! word and section totals compared. The per-title results of a run are stored
//! together under `title-changes__<start>__<end>`.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument};

use regindex_parser::StructureParser;
use regindex_runner::Runner;
use regindex_shared::{
    EventSink, RegIndexError, Result, RunnerConfig, TitleChange, TitleMetrics, computed_keys,
};
use regindex_storage::Storage;

use crate::metrics::{decode, encode};
use crate::versions::format_version_date;
use crate::{TitleError, TitleFilter};

/// Aggregate of one change run, each list sorted by title number.
#[derive(Debug, Default)]
pub struct ChangeSummary {
    pub changes: Vec<TitleChange>,
    pub errors: Vec<TitleError>,
}

/// Compare every selected title that has a version on either date.
///
/// A title missing one of the two versions is reported as an error. The
/// successful comparisons are stored even when some titles fail.
#[instrument(skip_all, fields(start = %start, end = %end))]
pub async fn compute_changes(
    storage: Arc<Storage>,
    start: NaiveDate,
    end: NaiveDate,
    filter: &TitleFilter,
    config: RunnerConfig,
    events: Arc<dyn EventSink>,
) -> Result<ChangeSummary> {
    if start > end {
        return Err(RegIndexError::validation(format!(
            "start date {start} is after end date {end}"
        )));
    }
    let start = format_version_date(start);
    let end = format_version_date(end);

    let mut titles = BTreeSet::new();
    titles.extend(storage.list_version_titles(&start).await?);
    titles.extend(storage.list_version_titles(&end).await?);
    let titles: Vec<u32> = titles.into_iter().filter(|n| filter.matches(*n)).collect();
    info!(titles = titles.len(), "computing title changes");

    let runner = Runner::new(config).with_events(Arc::clone(&events));
    let worker_dates = (start.clone(), end.clone());
    let result = {
        let storage = Arc::clone(&storage);
        runner
            .run(titles, move |title: u32, progress| {
                let storage = Arc::clone(&storage);
                let events = Arc::clone(&events);
                let (start, end) = worker_dates.clone();
                async move {
                    let change = compare_title(&storage, title, &start, &end, events)
                        .await
                        .map_err(|source| TitleError::new(title, source))?;
                    progress.message(format!(
                        "Title {title}: {:+} words, {:+} sections",
                        change.word_count_change, change.section_count_change
                    ));
                    Ok::<_, TitleError>(change)
                }
            })
            .await
    };

    let mut summary = ChangeSummary {
        changes: result.results,
        errors: result.errors,
    };
    summary.changes.sort_by_key(|c| c.title_number);
    summary.errors.sort_by_key(|e| e.title);

    let key = computed_keys::title_changes(&start, &end);
    storage
        .upsert_computed_value(&key, &encode(&key, &summary.changes)?)
        .await?;

    info!(
        compared = summary.changes.len(),
        failed = summary.errors.len(),
        "title changes computed"
    );
    Ok(summary)
}

/// Compare the stored `start` and `end` versions of one title.
pub async fn compare_title(
    storage: &Storage,
    title: u32,
    start: &str,
    end: &str,
    events: Arc<dyn EventSink>,
) -> Result<TitleChange> {
    let before = version_metrics(storage, title, start, Arc::clone(&events)).await?;
    let after = version_metrics(storage, title, end, events).await?;
    Ok(TitleChange::between(start, &before, end, &after))
}

async fn version_metrics(
    storage: &Storage,
    title: u32,
    version_date: &str,
    events: Arc<dyn EventSink>,
) -> Result<TitleMetrics> {
    let content = storage
        .get_title_version_content(title, version_date)
        .await?
        .ok_or_else(|| {
            RegIndexError::validation(format!("title {title} has no version for {version_date}"))
        })?;

    let parsed = StructureParser::new(format!("title-{title}@{version_date}"))
        .with_events(events)
        .parse(&content)?;
    Ok(TitleMetrics::from_nodes(title, &parsed.nodes))
}

/// Load the stored changes for a date range.
pub async fn load_changes(
    storage: &Storage,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Option<Vec<TitleChange>>> {
    let key = computed_keys::title_changes(&format_version_date(start), &format_version_date(end));
    storage
        .get_computed_value(&key)
        .await?
        .map(|value| decode(&key, value))
        .transpose()
}

/// The `limit` titles with the largest absolute word change, largest first.
/// Ties keep their stored order.
pub fn top_changes(changes: &[TitleChange], limit: usize) -> Vec<TitleChange> {
    let mut sorted = changes.to_vec();
    sorted.sort_by_key(|c| std::cmp::Reverse(c.word_count_change.unsigned_abs()));
    sorted.truncate(limit);
    sorted
}

/// Plain-text report of every change and the totals across titles.
pub fn change_report(start: NaiveDate, end: NaiveDate, changes: &[TitleChange]) -> String {
    let mut report = String::new();
    let _ = writeln!(
        report,
        "Change report: {} to {}\n",
        format_version_date(start),
        format_version_date(end)
    );

    let mut total_words = 0i64;
    let mut total_sections = 0i64;
    for change in changes {
        total_words += change.word_count_change;
        total_sections += change.section_count_change;

        let _ = writeln!(report, "Title {}:", change.title_number);
        let _ = writeln!(
            report,
            "  Words: {} -> {} (change: {:+}, {:.2}%)",
            change.total_words_start,
            change.total_words_end,
            change.word_count_change,
            change.percent_word_change
        );
        let _ = writeln!(
            report,
            "  Sections: {} -> {} (change: {:+}, {:.2}%)\n",
            change.total_sections_start,
            change.total_sections_end,
            change.section_count_change,
            change.percent_section_change
        );
    }

    let _ = writeln!(report, "Total across all titles:");
    let _ = writeln!(report, "  Word change: {total_words:+}");
    let _ = writeln!(report, "  Section change: {total_sections:+}");
    report
}
