//! Computed metrics: per-title totals and the global aggregate.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use regindex_runner::Runner;
use regindex_shared::{
    EventSink, GlobalMetrics, RegIndexError, Result, RunnerConfig, TitleMetrics, computed_keys,
};
use regindex_storage::Storage;

use crate::TitleError;

/// Aggregate of one metrics refresh, each list sorted by title number.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    pub refreshed: Vec<TitleMetrics>,
    /// Titles with no stored structures; their metrics are left as they were.
    pub skipped: Vec<u32>,
    pub errors: Vec<TitleError>,
}

/// Store a title's metrics under `title-metrics-<N>`.
pub async fn store_title_metrics(storage: &Storage, metrics: &TitleMetrics) -> Result<()> {
    let key = computed_keys::title_metrics(metrics.title_number);
    storage.upsert_computed_value(&key, &encode(&key, metrics)?).await
}

/// Load a title's stored metrics.
pub async fn load_title_metrics(storage: &Storage, title: u32) -> Result<Option<TitleMetrics>> {
    let key = computed_keys::title_metrics(title);
    storage
        .get_computed_value(&key)
        .await?
        .map(|value| decode(&key, value))
        .transpose()
}

/// Load the stored global aggregate.
pub async fn load_global_metrics(storage: &Storage) -> Result<Option<GlobalMetrics>> {
    let key = computed_keys::global_title_metrics();
    storage
        .get_computed_value(&key)
        .await?
        .map(|value| decode(&key, value))
        .transpose()
}

/// Recompute `title-metrics-<N>` from stored structures for every title.
#[instrument(skip_all, fields(runner = %config.log_prefix))]
pub async fn refresh_title_metrics(
    storage: Arc<Storage>,
    config: RunnerConfig,
    events: Arc<dyn EventSink>,
) -> Result<MetricsSummary> {
    let titles: Vec<u32> = storage
        .list_titles()
        .await?
        .into_iter()
        .map(|t| t.number)
        .collect();

    let runner = Runner::new(config).with_events(events);
    let result = runner
        .run(titles, move |title: u32, progress| {
            let storage = Arc::clone(&storage);
            async move {
                let refreshed = refresh_one(&storage, title)
                    .await
                    .map_err(|source| TitleError::new(title, source))?;
                match &refreshed {
                    Some(metrics) => progress.message(format!(
                        "Success: Title {title} ({} words)",
                        metrics.word_count
                    )),
                    None => progress.message(format!("Skipped: Title {title} has no structures")),
                }
                Ok::<_, TitleError>((title, refreshed))
            }
        })
        .await;

    let mut summary = MetricsSummary::default();
    for (title, refreshed) in result.results {
        match refreshed {
            Some(metrics) => summary.refreshed.push(metrics),
            None => summary.skipped.push(title),
        }
    }
    summary.errors = result.errors;
    summary.refreshed.sort_by_key(|m| m.title_number);
    summary.skipped.sort_unstable();
    summary.errors.sort_by_key(|e| e.title);

    info!(
        refreshed = summary.refreshed.len(),
        skipped = summary.skipped.len(),
        failed = summary.errors.len(),
        "title metrics refreshed"
    );
    Ok(summary)
}

async fn refresh_one(storage: &Storage, title: u32) -> Result<Option<TitleMetrics>> {
    let metrics = storage.structure_totals(title).await?;
    if metrics.node_count == 0 {
        return Ok(None);
    }
    store_title_metrics(storage, &metrics).await?;
    Ok(Some(metrics))
}

/// Sum every stored `title-metrics-<N>` into `global-title-metrics`.
#[instrument(skip_all)]
pub async fn compute_global_metrics(storage: &Storage) -> Result<GlobalMetrics> {
    let mut global = GlobalMetrics::default();
    for (key, value) in storage
        .list_computed_values(computed_keys::TITLE_METRICS_PREFIX)
        .await?
    {
        let metrics: TitleMetrics = decode(&key, value)?;
        global.titles += 1;
        global.word_count += metrics.word_count;
        global.section_count += metrics.section_count;
    }

    let key = computed_keys::global_title_metrics();
    storage
        .upsert_computed_value(&key, &encode(&key, &global)?)
        .await?;

    info!(
        titles = global.titles,
        words = global.word_count,
        sections = global.section_count,
        "global metrics computed"
    );
    Ok(global)
}

pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| RegIndexError::Storage(format!("encode computed value '{key}': {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| RegIndexError::Storage(format!("decode computed value '{key}': {e}")))
}
