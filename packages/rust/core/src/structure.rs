//! Structure driver: stored title → parsed, linked, persisted structures.
//!
//! For every selected title the driver loads the stored document, flattens it
//! with [`StructureParser`], resolves parent links, replaces the title's
//! structure rows, and records the title's metrics as a computed value.

use std::sync::Arc;

use tracing::{info, instrument};

use regindex_parser::{StructureParser, link};
use regindex_runner::Runner;
use regindex_shared::{EventSink, RegIndexError, Result, RunnerConfig, TitleMetrics};
use regindex_storage::Storage;

use crate::metrics::store_title_metrics;
use crate::{TitleError, TitleFilter};

/// Aggregate of one structure run, each list sorted by title number.
#[derive(Debug, Default)]
pub struct StructureSummary {
    pub processed: Vec<TitleMetrics>,
    pub errors: Vec<TitleError>,
}

impl StructureSummary {
    /// Total words across every processed title.
    pub fn total_words(&self) -> usize {
        self.processed.iter().map(|m| m.word_count).sum()
    }
}

/// Parse and persist the structures of every stored title selected by `filter`.
#[instrument(skip_all, fields(runner = %config.log_prefix))]
pub async fn process_titles(
    storage: Arc<Storage>,
    config: RunnerConfig,
    filter: &TitleFilter,
    events: Arc<dyn EventSink>,
) -> Result<StructureSummary> {
    let titles: Vec<u32> = storage
        .list_titles()
        .await?
        .into_iter()
        .map(|t| t.number)
        .filter(|n| filter.matches(*n))
        .collect();
    info!(titles = titles.len(), "processing title structures");

    let runner = Runner::new(config).with_events(Arc::clone(&events));
    let result = runner
        .run(titles, move |title: u32, progress| {
            let storage = Arc::clone(&storage);
            let events = Arc::clone(&events);
            async move {
                let metrics = process_title(&storage, title, events)
                    .await
                    .map_err(|source| TitleError::new(title, source))?;
                progress.message(format!(
                    "Success: Title {title} ({} nodes, {} words)",
                    metrics.node_count, metrics.word_count
                ));
                Ok::<_, TitleError>(metrics)
            }
        })
        .await;

    let mut summary = StructureSummary {
        processed: result.results,
        errors: result.errors,
    };
    summary.processed.sort_by_key(|m| m.title_number);
    summary.errors.sort_by_key(|e| e.title);

    info!(
        processed = summary.processed.len(),
        failed = summary.errors.len(),
        words = summary.total_words(),
        "structure processing finished"
    );
    Ok(summary)
}

/// Parse one stored title, replace its structures, and store its metrics.
///
/// Existing structures are left untouched when the document fails to parse.
pub async fn process_title(
    storage: &Storage,
    title: u32,
    events: Arc<dyn EventSink>,
) -> Result<TitleMetrics> {
    let content = storage.get_title_content(title).await?.ok_or_else(|| {
        RegIndexError::validation(format!("title {title} has not been imported"))
    })?;

    let parsed = StructureParser::new(format!("title-{title}"))
        .with_events(events)
        .parse(&content)?;
    let nodes = link(parsed.nodes);

    storage.replace_structures(title, &nodes).await?;

    let metrics = TitleMetrics::from_nodes(title, &nodes);
    store_title_metrics(storage, &metrics).await?;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regindex_shared::{NodeKind, SilentSink};
    use uuid::Uuid;

    use crate::metrics::load_title_metrics;

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("regindex_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn runner_config() -> RunnerConfig {
        RunnerConfig::new(2, "Structure Parser").expect("valid config")
    }

    fn fixture() -> String {
        std::fs::read_to_string("../../../fixtures/xml/title-99.xml").expect("read fixture")
    }

    #[tokio::test]
    async fn fixture_title_is_flattened_and_linked() {
        let storage = test_storage().await;
        storage.upsert_title(99, &fixture(), "h").await.unwrap();

        let metrics = process_title(&storage, 99, Arc::new(SilentSink))
            .await
            .expect("process title");

        let records = storage.list_structures(99).await.unwrap();
        assert_eq!(records.len(), metrics.node_count);
        assert_eq!(records[0].node.kind, NodeKind::Title);
        assert!(records[0].parent_id.is_none());

        let section = storage
            .find_structure_by_path(99, "99/I/A/1/99.1")
            .await
            .unwrap()
            .expect("section stored");
        let part = storage
            .find_structure_by_path(99, "99/I/A/1")
            .await
            .unwrap()
            .expect("part stored");
        assert_eq!(section.parent_id.as_deref(), Some(part.id.as_str()));

        let stored = load_title_metrics(&storage, 99).await.unwrap().expect("metrics stored");
        assert_eq!(stored, metrics);
        assert_eq!(metrics.section_count, 3);
    }

    #[tokio::test]
    async fn malformed_title_is_isolated() {
        let storage = test_storage().await;
        storage
            .upsert_title(1, r#"<DIV1 N="1"><P>one two</P></DIV1>"#, "h1")
            .await
            .unwrap();
        storage
            .upsert_title(2, r#"<DIV1 N="2"><P>broken"#, "h2")
            .await
            .unwrap();

        let summary = process_titles(
            Arc::clone(&storage),
            runner_config(),
            &TitleFilter::all(),
            Arc::new(SilentSink),
        )
        .await
        .expect("process titles");

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.processed[0].title_number, 1);
        assert_eq!(summary.total_words(), 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].title, 2);
        assert!(matches!(summary.errors[0].source, RegIndexError::Parse { .. }));
        assert!(storage.list_structures(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filter_limits_processed_titles() {
        let storage = test_storage().await;
        for n in [1u32, 2, 3] {
            let xml = format!(r#"<DIV1 N="{n}"><P>body</P></DIV1>"#);
            storage.upsert_title(n, &xml, "h").await.unwrap();
        }

        let summary = process_titles(
            Arc::clone(&storage),
            runner_config(),
            &TitleFilter::from_list(&[3]),
            Arc::new(SilentSink),
        )
        .await
        .unwrap();

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.processed[0].title_number, 3);
        assert!(storage.list_structures(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reprocessing_replaces_previous_structures() {
        let storage = test_storage().await;
        storage
            .upsert_title(4, r#"<DIV1 N="4"><DIV5 N="1"/><DIV5 N="2"/></DIV1>"#, "a")
            .await
            .unwrap();
        process_title(&storage, 4, Arc::new(SilentSink)).await.unwrap();

        storage
            .upsert_title(4, r#"<DIV1 N="4"><DIV5 N="1"/></DIV1>"#, "b")
            .await
            .unwrap();
        let metrics = process_title(&storage, 4, Arc::new(SilentSink)).await.unwrap();

        assert_eq!(metrics.node_count, 2);
        assert_eq!(storage.list_structures(4).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_title_is_a_validation_error() {
        let storage = test_storage().await;
        let err = process_title(&storage, 42, Arc::new(SilentSink))
            .await
            .unwrap_err();
        assert!(matches!(err, RegIndexError::Validation { .. }));
    }
}
