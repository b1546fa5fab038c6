//! One extraction run across several resources
//!
//! Every resource is a step: its pages are pulled through a [`Pipeline`] into
//! a fresh [`Decomposer`] tree. The customer tree is shared by all steps since
//! customers arrive both from their own endpoint and embedded in orders.

use crate::config::RunConfig;
use crate::decompose::{Decomposer, ResultCollector, SharedWriters, WriteContext};
use crate::etl::{Extractor, Loader, Pipeline, RecordTransformer};
use crate::shopify::{DateWindow, Resource, entities, format_timestamp, split_windows};
use crate::storage::{
    ExtractorState, OutputLayout, Record, SchemaRetention, StateStore, TableArtifact,
    WriterOptions, write_manifests,
};

use chrono::{DateTime, Utc};
use eyre::{Report, Result};
use owo_colors::OwoColorize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Loads records into a decomposer tree, lending it the shared writers
pub struct EntityLoader<'a> {
    decomposer: &'a mut Decomposer,
    shared: Option<&'a mut Decomposer>,
    ctx: &'a WriteContext,
    user_values: Record,
}

impl<'a> EntityLoader<'a> {
    pub fn new(decomposer: &'a mut Decomposer, ctx: &'a WriteContext) -> Self {
        Self {
            decomposer,
            shared: None,
            user_values: ctx.user_values(),
            ctx,
        }
    }

    pub fn with_shared(mut self, shared: &'a mut Decomposer) -> Self {
        self.shared = Some(shared);
        self
    }
}

impl Loader for EntityLoader<'_> {
    type Item = Record;

    fn load(&mut self, items: Vec<Self::Item>) -> Result<usize> {
        let mut shared = match self.shared.as_deref_mut() {
            Some(decomposer) => SharedWriters::none().with(decomposer),
            None => SharedWriters::none(),
        };

        let mut count = 0;
        for record in items {
            if record.is_empty() {
                continue;
            }
            self.decomposer
                .write(record, &self.user_values, self.ctx, &mut shared)?;
            count += 1;
        }
        Ok(count)
    }
}

/// What a finished run produced
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Tables produced, in step order; the shared customer tables come last
    pub artifacts: Vec<TableArtifact>,
    /// Resources whose step completed, with their record counts
    pub succeeded: Vec<(Resource, usize)>,
    /// Resources whose step failed
    pub failed: Vec<(Resource, Report)>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn records(&self) -> usize {
        self.succeeded.iter().map(|(_, count)| count).sum()
    }
}

/// Step sequencing and the step-failure policy of a run
pub struct ExtractionRun {
    options: WriterOptions,
    ctx: WriteContext,
    customers: Decomposer,
    continue_on_error: bool,
    summary: RunSummary,
}

impl ExtractionRun {
    pub fn new(options: WriterOptions, ctx: WriteContext) -> Self {
        let customers = Decomposer::new(&entities::CUSTOMER, &options);
        Self {
            options,
            ctx,
            customers,
            continue_on_error: false,
            summary: RunSummary::default(),
        }
    }

    /// Keep going after a failed step instead of aborting the run
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Extract one resource to completion
    ///
    /// On failure the step's own tables are discarded. The error is returned
    /// unless the run continues on errors, in which case it is logged and
    /// recorded in the summary.
    pub async fn run_step<E>(&mut self, resource: Resource, extractor: E) -> Result<()>
    where
        E: Extractor<Item = Value>,
    {
        log::info!("Extracting {}", resource.cyan());
        match self.extract(resource, extractor).await {
            Ok(count) => {
                log::info!("✓ Extracted {} {} record(s)", count, resource);
                self.summary.succeeded.push((resource, count));
                Ok(())
            }
            Err(e) if self.continue_on_error => {
                log::error!("Extraction of {} failed: {:?}", resource, e);
                self.summary.failed.push((resource, e));
                Ok(())
            }
            Err(e) => Err(e.wrap_err(format!("Extraction of {} failed", resource))),
        }
    }

    async fn extract<E>(&mut self, resource: Resource, extractor: E) -> Result<usize>
    where
        E: Extractor<Item = Value>,
    {
        // customers go straight into the shared tree, which is closed at the end
        if resource == Resource::Customers {
            let loader = EntityLoader::new(&mut self.customers, &self.ctx);
            return Pipeline::new(extractor, RecordTransformer, loader)
                .run()
                .await;
        }

        let mut decomposer = Decomposer::new(resource.schema(), &self.options);
        let result = {
            let loader = EntityLoader::new(&mut decomposer, &self.ctx).with_shared(&mut self.customers);
            Pipeline::new(extractor, RecordTransformer, loader)
                .run()
                .await
        };
        let result = result.and_then(|count| decomposer.close().map(|_| count));

        match result {
            Ok(count) => {
                self.summary.artifacts.extend(decomposer.collect_results()?);
                Ok(count)
            }
            Err(e) => {
                if let Err(discard) = decomposer.discard() {
                    log::warn!("Failed to discard partial {} output: {}", resource, discard);
                }
                Err(e)
            }
        }
    }

    /// Close the shared writers and hand back what the run produced
    pub fn finish(mut self) -> Result<RunSummary> {
        self.customers.close()?;
        self.summary
            .artifacts
            .extend(self.customers.collect_results()?);
        Ok(self.summary)
    }
}

/// Customers come first so their full records claim the shared customer
/// table before orders embed partial copies of them.
fn step_order(endpoints: &[Resource]) -> Vec<Resource> {
    let (mut steps, rest): (Vec<_>, Vec<_>) =
        endpoints.iter().partition(|&&resource| resource == Resource::Customers);
    steps.extend(rest);
    steps
}

/// Run every configured resource, then write manifests and the next state
///
/// `extractor_for` builds the extractor of a resource from its query windows.
/// Cursors only advance for resources whose step succeeded. A run with failed
/// steps keeps the known columns of every table and still ends in an error.
pub async fn execute<S, F, E>(
    config: &RunConfig,
    store: &S,
    now: DateTime<Utc>,
    mut extractor_for: F,
) -> Result<RunSummary>
where
    S: StateStore,
    F: FnMut(Resource, Vec<DateWindow>) -> E,
    E: Extractor<Item = Value>,
{
    let state = store.read()?;

    let mut options = WriterOptions::new(&config.output_dir)
        .with_layout(OutputLayout::from_slice_rows(config.slice_rows))
        .with_fix_headers(config.fix_headers)
        .with_known_columns(state.table_columns.clone());
    if let Some(bucket) = &config.destination_bucket {
        options = options.with_destination_bucket(bucket);
    }
    let ctx = match config.extraction_time {
        true => WriteContext::new(now.to_rfc3339()),
        false => WriteContext::without_extraction_time(),
    };

    let mut run = ExtractionRun::new(options, ctx).with_continue_on_error(config.continue_on_error);
    let mut bounds = BTreeMap::new();
    for resource in step_order(&config.endpoints) {
        let (since, until) = config.period(now, state.cursor(resource.as_str()))?;
        let windows = split_windows(since, until, config.window())?;
        log::info!(
            "{} from {} to {} in {} window(s)",
            resource,
            format_timestamp(since).bright_black(),
            format_timestamp(until).bright_black(),
            windows.len()
        );
        run.run_step(resource, extractor_for(resource, windows)).await?;
        bounds.insert(resource, until);
    }
    let summary = run.finish()?;

    let manifests = write_manifests(&summary.artifacts, config.incremental_output)?;
    log::debug!("Wrote {} manifest(s)", manifests.len());

    let retention = match summary.is_success() {
        true => config.schema_retention,
        false => SchemaRetention::Retain,
    };
    let next = next_state(&state, &summary, &bounds, retention);
    store.write(&next)?;

    if !summary.is_success() {
        let failed: Vec<&str> = summary.failed.iter().map(|(r, _)| r.as_str()).collect();
        eyre::bail!("Extraction failed for: {}", failed.join(", "));
    }
    Ok(summary)
}

fn next_state(
    state: &ExtractorState,
    summary: &RunSummary,
    bounds: &BTreeMap<Resource, DateTime<Utc>>,
    retention: SchemaRetention,
) -> ExtractorState {
    let mut next = state.reconcile(&summary.artifacts, retention);
    for (resource, _) in &summary.succeeded {
        if let Some(until) = bounds.get(resource) {
            next.set_cursor(resource.as_str(), format_timestamp(*until));
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct Pages(Vec<Result<Vec<Value>>>);

    impl Extractor for Pages {
        type Item = Value;
        async fn next_batch(&mut self) -> Result<Option<Vec<Self::Item>>> {
            if self.0.is_empty() {
                return Ok(None);
            }
            self.0.remove(0).map(Some)
        }
    }

    fn options(temp: &TempDir) -> WriterOptions {
        WriterOptions::new(temp.path())
    }

    #[tokio::test]
    async fn test_orders_share_customer_writer() {
        let temp = TempDir::new().unwrap();
        let mut run = ExtractionRun::new(options(&temp), WriteContext::without_extraction_time());

        run.run_step(
            Resource::Customers,
            Pages(vec![Ok(vec![json!({"id": 5, "email": "x@y.z"})])]),
        )
        .await
        .unwrap();
        run.run_step(
            Resource::Orders,
            Pages(vec![Ok(vec![
                json!({"id": 1, "customer": {"id": 5, "email": "x@y.z"}}),
                json!({"id": 2, "customer": {"id": 6}}),
            ])]),
        )
        .await
        .unwrap();

        let summary = run.finish().unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.records(), 3);
        let names: Vec<&str> = summary
            .artifacts
            .iter()
            .map(|a| a.table_def.name.as_str())
            .collect();
        assert_eq!(names, vec!["order", "customer"]);

        let content = std::fs::read_to_string(temp.path().join("customer.csv")).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_failed_step_is_discarded() {
        let temp = TempDir::new().unwrap();
        let mut run = ExtractionRun::new(options(&temp), WriteContext::without_extraction_time())
            .with_continue_on_error(true);

        run.run_step(
            Resource::Products,
            Pages(vec![
                Ok(vec![json!({"id": 1, "title": "Hat"})]),
                Err(eyre::eyre!("connection reset")),
            ]),
        )
        .await
        .unwrap();
        run.run_step(Resource::Events, Pages(vec![Ok(vec![json!({"id": 9})])]))
            .await
            .unwrap();

        let summary = run.finish().unwrap();
        assert!(!summary.is_success());
        assert_eq!(summary.failed[0].0, Resource::Products);
        assert!(!temp.path().join("product.csv").exists());
        assert!(temp.path().join("event.csv").exists());
    }

    #[tokio::test]
    async fn test_failed_step_aborts_by_default() {
        let temp = TempDir::new().unwrap();
        let mut run = ExtractionRun::new(options(&temp), WriteContext::without_extraction_time());

        let err = run
            .run_step(Resource::Events, Pages(vec![Ok(vec![json!({"no_id": true})])]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Extraction of events failed"));
        assert!(!temp.path().join("event.csv").exists());
    }

    #[test]
    fn test_customers_step_runs_first() {
        let steps = step_order(&[Resource::Orders, Resource::Products, Resource::Customers]);
        assert_eq!(
            steps,
            vec![Resource::Customers, Resource::Orders, Resource::Products]
        );
        assert_eq!(
            step_order(&[Resource::Events, Resource::Orders]),
            vec![Resource::Events, Resource::Orders]
        );
    }

    #[test]
    fn test_cursors_only_advance_on_success() {
        let mut state = ExtractorState::new();
        state.set_cursor("orders", "2024-01-01T00:00:00Z");
        state.set_cursor("products", "2024-01-01T00:00:00Z");

        let until = DateTime::parse_from_rfc3339("2024-02-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let bounds = BTreeMap::from([(Resource::Orders, until), (Resource::Products, until)]);
        let summary = RunSummary {
            artifacts: Vec::new(),
            succeeded: vec![(Resource::Orders, 3)],
            failed: vec![(Resource::Products, eyre::eyre!("boom"))],
        };

        let next = next_state(&state, &summary, &bounds, SchemaRetention::Retain);
        assert_eq!(next.cursor("orders"), Some("2024-02-01T00:00:00Z"));
        assert_eq!(next.cursor("products"), Some("2024-01-01T00:00:00Z"));
    }
}
