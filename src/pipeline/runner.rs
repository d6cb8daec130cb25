use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::batch::BatchRun;
use super::job::{Job, JobOp, RunContext};
use super::outcome::{ItemReport, Outcome};
use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::fetcher::Fetcher;
use crate::item::{SyncItem, SyncItemCollection};
use crate::notify::{FailureAlert, LogNotifier, Notifier};
use crate::observability::metrics;
use crate::parser::Parser;
use crate::queue::{JobQueue, QueueFactory, SqliteQueueFactory};
use crate::registry::{PluginContext, Registry};
use crate::resource::{Resource, ResourceDefinition};
use crate::state::{ProcessCounts, ProcessKind, RunState, SqliteState, StateStore};
use crate::storage::{
    Database, EntityProvider, EntityStore, ResolvedEntity, SaveStatus, SqliteEntityStore,
    SqliteSyncStorage, StaleQuery, StaleRow, SyncFilter, SyncStorage,
};

/// Shared collaborators injected into every runner.
#[derive(Clone)]
pub struct Services {
    pub sync: Arc<dyn SyncStorage>,
    pub entities: Arc<dyn EntityStore>,
    pub state: Arc<dyn StateStore>,
    pub queues: Arc<dyn QueueFactory>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Everything backed by one SQLite database, alerts going to the log.
    pub fn sqlite(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            sync: Arc::new(SqliteSyncStorage::new(db.clone())),
            entities: Arc::new(SqliteEntityStore::new(db.clone())),
            state: Arc::new(SqliteState::new(db.clone())),
            queues: Arc::new(SqliteQueueFactory::new(db, clock.clone())),
            notifier: Arc::new(LogNotifier),
            clock,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Alert recipient when a run ends with failures.
    pub email_fail: Option<String>,
    pub max_debug: usize,
    /// Seconds a claimed job stays invisible to other workers.
    pub lease_seconds: i64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            email_fail: None,
            max_debug: 100,
            lease_seconds: 3600,
        }
    }
}

/// Whether `do_process` runs from the queue or for a direct caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Job,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Queued { items: usize, has_next_page: bool },
    Ignored,
    Skipped(String),
    Failed(String),
}

impl BuildOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, BuildOutcome::Queued { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugItem {
    pub item: SyncItem,
    pub outcome: Outcome,
    pub message: Option<String>,
}

/// First page as the resource would see it, without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct DebugPreview {
    pub fetched: usize,
    pub has_next_page: bool,
    pub items: Vec<DebugItem>,
}

/// Drives one resource through fetch, queue, process and cleanup.
pub struct ResourceRunner {
    definition: ResourceDefinition,
    fetcher: Box<dyn Fetcher>,
    parser: Box<dyn Parser>,
    resource: Box<dyn Resource>,
    provider: EntityProvider,
    sync: Arc<dyn SyncStorage>,
    entities: Arc<dyn EntityStore>,
    queue: Arc<dyn JobQueue>,
    state: RunState,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
}

impl ResourceRunner {
    /// Instantiates the definition's plugins through the registry.
    pub fn new(
        definition: ResourceDefinition,
        registry: &Registry,
        plugins: &PluginContext,
        services: &Services,
        settings: RunnerSettings,
    ) -> Result<Self> {
        let fetcher = registry.fetcher(&definition.fetcher, plugins)?;
        let parser = registry.parser(&definition.parser, plugins)?;
        let resource = registry.resource(&definition.resource, plugins)?;
        Ok(Self::from_parts(
            definition, fetcher, parser, resource, services, settings,
        ))
    }

    pub fn from_parts(
        definition: ResourceDefinition,
        fetcher: Box<dyn Fetcher>,
        parser: Box<dyn Parser>,
        resource: Box<dyn Resource>,
        services: &Services,
        settings: RunnerSettings,
    ) -> Self {
        let queue = services.queues.queue(&definition.queue_name());
        let state = RunState::new(services.state.clone(), definition.id.clone());
        let provider = EntityProvider::new(
            services.sync.clone(),
            services.entities.clone(),
            services.clock.clone(),
        );
        Self {
            definition,
            fetcher,
            parser,
            resource,
            provider,
            sync: services.sync.clone(),
            entities: services.entities.clone(),
            queue,
            state,
            notifier: services.notifier.clone(),
            clock: services.clock.clone(),
            settings,
        }
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn id(&self) -> &str {
        &self.definition.id
    }

    fn label(&self) -> &str {
        self.definition.label()
    }

    fn group(&self) -> String {
        self.resource
            .group()
            .unwrap_or_else(|| self.definition.group().to_string())
    }

    fn run_on_empty(&self) -> bool {
        self.definition.run_on_empty || self.resource.run_on_empty()
    }

    /// Starts a run: optionally purges leftovers, stamps the start time and queues the first page.
    pub async fn build(&self, context: RunContext) -> Result<BuildOutcome> {
        info!(resource = %self.id(), run_id = %context.run_id, "{}: Start", self.label());
        if self.definition.cleanup {
            // Stale jobs from an aborted run would clean with the wrong start time.
            self.queue.delete_queue().await?;
        }
        self.state.set_start_time(self.clock.now()).await?;
        self.build_jobs(&context).await
    }

    async fn build_jobs(&self, context: &RunContext) -> Result<BuildOutcome> {
        debug!("{}: Build Data", self.label());
        let items = match self.fetch_data(None).await {
            Ok(items) => items,
            Err(e) => return Ok(self.surface_build_error(e)),
        };
        let count = items.count();
        let has_next_page = items.has_next_page();

        self.enqueue(JobOp::Start {
            context: context.clone(),
        })
        .await?;
        if items.has_items() || self.run_on_empty() {
            self.queue_data(&items, context).await?;
            if has_next_page {
                self.queue_page(items, context).await?;
            } else {
                self.queue_end(context).await?;
            }
        } else {
            self.queue_end(context).await?;
        }
        Ok(BuildOutcome::Queued {
            items: count,
            has_next_page,
        })
    }

    fn surface_build_error(&self, error: SyncError) -> BuildOutcome {
        match error {
            SyncError::Ignore(_) => BuildOutcome::Ignored,
            SyncError::Skip(message) => {
                warn!(resource = %self.id(), "{}: Build Skip: {}", self.label(), message);
                BuildOutcome::Skipped(message)
            }
            SyncError::Fail(message) => {
                warn!(resource = %self.id(), "{}: Build Fail: {}", self.label(), message);
                BuildOutcome::Failed(message)
            }
            other => {
                error!(resource = %self.id(), unclassified = true, "{}: Build Error: {}", self.label(), other);
                BuildOutcome::Failed(other.to_string())
            }
        }
    }

    async fn enqueue(&self, op: JobOp) -> Result<()> {
        let name = op.name();
        let job = Job::new(self.id(), op).to_value()?;
        self.queue.create_item(&job).await?;
        debug!("{}: Add Job: Queue {}", self.label(), name);
        metrics::queue::job_enqueued(self.id());
        Ok(())
    }

    async fn queue_data(&self, items: &SyncItemCollection, context: &RunContext) -> Result<()> {
        for item in items {
            self.enqueue(JobOp::Process {
                item: item.clone(),
                context: context.clone(),
            })
            .await?;
        }
        Ok(())
    }

    async fn queue_page(&self, items: SyncItemCollection, context: &RunContext) -> Result<()> {
        self.enqueue(JobOp::Page {
            items,
            context: context.clone(),
        })
        .await
    }

    /// Cleanup goes first when enabled; it queues `end` itself.
    async fn queue_end(&self, context: &RunContext) -> Result<()> {
        let context = context.clone();
        if self.definition.cleanup {
            self.enqueue(JobOp::Cleanup { context }).await
        } else {
            self.enqueue(JobOp::End { context }).await
        }
    }

    /// Claims jobs until the queue is empty. Returns how many ran.
    pub async fn run_jobs(&self) -> Result<usize> {
        debug!("{}: Run Jobs", self.label());
        let mut executed = 0;
        while self.run_job().await? {
            executed += 1;
        }
        Ok(executed)
    }

    /// Runs a single job. The job is deleted whatever its outcome; false means nothing was claimable.
    pub async fn run_job(&self) -> Result<bool> {
        let Some(claimed) = self.queue.claim_item(self.settings.lease_seconds).await? else {
            return Ok(false);
        };
        let result = match Job::from_value(claimed.data.clone()) {
            Ok(job) if job.plugin_id != self.id() => Err(SyncError::Config(format!(
                "job for '{}' found in {}",
                job.plugin_id,
                self.queue.name()
            ))),
            Ok(job) => {
                let op = job.op.name();
                let span = info_span!("job", resource = %self.id(), op);
                let result = self.dispatch(job.op).instrument(span).await;
                metrics::queue::job_executed(self.id(), op);
                result
            }
            Err(e) => Err(e),
        };
        self.queue.delete_item(&claimed).await?;
        if let Err(e) = result {
            error!(resource = %self.id(), job = claimed.item_id, "{}: Job Error: {}", self.label(), e);
        }
        Ok(true)
    }

    async fn dispatch(&self, op: JobOp) -> Result<()> {
        match op {
            JobOp::Start { context } => self.do_start(&context).await,
            JobOp::Process { item, context } => self
                .do_process(item, &context, RunMode::Job)
                .await
                .map(|_| ()),
            JobOp::Page { items, context } => self.do_page(items, &context).await,
            JobOp::Cleanup { context } => self.do_cleanup(&context).await,
            JobOp::Clean { sync, context } => self.do_clean(&sync, &context).await,
            JobOp::End { context } => self.do_end(&context).await,
        }
    }

    /// Builds a batch run and returns a stepper over its jobs.
    pub async fn run_as_batch(&self) -> Result<BatchRun<'_>> {
        let outcome = self.build(RunContext::batch()).await?;
        BatchRun::start(self, outcome).await
    }

    pub async fn do_start(&self, context: &RunContext) -> Result<()> {
        info!(resource = %self.id(), run_id = %context.run_id, "{}: Run Job: Start", self.label());
        self.state.reset_page().await?;
        self.state.reset_process_counts().await?;
        let start = match self.state.start_time().await? {
            Some(start) => start,
            None => self.clock.now(),
        };
        self.state.set_last_run_start(start).await
    }

    /// Processes one item. Classified failures are counted and logged; only direct callers get them back.
    pub async fn do_process(
        &self,
        mut item: SyncItem,
        context: &RunContext,
        mode: RunMode,
    ) -> Result<ItemReport> {
        let mut id = None;
        let mut resolved = None;
        let result = self.process_steps(&mut item, &mut id, &mut resolved).await;

        match result {
            Ok(status) => {
                self.state.increment_process(ProcessKind::Success).await?;
                metrics::items::processed(self.id(), Outcome::Success.as_str());
                let record = resolved.map(|r| r.record);
                if let Some(record) = &record {
                    info!(
                        resource = %self.id(),
                        run_id = %context.run_id,
                        entity_type = %record.entity_type,
                        entity_id = record.entity_id,
                        "{}: {}: {} -> {}",
                        self.label(),
                        status.as_str(),
                        id.as_deref().unwrap_or_default(),
                        record.label()
                    );
                }
                Ok(ItemReport {
                    id,
                    outcome: Outcome::Success,
                    status: Some(status),
                    record,
                    message: None,
                    unclassified: false,
                })
            }
            Err(error) => {
                if let Some(existing) = resolved.as_ref().filter(|r| !r.record.is_new()) {
                    if let Err(e) = self.provider.refresh_link(existing).await {
                        warn!("{}: could not refresh link for {}: {}", self.label(), existing.link.id, e);
                    }
                }
                let outcome = Outcome::of(&error);
                if let Some(kind) = outcome.counter() {
                    self.state.increment_process(kind).await?;
                }
                metrics::items::processed(self.id(), outcome.as_str());

                let shown = id
                    .clone()
                    .or_else(|| item.key().map(str::to_string))
                    .unwrap_or_default();
                match &error {
                    SyncError::Ignore(_) => {}
                    SyncError::Skip(message) => {
                        warn!(resource = %self.id(), "{}: {}: Process Item Skip: {}", self.label(), shown, message)
                    }
                    SyncError::Fail(message) => {
                        error!(resource = %self.id(), "{}: {}: Process Item Fail: {}", self.label(), shown, message)
                    }
                    other => error!(
                        resource = %self.id(),
                        unclassified = true,
                        "{}: {}: Process Item Error: {}",
                        self.label(),
                        shown,
                        other
                    ),
                }

                if mode == RunMode::Direct {
                    return Err(error);
                }
                Ok(ItemReport {
                    id,
                    outcome,
                    status: None,
                    record: resolved.map(|r| r.record),
                    message: Some(error.to_string()),
                    unclassified: !error.is_classified(),
                })
            }
        }
    }

    async fn process_steps(
        &self,
        item: &mut SyncItem,
        id_slot: &mut Option<String>,
        slot: &mut Option<ResolvedEntity>,
    ) -> Result<SaveStatus> {
        self.resource.prepare_item(item).await?;
        let id = self.resource.id(item)?;
        *id_slot = Some(id.clone());

        let bundle = self
            .resource
            .bundle(item)
            .unwrap_or_else(|| self.definition.bundle().to_string());
        let values = self.resource.initial_values(item);
        let resolved = self
            .provider
            .get_or_new(&id, &self.definition.entity_type, &bundle, &values, &self.group())
            .await?;
        let resolved = slot.insert(resolved);

        if !self.resource.access_entity(&resolved.record, &resolved.link) {
            return Err(SyncError::skip("Entity was prevented from being synced."));
        }
        self.resource.process_item(&mut resolved.record, item).await?;
        self.resource.save_item(&mut resolved.record, item).await?;
        self.provider.save(resolved).await
    }

    pub async fn do_page(&self, items: SyncItemCollection, context: &RunContext) -> Result<()> {
        let page = self.state.increment_page().await?;
        let counts = self.state.process_counts().await?;
        info!(
            resource = %self.id(),
            run_id = %context.run_id,
            "{}: Fetching [Page: {} | Success: {} | Skipped: {} | Failed: {}]",
            self.label(),
            page,
            counts.success,
            counts.skip,
            counts.fail
        );
        match self.fetch_data(Some(&items)).await {
            Ok(next) if next.has_items() => {
                self.queue_data(&next, context).await?;
                if next.has_next_page() {
                    self.queue_page(next, context).await
                } else {
                    self.queue_end(context).await
                }
            }
            Ok(_) => self.queue_end(context).await,
            Err(SyncError::Ignore(_)) => Ok(()),
            Err(SyncError::Skip(message)) => {
                warn!(resource = %self.id(), "{}: Page {} Skip: {}", self.label(), page, message);
                Ok(())
            }
            Err(SyncError::Fail(message)) => {
                error!(resource = %self.id(), "{}: Page {} Fail: {}", self.label(), page, message);
                Ok(())
            }
            Err(other) => {
                error!(resource = %self.id(), unclassified = true, "{}: Page {} Error: {}", self.label(), page, other);
                Ok(())
            }
        }
    }

    /// Queues a `clean` job for every identity of the group not touched since the run started.
    pub async fn do_cleanup(&self, context: &RunContext) -> Result<()> {
        debug!("{}: Run Job: Cleanup", self.label());
        let changed_before = self.state.start_time().await?.unwrap_or(0);
        let mut query = StaleQuery {
            group: self.group(),
            changed_before,
            entity_type: Some(self.definition.entity_type.clone()),
            include_locked: false,
        };
        self.resource.cleanup_filter(&mut query);

        let stale = match self.sync.stale(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    resource = %self.id(),
                    "[Sync Cleanup: {}] FAIL: {}:{}. Error: {}",
                    self.label(),
                    self.definition.entity_type,
                    self.definition.bundle(),
                    e
                );
                return Ok(());
            }
        };
        debug!("{}: {} stale identities", self.label(), stale.len());
        for sync in stale {
            self.enqueue(JobOp::Clean {
                sync,
                context: context.clone(),
            })
            .await?;
        }
        self.enqueue(JobOp::End {
            context: context.clone(),
        })
        .await
    }

    pub async fn do_clean(&self, row: &StaleRow, context: &RunContext) -> Result<()> {
        info!(
            resource = %self.id(),
            run_id = %context.run_id,
            id = %row.id,
            "{}: Clean: {} -> {}:{}",
            self.label(),
            row.id,
            row.entity_type,
            row.entity_id
        );
        match self.clean_steps(row).await {
            Ok(deleted) => {
                if deleted {
                    metrics::items::cleaned(self.id());
                }
                let remaining = self.queue.number_of_items().await?;
                if remaining % 50 == 1 {
                    let counts = self.state.process_counts().await?;
                    info!(
                        "{}: Cleaning [Remaining: {} | Success: {} | Skipped: {} | Failed: {}]",
                        self.label(),
                        remaining,
                        counts.success,
                        counts.skip,
                        counts.fail
                    );
                }
            }
            Err(SyncError::Ignore(_)) => {}
            Err(SyncError::Skip(message)) => {
                warn!(resource = %self.id(), "{}: Clean Item Skip: {}", self.label(), message)
            }
            Err(SyncError::Fail(message)) => {
                error!(resource = %self.id(), "{}: Clean Item Fail: {}", self.label(), message)
            }
            Err(other) => error!(
                resource = %self.id(),
                unclassified = true,
                "{}: Clean Item Error: {}",
                self.label(),
                other
            ),
        }
        Ok(())
    }

    async fn clean_steps(&self, row: &StaleRow) -> Result<bool> {
        let resolved = self
            .provider
            .load_entity(&row.id, &row.entity_type, &row.group)
            .await?
            .ok_or_else(|| SyncError::fail("Entity could not be loaded."))?;
        if !self.resource.access_entity(&resolved.record, &resolved.link) {
            return Err(SyncError::skip("Entity was prevented from being cleaned."));
        }
        let deleted = self
            .resource
            .clean_item(self.entities.as_ref(), &resolved.record, row)
            .await?;
        if deleted {
            self.sync
                .delete_by_properties(&SyncFilter::identity(&row.id, &row.entity_type))
                .await?;
        }
        Ok(deleted)
    }

    pub async fn do_end(&self, context: &RunContext) -> Result<()> {
        debug!("{}: Run Job: End", self.label());
        let counts = self.state.process_counts().await?;
        self.state.reset_page().await?;
        self.state.reset_process_counts().await?;
        info!(
            resource = %self.id(),
            run_id = %context.run_id,
            success = counts.success,
            skip = counts.skip,
            fail = counts.fail,
            "{}: Completed [Success: {}, Skip: {}, Fail: {}]",
            self.label(),
            counts.success,
            counts.skip,
            counts.fail
        );
        self.state.set_last_run_end(self.clock.now()).await?;
        metrics::queue::run_completed(self.id());
        self.alert_failures(counts).await;
        Ok(())
    }

    async fn alert_failures(&self, counts: ProcessCounts) {
        if counts.fail == 0 {
            return;
        }
        let Some(recipient) = self.settings.email_fail.as_deref().filter(|r| !r.is_empty()) else {
            return;
        };
        let alert = FailureAlert::new(recipient, self.id(), self.label(), counts);
        if let Err(e) = self.notifier.notify(&alert).await {
            warn!("{}: failure alert not delivered: {}", self.label(), e);
        }
    }

    /// Fetches page 1 and processes every item right away, overlaying `extend` on each.
    /// Stops at the first item that does not succeed and returns what was saved so far.
    pub async fn manual_process(&self, extend: Option<&SyncItem>) -> Result<Vec<ItemReport>> {
        let mut results = Vec::new();
        let context = RunContext::new();
        let outcome: Result<()> = async {
            let items = self.fetch_data(None).await?;
            for mut item in items {
                if let Some(extend) = extend {
                    item.extend_from(extend);
                }
                results.push(self.do_process(item, &context, RunMode::Direct).await?);
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) | Err(SyncError::Ignore(_)) => {}
            Err(SyncError::Skip(message)) | Err(SyncError::Fail(message)) => {
                warn!(resource = %self.id(), "{}: {}", self.label(), message)
            }
            Err(other) => error!(resource = %self.id(), "{}: {}", self.label(), other),
        }
        Ok(results)
    }

    pub async fn manual_process_multiple(&self, extends: &[SyncItem]) -> Result<Vec<ItemReport>> {
        let mut results = Vec::new();
        for extend in extends {
            results.extend(self.manual_process(Some(extend)).await?);
        }
        Ok(results)
    }

    /// Processes a single item outside the queue, returning any failure to the caller.
    pub async fn process_item_now(&self, item: SyncItem) -> Result<ItemReport> {
        self.do_process(item, &RunContext::new(), RunMode::Direct)
            .await
    }

    /// Fetch, parse, wrap and let the resource alter the page.
    pub async fn fetch_data(
        &self,
        previous: Option<&SyncItemCollection>,
    ) -> Result<SyncItemCollection> {
        let page = self.state.page().await?;
        let empty = SyncItemCollection::default();
        let started = Instant::now();

        let payload = match self.fetcher.fetch(page, previous.unwrap_or(&empty)).await {
            Ok(payload) => payload,
            Err(e) => {
                metrics::fetch::fetch_error(self.id());
                return Err(e);
            }
        };
        let mut items = SyncItemCollection::new(self.parser.parse(payload)?);
        items.set_has_next_page(self.fetcher.has_next_page(page, &items));
        metrics::fetch::page_fetched(self.id(), items.count(), started.elapsed().as_secs_f64());
        debug!(
            "{}: page {} parsed {} item(s), has_next_page={}",
            self.label(),
            page,
            items.count(),
            items.has_next_page()
        );

        self.resource.alter_items(&mut items);
        for item in items.iter_mut() {
            self.resource.alter_item(item);
        }
        Ok(items)
    }

    /// Fetches the first page and runs `prepare_item` on up to `max_debug` items.
    pub async fn debug(&self) -> Result<DebugPreview> {
        let mut items = self.fetch_data(None).await?;
        let fetched = items.count();
        if items.count() > self.settings.max_debug {
            items.slice(0, self.settings.max_debug);
        }
        let has_next_page = items.has_next_page();

        let mut preview = Vec::with_capacity(items.count());
        for mut item in items {
            let (outcome, message) = match self.resource.prepare_item(&mut item).await {
                Ok(()) => (Outcome::Success, None),
                Err(e) => (Outcome::of(&e), Some(e.to_string())),
            };
            preview.push(DebugItem {
                item,
                outcome,
                message,
            });
        }
        Ok(DebugPreview {
            fetched,
            has_next_page,
            items: preview,
        })
    }

    pub async fn reset_last_run(&self) -> Result<()> {
        info!(resource = %self.id(), "{}: Reset last run", self.label());
        self.state.reset_last_run().await
    }

    pub async fn last_run_start(&self) -> Result<Option<i64>> {
        self.state.last_run_start().await
    }

    pub async fn last_run_end(&self) -> Result<Option<i64>> {
        self.state.last_run_end().await
    }

    /// Continues an interrupted run by making every claimed job claimable again.
    pub async fn resume(&self) -> Result<usize> {
        let released = self.queue.release_all().await?;
        info!(resource = %self.id(), "{}: released {} job(s)", self.label(), released);
        Ok(released)
    }

    pub async fn set_locked(&self, id: &str, locked: bool) -> Result<bool> {
        self.sync
            .set_locked(id, &self.definition.entity_type, locked)
            .await
    }
}
