#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use pullsync::clock::ManualClock;
use pullsync::error::{Result, SyncError};
use pullsync::fetcher::{Fetcher, Paging, Payload};
use pullsync::item::{SyncItem, SyncItemCollection};
use pullsync::notify::{FailureAlert, Notifier};
use pullsync::parser::passthrough::NoneParser;
use pullsync::pipeline::{ResourceRunner, RunnerSettings, Services};
use pullsync::resource::mapped::MappedResource;
use pullsync::resource::{Resource, ResourceDefinition};
use pullsync::state::ProcessCounts;
use pullsync::storage::{Database, Record};

/// One scripted page: items, or an error raised by the fetch.
#[derive(Clone)]
pub enum Page {
    Items(Vec<Value>),
    Ignore,
    Fail(String),
    Broken(String),
}

/// Serves pages from a script the test can rewrite between runs.
#[derive(Clone, Default)]
pub struct Script {
    pages: Arc<Mutex<Vec<Page>>>,
    calls: Arc<Mutex<Vec<u32>>>,
}

impl Script {
    pub fn new(pages: Vec<Page>) -> Self {
        let script = Self::default();
        script.set(pages);
        script
    }

    pub fn single(items: Vec<Value>) -> Self {
        Self::new(vec![Page::Items(items)])
    }

    pub fn set(&self, pages: Vec<Page>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct ScriptedFetcher {
    script: Script,
    paging: Paging,
}

impl ScriptedFetcher {
    pub fn new(script: Script, paging: Paging) -> Self {
        Self { script, paging }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    fn paging(&self) -> &Paging {
        &self.paging
    }

    async fn fetch(&self, page: u32, _previous: &SyncItemCollection) -> Result<Payload> {
        self.script.calls.lock().unwrap().push(page);
        let scripted = self
            .script
            .pages
            .lock()
            .unwrap()
            .get(page as usize - 1)
            .cloned();
        match scripted {
            Some(Page::Items(items)) => Ok(Payload::Records(items)),
            Some(Page::Ignore) => Err(SyncError::ignore("nothing new")),
            Some(Page::Fail(message)) => Err(SyncError::fail(message)),
            Some(Page::Broken(message)) => Err(SyncError::Api { message }),
            None => Ok(Payload::Empty),
        }
    }
}

/// Copies `name` onto the record. Items flagged `"fail": true` fail; items flagged
/// `"broken": true` raise an unclassified error.
pub struct PeopleResource;

#[async_trait]
impl Resource for PeopleResource {
    fn id(&self, item: &SyncItem) -> Result<String> {
        item.get_string("id")
            .ok_or_else(|| SyncError::fail("missing id"))
    }

    async fn process_item(&self, record: &mut Record, item: &SyncItem) -> Result<()> {
        if item.get("fail") == Some(&Value::Bool(true)) {
            return Err(SyncError::fail(format!(
                "refusing {}",
                item.get_string("id").unwrap_or_default()
            )));
        }
        if item.get("broken") == Some(&Value::Bool(true)) {
            return Err(SyncError::Config("unreadable person".to_string()));
        }
        record.set("name", item.get("name").cloned().unwrap_or(Value::Null));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<FailureAlert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &FailureAlert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub services: Services,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("sync.db")).unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let notifier = Arc::new(RecordingNotifier::default());
        let services = Services::sqlite(db, clock.clone()).with_notifier(notifier.clone());
        Self {
            _dir: dir,
            clock,
            services,
            notifier,
        }
    }

    pub fn runner(
        &self,
        definition: ResourceDefinition,
        script: &Script,
        paging: Paging,
        resource: Box<dyn Resource>,
    ) -> ResourceRunner {
        ResourceRunner::from_parts(
            definition,
            Box::new(ScriptedFetcher::new(script.clone(), paging)),
            Box::new(NoneParser),
            resource,
            &self.services,
            RunnerSettings {
                email_fail: Some("ops@example.com".to_string()),
                max_debug: 2,
                ..RunnerSettings::default()
            },
        )
    }

    pub fn people(&self, script: &Script, cleanup: bool) -> ResourceRunner {
        self.runner(definition("people", cleanup), script, Paging::default(), Box::new(PeopleResource))
    }

    pub fn mapped(&self, script: &Script, settings: Value) -> ResourceRunner {
        self.runner(
            definition("people", false),
            script,
            Paging::default(),
            Box::new(MappedResource::new(serde_json::from_value(settings).unwrap())),
        )
    }
}

pub fn definition(id: &str, cleanup: bool) -> ResourceDefinition {
    serde_json::from_value(json!({
        "id": id,
        "label": "People",
        "entity_type": "person",
        "cleanup": cleanup,
        "fetcher": {"plugin": "scripted"},
        "parser": {"plugin": "none"}
    }))
    .unwrap()
}

pub fn person(id: &str, name: &str) -> Value {
    json!({"id": id, "name": name})
}

/// Runs jobs until only `end` is left, reads the tallies, then finishes the run.
pub async fn run_to_end(runner: &ResourceRunner) -> ProcessCounts {
    while runner.queue().number_of_items().await.unwrap() > 1 {
        assert!(runner.run_job().await.unwrap());
    }
    let counts = runner.state().process_counts().await.unwrap();
    runner.run_jobs().await.unwrap();
    counts
}

/// A full run: build, then drain.
pub async fn sync(runner: &ResourceRunner) -> ProcessCounts {
    let outcome = runner
        .build(pullsync::pipeline::RunContext::new())
        .await
        .unwrap();
    assert!(outcome.is_queued(), "build did not queue: {:?}", outcome);
    run_to_end(runner).await
}
