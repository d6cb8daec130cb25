//! Wiring: configuration, plugin registry and shared services in one place.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::pipeline::{BuildOutcome, ResourceRunner, RunContext, Services};
use crate::registry::{PluginContext, Registry};
use crate::resource::{ResourceDefinition, ResourceManager};
use crate::schedule;
use crate::storage::Database;

/// Summary of one resource run started by the CLI or cron.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub resource: String,
    pub build: Option<BuildOutcome>,
    pub jobs: usize,
}

pub struct App {
    config: Config,
    manager: ResourceManager,
    registry: Registry,
    services: Services,
    plugins: PluginContext,
}

impl App {
    pub fn new(config: Config, registry: Registry, services: Services) -> Result<Self> {
        let manager = config.manager()?;
        let plugins = PluginContext {
            file_root: config.settings.file_root(),
            content_root: config.settings.content_root(),
            entities: services.entities.clone(),
        };
        Ok(Self {
            config,
            manager,
            registry,
            services,
            plugins,
        })
    }

    /// Opens the configured database with the built-in plugins and the system clock.
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.settings.database)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier: Arc<dyn Notifier> = match &config.settings.webhook_fail {
            Some(url) if !url.is_empty() => Arc::new(WebhookNotifier::new(url.clone())?),
            _ => Arc::new(LogNotifier),
        };
        let services = Services::sqlite(db, clock).with_notifier(notifier);
        Self::new(config, Registry::with_defaults(), services)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn runner(&self, id: &str) -> Result<ResourceRunner> {
        let definition = self.manager.require(id)?.clone();
        self.runner_for(definition)
    }

    pub fn runner_for(&self, definition: ResourceDefinition) -> Result<ResourceRunner> {
        ResourceRunner::new(
            definition,
            &self.registry,
            &self.plugins,
            &self.services,
            self.config.settings.runner_settings(),
        )
    }

    /// Runner whose `file_upload` fetcher reads `path`.
    pub fn upload_runner(&self, id: &str, path: &str) -> Result<ResourceRunner> {
        let mut definition = self.manager.require(id)?.clone();
        if definition.fetcher.plugin != "file_upload" {
            return Err(SyncError::Config(format!(
                "resource '{}' does not accept uploads",
                id
            )));
        }
        definition.fetcher = definition
            .fetcher
            .with_setting("path", serde_json::Value::from(path));
        self.runner_for(definition)
    }

    /// Full synchronous run. With `resume`, claimed jobs of an interrupted run are released
    /// and drained instead of starting over.
    pub async fn sync(&self, id: &str, resume: bool) -> Result<RunSummary> {
        let runner = self.runner(id)?;
        let build = if resume {
            runner.resume().await?;
            None
        } else {
            Some(runner.build(RunContext::new()).await?)
        };
        let jobs = runner.run_jobs().await?;
        Ok(RunSummary {
            resource: id.to_string(),
            build,
            jobs,
        })
    }

    /// Runs every enabled resource whose schedule is due at `now`.
    pub async fn run_due(&self, now: DateTime<Local>) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::new();
        for definition in self.manager.active() {
            let runner = match self.runner_for(definition.clone()) {
                Ok(runner) => runner,
                Err(e) => {
                    error!(resource = %definition.id, "Cannot build runner: {}", e);
                    continue;
                }
            };
            let last_start = runner.last_run_start().await?;
            match schedule::is_due(definition, last_start, &now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(resource = %definition.id, "Invalid schedule: {}", e);
                    continue;
                }
            }
            info!(resource = %definition.id, "Cron: {} is due", definition.label());
            let build = runner.build(RunContext::new()).await?;
            let jobs = runner.run_jobs().await?;
            summaries.push(RunSummary {
                resource: definition.id.clone(),
                build: Some(build),
                jobs,
            });
        }
        Ok(summaries)
    }

    /// Locks or unlocks a synced identity so processing and cleanup leave its record alone.
    pub async fn set_locked(&self, id: &str, entity_type: &str, locked: bool) -> Result<bool> {
        self.services.sync.set_locked(id, entity_type, locked).await
    }

    pub async fn reset(&self, id: &str) -> Result<()> {
        let runner = self.runner(id)?;
        if !runner.definition().reset {
            return Err(SyncError::Config(format!(
                "resource '{}' does not allow resetting",
                id
            )));
        }
        runner.reset_last_run().await
    }
}
