//! Composition root shared by the command handlers
//!
//! Builds the scheduler registry from settings, restores persisted task
//! state from the configured store, and assembles one worker per scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::config::settings::{Settings, StoreBackend};
use crate::error::{AppError, AppResult};
use crate::jobs::{
    JsonFileTaskStore, LoggingSubscriber, MemoryTaskStore, MessageHandler, ProcessHandler,
    Scheduler, SchedulerRegistry, TaskStore, Worker, WorkerOptions, WorkerRegistry,
};

pub struct CommandContext {
    settings: Settings,
    schedulers: SchedulerRegistry,
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn MessageHandler>,
}

impl CommandContext {
    /// Build the context from validated settings.
    ///
    /// Fails on task definitions that do not build or on an unreadable store.
    pub fn new(settings: Settings) -> AppResult<Self> {
        let schedulers = settings.build_schedulers(Utc::now())?;

        let store: Arc<dyn TaskStore> = match settings.store.backend {
            StoreBackend::Memory => Arc::new(MemoryTaskStore::new()),
            StoreBackend::File => Arc::new(JsonFileTaskStore::new(&settings.store.path)),
        };

        for scheduler in &schedulers {
            let runtimes = store.load(scheduler.name())?;
            debug!(scheduler = %scheduler.name(), restored = runtimes.len(), "Task state restored");
            scheduler.restore(&runtimes);
        }

        let mut handler = ProcessHandler::new(settings.worker.shell.clone());
        if let Some(timeout) = settings.worker.command_timeout() {
            handler = handler.with_timeout(timeout);
        }

        Ok(Self {
            settings,
            schedulers,
            store,
            handler: Arc::new(handler),
        })
    }

    /// Replace the message handler workers dispatch through
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn schedulers(&self) -> &SchedulerRegistry {
        &self.schedulers
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn scheduler(&self, name: &str) -> AppResult<Arc<Scheduler>> {
        Ok(self.schedulers.get(name)?)
    }

    /// Schedulers named in `names`, or all of them when `names` is empty
    pub fn select_schedulers(&self, names: &[String]) -> AppResult<SchedulerRegistry> {
        let selected = if names.is_empty() {
            self.schedulers.clone()
        } else {
            self.schedulers.filter(names)
        };

        if selected.is_empty() {
            return Err(AppError::NoSchedulerAvailable);
        }
        Ok(selected)
    }

    /// Worker options from settings with the command-line overrides applied
    pub fn worker_options(
        &self,
        limit: Option<usize>,
        time_limit_secs: Option<u64>,
        poll_interval_ms: Option<u64>,
        failure_limit: Option<usize>,
    ) -> WorkerOptions {
        let mut options = self.settings.worker.to_worker_options();
        if limit.is_some() {
            options.limit = limit;
        }
        if let Some(secs) = time_limit_secs {
            options.time_limit = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = poll_interval_ms {
            options.poll_interval = Duration::from_millis(ms);
        }
        if failure_limit.is_some() {
            options.failure_limit = failure_limit;
        }
        options
    }

    /// One worker per scheduler, named after it
    pub fn workers(&self, options: &WorkerOptions) -> AppResult<WorkerRegistry> {
        let mut workers = WorkerRegistry::new();
        for scheduler in &self.schedulers {
            workers.register(self.worker_for(scheduler, options.clone())?)?;
        }
        Ok(workers)
    }

    /// Worker bound to a single scheduler
    pub fn worker_for(&self, scheduler: &Arc<Scheduler>, options: WorkerOptions) -> AppResult<Worker> {
        let mut schedulers = SchedulerRegistry::new();
        schedulers.register(Arc::clone(scheduler))?;

        Ok(Worker::new(scheduler.name(), schedulers, Arc::clone(&self.handler))
            .with_options(options)
            .with_store(self.store())
            .with_subscriber(Arc::new(LoggingSubscriber)))
    }
}
