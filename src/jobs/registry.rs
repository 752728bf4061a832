use std::fmt;
use std::sync::Arc;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::scheduler::Scheduler;
use crate::jobs::worker::Worker;

/// Entries a [`Registry`] can hold
pub trait Registrable {
    fn name(&self) -> &str;

    /// Error returned when looking up a missing entry
    fn unknown(name: &str) -> JobError;

    /// Error returned when registering a taken name
    fn duplicate(name: &str) -> JobError;
}

impl Registrable for Scheduler {
    fn name(&self) -> &str {
        Scheduler::name(self)
    }

    fn unknown(name: &str) -> JobError {
        JobError::UnknownScheduler(name.to_string())
    }

    fn duplicate(name: &str) -> JobError {
        JobError::DuplicateScheduler(name.to_string())
    }
}

impl Registrable for Worker {
    fn name(&self) -> &str {
        Worker::name(self)
    }

    fn unknown(name: &str) -> JobError {
        JobError::UnknownWorker(name.to_string())
    }

    fn duplicate(name: &str) -> JobError {
        JobError::DuplicateWorker(name.to_string())
    }
}

/// Insertion-ordered name to instance map.
///
/// Registries are plain values owned by whoever assembles the application;
/// entries are shared through `Arc` so a worker and the CLI can hold the
/// same scheduler.
pub struct Registry<T> {
    entries: Vec<Arc<T>>,
}

pub type SchedulerRegistry = Registry<Scheduler>;
pub type WorkerRegistry = Registry<Worker>;

impl<T: Registrable> Registry<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register an entry, returning the shared handle
    pub fn register(&mut self, entry: impl Into<Arc<T>>) -> JobResult<Arc<T>> {
        let entry = entry.into();
        if self.contains(entry.name()) {
            return Err(T::duplicate(entry.name()));
        }
        self.entries.push(Arc::clone(&entry));
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> JobResult<Arc<T>> {
        self.entries
            .iter()
            .find(|entry| entry.name() == name)
            .cloned()
            .ok_or_else(|| T::unknown(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name() == name)
    }

    /// Entries whose names are listed, in registry order; unknown names are ignored
    pub fn filter<S: AsRef<str>>(&self, names: &[S]) -> Registry<T> {
        Registry {
            entries: self
                .entries
                .iter()
                .filter(|entry| names.iter().any(|name| name.as_ref() == entry.name()))
                .cloned()
                .collect(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<T>> {
        self.entries.iter()
    }
}

impl WorkerRegistry {
    /// Workers consuming the given scheduler
    pub fn for_scheduler(&self, scheduler: &str) -> WorkerRegistry {
        Registry {
            entries: self
                .entries
                .iter()
                .filter(|worker| worker.scheduler_names().iter().any(|name| name == scheduler))
                .cloned()
                .collect(),
        }
    }
}

impl<T: Registrable> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: Registrable> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.name()))
            .finish()
    }
}

impl<'a, T> IntoIterator for &'a Registry<T> {
    type Item = &'a Arc<T>;
    type IntoIter = std::slice::Iter<'a, Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
