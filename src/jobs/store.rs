//! Persistence of task runtime state.
//!
//! Only what changes at runtime is stored (state, last execution and the
//! failure history); task definitions always come from configuration.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::task::{FailedTask, Task, TaskState};

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRuntime {
    pub state: TaskState,
    pub last_execution: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskRuntime {
    fn from(task: &Task) -> Self {
        Self {
            state: task.state(),
            last_execution: task.last_execution(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub scheduler: String,
    pub task: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(scheduler: impl Into<String>, failed: &FailedTask) -> Self {
        Self {
            scheduler: scheduler.into(),
            task: failed.name().to_string(),
            reason: failed.reason().to_string(),
            failed_at: failed.failed_at(),
        }
    }
}

/// On-disk layout of [`JsonFileTaskStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    #[serde(default)]
    pub schedulers: BTreeMap<String, BTreeMap<String, TaskRuntime>>,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            schedulers: BTreeMap::new(),
            failures: Vec::new(),
        }
    }
}

impl StoreSnapshot {
    fn runtimes(&self, scheduler: &str) -> BTreeMap<String, TaskRuntime> {
        self.schedulers.get(scheduler).cloned().unwrap_or_default()
    }

    fn save_task(&mut self, scheduler: &str, task: &Task) {
        self.schedulers
            .entry(scheduler.to_string())
            .or_default()
            .insert(task.name().to_string(), TaskRuntime::from(task));
    }

    /// Store `task` as running unless the stored copy is running, paused or
    /// has a later execution than `task`
    fn claim(&mut self, scheduler: &str, task: &Task) -> bool {
        let runtimes = self.schedulers.entry(scheduler.to_string()).or_default();
        let taken = runtimes.get(task.name()).is_some_and(|stored| {
            !stored.state.is_dispatchable() || stored.last_execution > task.last_execution()
        });
        if taken {
            return false;
        }

        runtimes.insert(
            task.name().to_string(),
            TaskRuntime {
                state: TaskState::Running,
                last_execution: task.last_execution(),
            },
        );
        true
    }

    fn failures(&self, scheduler: Option<&str>) -> Vec<FailureRecord> {
        self.failures
            .iter()
            .filter(|record| scheduler.is_none_or(|name| record.scheduler == name))
            .cloned()
            .collect()
    }
}

/// Storage seam used by workers and the CLI
pub trait TaskStore: Send + Sync {
    /// Runtime state of every stored task of `scheduler`
    fn load(&self, scheduler: &str) -> JobResult<BTreeMap<String, TaskRuntime>>;

    fn save_task(&self, scheduler: &str, task: &Task) -> JobResult<()>;

    /// Atomically mark `task` running in the store.
    ///
    /// Returns `false` when another worker, possibly in another process,
    /// holds the task or already executed a later occurrence of it.
    fn claim(&self, scheduler: &str, task: &Task) -> JobResult<bool>;

    fn record_failure(&self, record: FailureRecord) -> JobResult<()>;

    /// Failure history, oldest first, optionally limited to one scheduler
    fn failures(&self, scheduler: Option<&str>) -> JobResult<Vec<FailureRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    snapshot: Mutex<StoreSnapshot>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn load(&self, scheduler: &str) -> JobResult<BTreeMap<String, TaskRuntime>> {
        let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshot.runtimes(scheduler))
    }

    fn save_task(&self, scheduler: &str, task: &Task) -> JobResult<()> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.save_task(scheduler, task);
        Ok(())
    }

    fn claim(&self, scheduler: &str, task: &Task) -> JobResult<bool> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshot.claim(scheduler, task))
    }

    fn record_failure(&self, record: FailureRecord) -> JobResult<()> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.failures.push(record);
        Ok(())
    }

    fn failures(&self, scheduler: Option<&str>) -> JobResult<Vec<FailureRecord>> {
        let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshot.failures(scheduler))
    }
}

/// JSON file store shared between CLI invocations.
///
/// Every operation re-reads the file so concurrent processes observe each
/// other's writes. Operations hold an exclusive lock on `<path>.lock` for
/// the whole read-modify-write, and writes go to a uniquely named sibling
/// temp file which is then renamed over the store.
#[derive(Debug)]
pub struct JsonFileTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> JobResult<StoreSnapshot> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(StoreSnapshot::default());
        }

        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;
        if snapshot.version != STORE_VERSION {
            return Err(JobError::Store(format!(
                "unsupported store version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }
        Ok(snapshot)
    }

    fn directory(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn lock_path(&self) -> PathBuf {
        let mut lock = self.path.clone().into_os_string();
        lock.push(".lock");
        PathBuf::from(lock)
    }

    /// Exclusive lock shared with every process using the same store path.
    ///
    /// The lock is released when the returned file is dropped.
    fn lock_file(&self) -> JobResult<File> {
        fs::create_dir_all(self.directory())?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        file.lock()?;
        Ok(file)
    }

    fn write(&self, snapshot: &StoreSnapshot) -> JobResult<()> {
        let mut tmp = NamedTempFile::new_in(self.directory())?;
        tmp.write_all(&serde_json::to_vec_pretty(snapshot)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| JobError::Io(e.error))?;
        debug!(path = %self.path.display(), "Task store written");
        Ok(())
    }

    fn with_snapshot<T, F>(&self, f: F) -> JobResult<T>
    where
        F: FnOnce(&StoreSnapshot) -> T,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = self.lock_file()?;
        Ok(f(&self.read()?))
    }

    fn update<T, F>(&self, change: F) -> JobResult<T>
    where
        F: FnOnce(&mut StoreSnapshot) -> T,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = self.lock_file()?;
        let mut snapshot = self.read()?;
        let result = change(&mut snapshot);
        self.write(&snapshot)?;
        Ok(result)
    }
}

impl TaskStore for JsonFileTaskStore {
    fn load(&self, scheduler: &str) -> JobResult<BTreeMap<String, TaskRuntime>> {
        self.with_snapshot(|snapshot| snapshot.runtimes(scheduler))
    }

    fn save_task(&self, scheduler: &str, task: &Task) -> JobResult<()> {
        self.update(|snapshot| snapshot.save_task(scheduler, task))
    }

    fn claim(&self, scheduler: &str, task: &Task) -> JobResult<bool> {
        self.update(|snapshot| snapshot.claim(scheduler, task))
    }

    fn record_failure(&self, record: FailureRecord) -> JobResult<()> {
        self.update(|snapshot| snapshot.failures.push(record))
    }

    fn failures(&self, scheduler: Option<&str>) -> JobResult<Vec<FailureRecord>> {
        self.with_snapshot(|snapshot| snapshot.failures(scheduler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::trigger::Trigger;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn task(name: &str) -> Task {
        Task::new(name, Trigger::cron("@hourly").unwrap()).unwrap()
    }

    fn failure(scheduler: &str, task: &str) -> FailureRecord {
        FailureRecord {
            scheduler: scheduler.to_string(),
            task: task.to_string(),
            reason: "boom".to_string(),
            failed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn exercise(store: &dyn TaskStore) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        store
            .save_task("foo", &task("a").with_state(TaskState::Failed).with_last_execution(at))
            .unwrap();
        store.save_task("bar", &task("b")).unwrap();
        store.record_failure(failure("foo", "a")).unwrap();
        store.record_failure(failure("bar", "b")).unwrap();

        let foo = store.load("foo").unwrap();
        assert_eq!(
            foo.get("a"),
            Some(&TaskRuntime {
                state: TaskState::Failed,
                last_execution: Some(at)
            })
        );
        assert!(store.load("missing").unwrap().is_empty());

        assert_eq!(store.failures(None).unwrap().len(), 2);
        let foo_failures = store.failures(Some("foo")).unwrap();
        assert_eq!(foo_failures.len(), 1);
        assert_eq!(foo_failures[0].task, "a");
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryTaskStore::new());
    }

    #[test]
    fn test_json_file_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileTaskStore::new(dir.path().join("nested").join("state.json"));
        exercise(&store);

        // A second handle sees the same history
        let reopened = JsonFileTaskStore::new(store.path());
        assert_eq!(reopened.failures(None).unwrap().len(), 2);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name != "state.json" && name != "state.json.lock")
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    fn check_claim(store: &dyn TaskStore) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let fresh = task("x").with_state(TaskState::Running);
        assert!(store.claim("foo", &fresh).unwrap());
        assert_eq!(store.load("foo").unwrap()["x"].state, TaskState::Running);

        // Held by the first claimant
        assert!(!store.claim("foo", &fresh).unwrap());

        // Released with a newer execution than the stale copy knows about
        store
            .save_task("foo", &task("x").with_last_execution(at))
            .unwrap();
        assert!(!store.claim("foo", &fresh).unwrap());
        assert!(store.claim("foo", &fresh.with_last_execution(at)).unwrap());

        store.save_task("foo", &task("p").with_state(TaskState::Paused)).unwrap();
        assert!(!store.claim("foo", &task("p")).unwrap());
    }

    #[test]
    fn test_memory_store_claim() {
        check_claim(&MemoryTaskStore::new());
    }

    #[test]
    fn test_json_file_store_claim() {
        let dir = TempDir::new().unwrap();
        check_claim(&JsonFileTaskStore::new(dir.path().join("state.json")));
    }

    #[test]
    fn test_concurrent_handles_claim_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let overdue = task("x");

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let path = path.clone();
                    let overdue = overdue.clone();
                    // One handle per thread, as separate processes would have
                    scope.spawn(move || JsonFileTaskStore::new(path).claim("foo", &overdue).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| usize::from(h.join().unwrap())).sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(
            JsonFileTaskStore::new(&path).load("foo").unwrap()["x"].state,
            TaskState::Running
        );
    }

    #[test]
    fn test_json_file_store_missing_or_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileTaskStore::new(&path);
        assert!(store.failures(None).unwrap().is_empty());

        fs::write(&path, "").unwrap();
        assert!(store.load("foo").unwrap().is_empty());
    }

    #[test]
    fn test_json_file_store_rejects_corrupt_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let store = JsonFileTaskStore::new(&path);
        assert!(matches!(store.load("foo"), Err(JobError::Serialization(_))));

        fs::write(&path, r#"{"version": 99}"#).unwrap();
        assert!(matches!(store.load("foo"), Err(JobError::Store(_))));
    }
}
