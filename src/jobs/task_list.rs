use serde::Serialize;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::task::Task;

/// Ordered collection of tasks with unique names.
///
/// Iteration follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> JobResult<Self> {
        let mut list = Self::new();
        for task in tasks {
            list.add(task)?;
        }
        Ok(list)
    }

    /// Append a task; the list is left untouched when the name is taken
    pub fn add(&mut self, task: Task) -> JobResult<()> {
        if self.contains(task.name()) {
            return Err(JobError::DuplicateTask(task.name().to_string()));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Task> {
        let index = self.tasks.iter().position(|task| task.name() == name)?;
        Some(self.tasks.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.name() == name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// New list holding the tasks matching `predicate`, in the same order
    pub fn filter<P>(&self, predicate: P) -> TaskList
    where
        P: Fn(&Task) -> bool,
    {
        TaskList {
            tasks: self.tasks.iter().filter(|task| predicate(task)).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Task> {
        self.tasks.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.name().to_string()).collect()
    }

    pub fn to_vec(&self) -> Vec<Task> {
        self.tasks.clone()
    }
}

impl IntoIterator for TaskList {
    type Item = Task;
    type IntoIter = std::vec::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

impl<'a> IntoIterator for &'a TaskList {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::task::TaskState;
    use crate::jobs::trigger::Trigger;
    use proptest::prelude::*;

    fn task(name: &str) -> Task {
        Task::new(name, Trigger::cron("@hourly").unwrap()).unwrap()
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let list = TaskList::from_tasks([task("c"), task("a"), task("b")]).unwrap();
        assert_eq!(list.names(), vec!["c", "a", "b"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_duplicate_add_fails_and_leaves_list_unchanged() {
        let mut list = TaskList::from_tasks([task("a"), task("b")]).unwrap();
        let before = list.clone();

        let replacement = task("a").with_description("other");
        let result = list.add(replacement);

        assert!(matches!(result, Err(JobError::DuplicateTask(name)) if name == "a"));
        assert_eq!(list, before);
    }

    #[test]
    fn test_filter_returns_new_list() {
        let list = TaskList::from_tasks([
            task("a"),
            task("b").with_state(TaskState::Paused),
            task("c"),
        ])
        .unwrap();

        let scheduled = list.filter(|t| t.state() == TaskState::Scheduled);
        assert_eq!(scheduled.names(), vec!["a", "c"]);
        assert_eq!(list.len(), 3);

        let composed = scheduled.filter(|t| t.name() != "a");
        assert_eq!(composed.names(), vec!["c"]);
    }

    #[test]
    fn test_filter_empty_list() {
        let empty = TaskList::new();
        let filtered = empty.filter(|_| true);
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_remove_and_get() {
        let mut list = TaskList::from_tasks([task("a"), task("b")]).unwrap();
        assert!(list.get("b").is_some());
        assert_eq!(list.remove("a").map(|t| t.name().to_string()), Some("a".to_string()));
        assert!(list.remove("a").is_none());
        assert_eq!(list.names(), vec!["b"]);

        // Name is free again after removal
        list.add(task("a")).unwrap();
        assert_eq!(list.names(), vec!["b", "a"]);
    }

    proptest! {
        #[test]
        fn property_filter_is_idempotent(
            names in proptest::collection::btree_set("[a-z]{1,8}", 0..20),
            threshold in 0usize..9,
        ) {
            let list = TaskList::from_tasks(names.iter().map(|n| task(n))).unwrap();
            let predicate = |t: &Task| t.name().len() > threshold;

            let once = list.filter(predicate);
            let twice = once.filter(predicate);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn property_duplicate_add_always_fails(
            names in proptest::collection::btree_set("[a-z]{1,8}", 1..20),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut list = TaskList::from_tasks(names.iter().map(|n| task(n))).unwrap();
            let before = list.clone();
            let existing = pick.get(&before.names()).clone();

            prop_assert!(matches!(list.add(task(&existing)), Err(JobError::DuplicateTask(_))));
            prop_assert_eq!(list, before);
        }
    }
}
