use crate::task::{Key, TaskId};

use std::collections::HashMap;

/// Registry behind the wait/fire rendezvous.
///
/// A fire takes the whole waiter set of its key; tasks waiting afterwards
/// start a fresh set and never observe that fire. Empty sets are pruned.
#[derive(Debug, Default)]
pub(crate) struct WaitRegistry {
    by_key: HashMap<Key, Vec<TaskId>>,
    by_task: HashMap<TaskId, Vec<Key>>,
}

impl WaitRegistry {
    pub(crate) fn add(&mut self, key: Key, task: TaskId) {
        let waiters = self.by_key.entry(key.clone()).or_default();
        if waiters.contains(&task) {
            return;
        }
        waiters.push(task);

        self.by_task.entry(task).or_default().push(key);
    }

    /// Forgets every key `task` waits on.
    pub(crate) fn remove_task(&mut self, task: TaskId) {
        let Some(keys) = self.by_task.remove(&task) else {
            return;
        };

        for key in keys {
            if let Some(waiters) = self.by_key.get_mut(&key) {
                waiters.retain(|t| *t != task);
                if waiters.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
    }

    /// Takes the current waiters of `key`, in wait order.
    ///
    /// Each returned task is also removed from the other keys it waited on.
    pub(crate) fn fire(&mut self, key: &Key) -> Vec<TaskId> {
        let waiters = self.by_key.remove(key).unwrap_or_default();

        for task in &waiters {
            self.remove_task(*task);
        }

        waiters
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self, key: &Key) -> usize {
        self.by_key.get(key).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::WaitRegistry;
    use crate::task::{Key, TaskId};

    #[test]
    fn test_fire_takes_all_waiters_once() {
        let mut registry = WaitRegistry::default();
        let key = Key::from("boom!");

        registry.add(key.clone(), TaskId::new(1));
        registry.add(key.clone(), TaskId::new(2));
        registry.add(key.clone(), TaskId::new(1));

        assert_eq!(registry.fire(&key), vec![TaskId::new(1), TaskId::new(2)]);
        assert!(registry.fire(&key).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fire_clears_other_keys_of_waiter() {
        let mut registry = WaitRegistry::default();
        let (a, b) = (Key::from("a"), Key::from("b"));
        let task = TaskId::new(7);

        registry.add(a.clone(), task);
        registry.add(b.clone(), task);
        registry.add(b.clone(), TaskId::new(8));

        assert_eq!(registry.fire(&a), vec![task]);
        assert_eq!(registry.waiter_count(&b), 1);
        assert_eq!(registry.fire(&b), vec![TaskId::new(8)]);
    }

    #[test]
    fn test_remove_task_prunes_keys() {
        let mut registry = WaitRegistry::default();
        registry.add(Key::from("x"), TaskId::new(3));
        registry.remove_task(TaskId::new(3));
        registry.remove_task(TaskId::new(3));

        assert!(registry.is_empty());
    }
}
