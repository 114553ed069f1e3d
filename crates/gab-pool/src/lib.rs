//! gab-pool: registries of cooperatively scheduled tasks.
//!
//! A pool owns task instances built from factories, remembers a description
//! and a priority for each, and keeps an ordered *active view* that drivers
//! walk once per tick. The view is recomputed by a [`SchedulePolicy`] every
//! time membership changes.
//!
//! Two id flavours exist: [`SequentialPool`] hands out increasing integers,
//! [`NamedPool`] keys tasks by a declared name (adding a name twice replaces
//! the earlier task in place).

pub mod policy;

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use indexmap::IndexMap;
use tracing::debug;

pub use policy::{InsertionOrder, PriorityDuplicated, SchedulePolicy, SortedByPriority};

/// Identity of one task instance, stable for the task's lifetime and never
/// reused, even when a named entry is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

struct PoolEntry<T> {
    description: Option<String>,
    task: T,
    priority: i32,
    handle: TaskHandle,
}

/// Registry of resumable tasks keyed by `K`, ordered by policy `P`.
pub struct TaskPool<K, T, P = InsertionOrder> {
    entries: IndexMap<K, PoolEntry<T>>,
    handles: HashMap<TaskHandle, K>,
    active: Vec<K>,
    next_handle: u64,
    next_id: usize,
    policy: P,
}

/// Pool whose ids are sequential integers.
pub type SequentialPool<T, P = InsertionOrder> = TaskPool<usize, T, P>;

/// Pool whose ids are the tasks' declared names.
pub type NamedPool<T, P = InsertionOrder> = TaskPool<String, T, P>;

impl<K, T, P> TaskPool<K, T, P>
where
    K: Eq + Hash + Clone,
    P: SchedulePolicy,
{
    pub fn new() -> Self
    where
        P: Default,
    {
        Self::with_policy(P::default())
    }

    pub fn with_policy(policy: P) -> Self {
        Self {
            entries: IndexMap::new(),
            handles: HashMap::new(),
            active: Vec::new(),
            next_handle: 0,
            next_id: 0,
            policy,
        }
    }

    /// Build a task from `factory` and store it under an explicit `id`,
    /// replacing whatever was stored there. Returns the new instance's handle.
    pub fn insert<F>(
        &mut self,
        id: K,
        factory: F,
        description: Option<&str>,
        priority: i32,
    ) -> TaskHandle
    where
        F: FnOnce() -> T,
    {
        self.insert_entry(id, factory(), description.map(str::to_string), priority)
    }

    fn insert_entry(
        &mut self,
        id: K,
        task: T,
        description: Option<String>,
        priority: i32,
    ) -> TaskHandle {
        let handle = TaskHandle(self.next_handle);
        self.next_handle += 1;
        let entry = PoolEntry {
            description,
            task,
            priority,
            handle,
        };
        // IndexMap::insert keeps the original slot for an existing key.
        if let Some(previous) = self.entries.insert(id.clone(), entry) {
            self.handles.remove(&previous.handle);
        }
        self.handles.insert(handle, id);
        self.rearrange();
        handle
    }

    fn rearrange(&mut self) {
        let entries = self
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.priority))
            .collect();
        self.active = self.policy.arrange(entries);
    }

    /// Delete the task stored under `id`. Absent ids are ignored.
    pub fn remove<Q>(&mut self, id: &Q) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (key, entry) = self.entries.shift_remove_entry(id)?;
        self.handles.remove(&entry.handle);
        self.active.retain(|active| *active != key);
        Some(entry.task)
    }

    /// Delete a task by instance identity rather than by id.
    pub fn remove_by_handle(&mut self, handle: TaskHandle) -> Option<T> {
        let id = self.handles.get(&handle)?.clone();
        self.remove(&id)
    }

    /// Description of the task stored under `id`.
    pub fn query<Q>(&self, id: &Q) -> Option<&str>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(id)?.description.as_deref()
    }

    pub fn get<Q>(&self, id: &Q) -> Option<&T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(id).map(|entry| &entry.task)
    }

    pub fn get_mut<Q>(&mut self, id: &Q) -> Option<&mut T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get_mut(id).map(|entry| &mut entry.task)
    }

    pub fn priority<Q>(&self, id: &Q) -> Option<i32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(id).map(|entry| entry.priority)
    }

    pub fn handle_of<Q>(&self, id: &Q) -> Option<TaskHandle>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(id).map(|entry| entry.handle)
    }

    pub fn id_of(&self, handle: TaskHandle) -> Option<&K> {
        self.handles.get(&handle)
    }

    pub fn contains<Q>(&self, id: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in insertion order, each once.
    pub fn ids(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// The active view: ids in scheduling order, duplicates included.
    ///
    /// Drivers that mutate the pool while walking it should iterate over a
    /// copy (`active_ids().to_vec()`).
    pub fn active_ids(&self) -> &[K] {
        &self.active
    }

    /// Tasks in active-view order. Each call starts a fresh pass over the
    /// current membership.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.active
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| &entry.task))
    }
}

impl<K, T, P> Default for TaskPool<K, T, P>
where
    K: Eq + Hash + Clone,
    P: SchedulePolicy + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P: SchedulePolicy> TaskPool<usize, T, P> {
    /// Build a task from `factory` and store it under the next free id.
    pub fn append<F>(&mut self, factory: F, description: Option<&str>, priority: i32) -> usize
    where
        F: FnOnce() -> T,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.insert(id, factory, description, priority);
        debug!(task_id = id, priority, "Task appended");
        id
    }
}

impl<T, P: SchedulePolicy> TaskPool<String, T, P> {
    /// Build a task from `factory` and store it under `name`, replacing any
    /// task already registered with that name.
    pub fn append<F>(
        &mut self,
        name: impl Into<String>,
        factory: F,
        description: Option<&str>,
        priority: i32,
    ) -> String
    where
        F: FnOnce() -> T,
    {
        let name = name.into();
        if self.contains(name.as_str()) {
            debug!(task = %name, "Replacing named task");
        }
        self.insert(name.clone(), factory, description, priority);
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let mut pool: SequentialPool<&str> = SequentialPool::new();
        assert_eq!(pool.append(|| "a", Some("first"), 1), 0);
        assert_eq!(pool.append(|| "b", None, 1), 1);
        assert_eq!(pool.query(&0), Some("first"));
        assert_eq!(pool.query(&1), None);
        assert_eq!(pool.query(&7), None);
        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_ids_not_reused_after_remove() {
        let mut pool: SequentialPool<u8> = SequentialPool::new();
        let a = pool.append(|| 1, None, 1);
        assert_eq!(pool.remove(&a), Some(1));
        let b = pool.append(|| 2, None, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut pool: SequentialPool<u8> = SequentialPool::new();
        pool.append(|| 1, None, 1);
        assert_eq!(pool.remove(&42), None);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_by_handle() {
        let mut pool: SequentialPool<&str> = SequentialPool::new();
        let a = pool.append(|| "a", None, 1);
        pool.append(|| "b", None, 1);
        let handle = pool.handle_of(&a).unwrap();
        assert_eq!(pool.remove_by_handle(handle), Some("a"));
        assert_eq!(pool.remove_by_handle(handle), None);
        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_iteration_reflects_membership() {
        let mut pool: SequentialPool<u8> = SequentialPool::new();
        pool.append(|| 1, None, 1);
        assert_eq!(pool.iter().count(), 1);
        pool.append(|| 2, None, 1);
        assert_eq!(pool.iter().count(), 2);
        // Restartable: a second pass sees the same tasks.
        assert_eq!(pool.iter().count(), 2);
    }

    #[test]
    fn test_priority_duplicated_view() {
        let mut pool: SequentialPool<&str, PriorityDuplicated> = SequentialPool::new();
        let heavy = pool.append(|| "heavy", None, 3);
        pool.append(|| "zero", None, 0);
        pool.append(|| "negative", None, -1);
        let view: Vec<_> = pool.iter().copied().collect();
        assert_eq!(view.iter().filter(|t| **t == "heavy").count(), 3);
        assert_eq!(view.iter().filter(|t| **t == "zero").count(), 1);
        assert_eq!(view.iter().filter(|t| **t == "negative").count(), 1);

        pool.remove(&heavy);
        assert!(!pool.active_ids().contains(&heavy));
    }

    #[test]
    fn test_sorted_by_priority_view() {
        let mut pool: SequentialPool<&str, SortedByPriority> = SequentialPool::new();
        pool.append(|| "late", None, 5);
        pool.append(|| "early", None, 1);
        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), vec!["early", "late"]);
    }

    #[test]
    fn test_named_append_replaces_in_place() {
        let mut pool: NamedPool<u8> = NamedPool::new();
        assert_eq!(pool.append("tick", || 1, None, 1), "tick");
        pool.append("tock", || 2, None, 1);
        let old = pool.handle_of("tick").unwrap();
        pool.append("tick", || 3, Some("again"), 1);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(pool.query("tick"), Some("again"));
        assert_eq!(pool.id_of(old), None);
        assert_eq!(pool.remove_by_handle(old), None);
    }
}
