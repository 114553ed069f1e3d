//! Ordering policies that turn pool membership into the active view.

/// Computes the order in which a driver visits a pool's tasks.
///
/// `entries` arrive in insertion order as `(id, priority)` pairs. The returned
/// ids form the active view; an id may appear more than once.
pub trait SchedulePolicy {
    fn arrange<K: Clone>(&self, entries: Vec<(K, i32)>) -> Vec<K>;
}

/// Visit tasks in the order they were added.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertionOrder;

impl SchedulePolicy for InsertionOrder {
    fn arrange<K: Clone>(&self, entries: Vec<(K, i32)>) -> Vec<K> {
        entries.into_iter().map(|(id, _)| id).collect()
    }
}

/// Repeat each task `max(1, priority)` times so higher priorities get
/// resumed more often per pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityDuplicated;

impl SchedulePolicy for PriorityDuplicated {
    fn arrange<K: Clone>(&self, entries: Vec<(K, i32)>) -> Vec<K> {
        entries
            .into_iter()
            .flat_map(|(id, priority)| std::iter::repeat_n(id, priority.max(1) as usize))
            .collect()
    }
}

/// Stable ascending sort on the priority field.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortedByPriority;

impl SchedulePolicy for SortedByPriority {
    fn arrange<K: Clone>(&self, mut entries: Vec<(K, i32)>) -> Vec<K> {
        entries.sort_by_key(|(_, priority)| *priority);
        entries.into_iter().map(|(id, _)| id).collect()
    }
}
