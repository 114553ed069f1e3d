//! Timer scheduler: resumes named periodic tasks on each external tick.

use std::sync::Arc;
use std::time::Duration;

use gab_pool::{NamedPool, TaskHandle};
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::{Resumed, TimerError, TimerHandle, TimerOptions, TimerTask};

/// Identifies a timer for removal: by name, or by the instance a handle
/// points at.
#[derive(Debug, Clone, Copy)]
pub enum TimerRef<'a> {
    Name(&'a str),
    Handle(TaskHandle),
}

impl<'a> From<&'a str> for TimerRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a TimerHandle> for TimerRef<'a> {
    fn from(handle: &'a TimerHandle) -> Self {
        Self::Handle(handle.task)
    }
}

/// What happened during one `process_timers` pass.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Timers whose callback ran.
    pub fired: Vec<String>,
    /// Timers removed because they ran out of repeats.
    pub finished: Vec<String>,
    /// Timers removed because their callback failed.
    pub failed: Vec<TimerError>,
}

/// Named periodic-task scheduler driven by an external polling tick.
pub struct TimerFramework {
    timers: NamedPool<TimerTask>,
    clock: Arc<dyn Clock>,
}

impl TimerFramework {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: NamedPool::new(),
            clock,
        }
    }

    /// Register `callback` to run every `delay`.
    ///
    /// A timer registered under a name already in use replaces the old one.
    pub fn add_timer<F>(
        &mut self,
        name: impl Into<String>,
        delay: Duration,
        callback: F,
        options: TimerOptions,
    ) -> TimerHandle
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let now = self.clock.now();
        let task = TimerTask::new(name.clone(), delay, Box::new(callback), &options, now);
        let handle = self
            .timers
            .insert(name.clone(), || task, options.description.as_deref(), 1);
        debug!(
            timer = %name,
            delay_ms = delay.as_millis() as u64,
            repeat = options.repeat,
            run_now = options.run_now,
            "Timer added"
        );
        TimerHandle { name, task: handle }
    }

    /// Cancel a timer. Returns `false` if nothing matched.
    pub fn remove_timer<'a>(&mut self, target: impl Into<TimerRef<'a>>) -> bool {
        let removed = match target.into() {
            TimerRef::Name(name) => self.timers.remove(name),
            TimerRef::Handle(handle) => self.timers.remove_by_handle(handle),
        };
        if let Some(task) = &removed {
            debug!(timer = %task.name(), "Timer removed");
        }
        removed.is_some()
    }

    /// Resume every registered timer once.
    ///
    /// Timers that run out of repeats are removed. A failing callback is
    /// logged, its timer removed, and the pass continues with the rest.
    pub fn process_timers(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.clock.now();

        for name in self.timers.active_ids().to_vec() {
            let Some(task) = self.timers.get_mut(name.as_str()) else {
                continue;
            };
            match task.resume(now) {
                Ok(Resumed::Waiting) => {}
                Ok(Resumed::Fired) => report.fired.push(name),
                Ok(Resumed::Done { fired }) => {
                    self.timers.remove(name.as_str());
                    info!(timer = %name, "Timer finished");
                    if fired {
                        report.fired.push(name.clone());
                    }
                    report.finished.push(name);
                }
                Err(err) => {
                    self.timers.remove(name.as_str());
                    error!(timer = %name, error = %err, "Timer callback failed, timer removed");
                    report.failed.push(err);
                }
            }
        }

        report
    }

    pub fn contains(&self, name: &str) -> bool {
        self.timers.contains(name)
    }

    /// Description a timer was registered with.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.timers.query(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.timers.ids().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Default for TimerFramework {
    fn default() -> Self {
        Self::new()
    }
}
