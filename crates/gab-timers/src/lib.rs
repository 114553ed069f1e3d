//! gab-timers: named periodic tasks resumed by an external polling tick.
//!
//! The scheduler never spawns a clock thread. Something outside calls
//! [`TimerFramework::process_timers`] periodically (see [`driver::drive`]),
//! and each call resumes every registered timer exactly once.

pub mod clock;
pub mod driver;
pub mod scheduler;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::drive;
pub use gab_pool::TaskHandle;
pub use scheduler::{TickReport, TimerFramework, TimerRef};

/// Callback run each time a timer comes due.
pub type TimerCallback = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer {timer} failed: {source}")]
    Callback {
        timer: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Registration options for a timer.
#[derive(Debug, Clone)]
pub struct TimerOptions {
    /// Runs left: `-1` forever, `0` none, `N` exactly N more.
    pub repeat: i64,
    /// Fire on the very first tick instead of waiting one full delay.
    pub run_now: bool,
    /// Human-readable description, returned by `query`.
    pub description: Option<String>,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            repeat: -1,
            run_now: false,
            description: None,
        }
    }
}

impl TimerOptions {
    pub fn repeat(repeat: i64) -> Self {
        Self {
            repeat,
            ..Self::default()
        }
    }

    pub fn run_now(mut self) -> Self {
        self.run_now = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Returned by `add_timer`; identifies one registered timer instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerHandle {
    pub name: String,
    pub task: TaskHandle,
}

/// What one resume of a timer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumed {
    /// Not due yet.
    Waiting,
    /// Fired and will keep running.
    Fired,
    /// Finished; `fired` tells whether it fired during this resume.
    Done { fired: bool },
}

/// The cooperative loop behind one timer.
pub struct TimerTask {
    name: String,
    delay: TimeDelta,
    callback: TimerCallback,
    repeat: i64,
    last_run: Option<DateTime<Utc>>,
}

impl TimerTask {
    pub fn new(
        name: impl Into<String>,
        delay: std::time::Duration,
        callback: TimerCallback,
        options: &TimerOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            delay: TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX),
            callback,
            repeat: options.repeat,
            // No previous run means the first check is due immediately.
            last_run: if options.run_now { None } else { Some(now) },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remaining(&self) -> i64 {
        self.repeat
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Resume the loop once at time `now`.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<Resumed, TimerError> {
        if self.repeat == 0 {
            return Ok(Resumed::Done { fired: false });
        }

        let due = match self.last_run {
            None => true,
            Some(last) => now - last >= self.delay,
        };
        if !due {
            return Ok(Resumed::Waiting);
        }

        (self.callback)().map_err(|source| TimerError::Callback {
            timer: self.name.clone(),
            source,
        })?;
        self.last_run = Some(now);

        if self.repeat > 0 {
            self.repeat -= 1;
            if self.repeat == 0 {
                return Ok(Resumed::Done { fired: true });
            }
        }
        Ok(Resumed::Fired)
    }
}

impl std::fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerTask")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("repeat", &self.repeat)
            .field("last_run", &self.last_run)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(repeat: i64, run_now: bool) -> TimerTask {
        let mut options = TimerOptions::repeat(repeat);
        options.run_now = run_now;
        TimerTask::new(
            "t",
            Duration::from_secs(5),
            Box::new(|| -> anyhow::Result<()> { Ok(()) }),
            &options,
            DateTime::UNIX_EPOCH,
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_waits_for_delay() {
        let mut t = task(-1, false);
        assert_eq!(t.resume(at(0)).unwrap(), Resumed::Waiting);
        assert_eq!(t.resume(at(4)).unwrap(), Resumed::Waiting);
        assert_eq!(t.resume(at(5)).unwrap(), Resumed::Fired);
        assert_eq!(t.last_run(), Some(at(5)));
        assert_eq!(t.resume(at(9)).unwrap(), Resumed::Waiting);
        assert_eq!(t.remaining(), -1);
    }

    #[test]
    fn test_run_now_fires_at_zero() {
        let mut t = task(-1, true);
        assert_eq!(t.resume(at(0)).unwrap(), Resumed::Fired);
    }

    #[test]
    fn test_repeat_zero_never_fires() {
        let mut t = task(0, true);
        assert_eq!(t.resume(at(100)).unwrap(), Resumed::Done { fired: false });
    }

    #[test]
    fn test_repeat_counts_down() {
        let mut t = task(2, false);
        assert_eq!(t.resume(at(5)).unwrap(), Resumed::Fired);
        assert_eq!(t.remaining(), 1);
        assert_eq!(t.resume(at(10)).unwrap(), Resumed::Done { fired: true });
        assert_eq!(t.remaining(), 0);
    }

    #[test]
    fn test_callback_error_names_timer() {
        let mut t = TimerTask::new(
            "broken",
            Duration::ZERO,
            Box::new(|| -> anyhow::Result<()> { anyhow::bail!("boom") }),
            &TimerOptions::default(),
            DateTime::UNIX_EPOCH,
        );
        let err = t.resume(at(0)).unwrap_err();
        assert_eq!(err.to_string(), "timer broken failed: boom");
    }
}
