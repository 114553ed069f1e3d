//! Two-phase resumable hook tasks.
//!
//! A hook task is a small state machine driven by the registry:
//!
//! 1. `start` runs it up to the point where it waits for its first event.
//! 2. For every event, `on_event` consumes the event and produces a
//!    [`Verdict`], then `settle` advances it back to waiting.
//!
//! Any phase may return [`Step::Complete`]; the registry then drops the task
//! and builds a fresh one on the next event for that context.

use gab_types::{Step, Verdict};

/// Body of a hook's per-context task.
pub trait HookTask<E>: Send {
    /// Run up to the first suspension point. Consumes no event data.
    fn start(&mut self) -> anyhow::Result<Step<()>> {
        Ok(Step::Yield(()))
    }

    /// Receive one event and answer whether it should be consumed.
    fn on_event(&mut self, event: &E) -> anyhow::Result<Step<Verdict>>;

    /// Advance past the verdict until the next event is awaited.
    fn settle(&mut self) -> anyhow::Result<Step<()>> {
        Ok(Step::Yield(()))
    }
}

/// Hook task backed by a closure; the closure's captures are its state.
pub struct FnTask<F> {
    f: F,
}

/// Wrap a closure as a [`HookTask`].
pub fn task_fn<E, F>(f: F) -> FnTask<F>
where
    F: FnMut(&E) -> anyhow::Result<Step<Verdict>> + Send,
{
    FnTask { f }
}

impl<E, F> HookTask<E> for FnTask<F>
where
    F: FnMut(&E) -> anyhow::Result<Step<Verdict>> + Send,
{
    fn on_event(&mut self, event: &E) -> anyhow::Result<Step<Verdict>> {
        (self.f)(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Built but not yet primed.
    Uninitialized,
    /// Suspended, waiting for the next event.
    AwaitingEvent,
    /// Produced a verdict and waits to be advanced.
    HoldingVerdict,
    /// Finished; never resumed again.
    Completed,
}

/// A hook task plus the protocol state around it.
pub struct ResumableTask<E> {
    body: Box<dyn HookTask<E>>,
    state: TaskState,
}

impl<E> ResumableTask<E> {
    pub fn new(body: Box<dyn HookTask<E>>) -> Self {
        Self {
            body,
            state: TaskState::Uninitialized,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Completed
    }

    /// Resume without event data: primes a new task, or moves a task holding
    /// a verdict back to waiting. No-op while already waiting.
    pub fn advance(&mut self) -> anyhow::Result<Step<()>> {
        let step = match self.state {
            TaskState::Completed => return Ok(Step::Complete),
            TaskState::AwaitingEvent => return Ok(Step::Yield(())),
            TaskState::Uninitialized => self.guard(|body| body.start()),
            TaskState::HoldingVerdict => self.guard(|body| body.settle()),
        }?;
        self.state = match step {
            Step::Yield(()) => TaskState::AwaitingEvent,
            Step::Complete => TaskState::Completed,
        };
        Ok(step)
    }

    /// Deliver one event. A task that is not yet waiting is advanced first.
    pub fn send(&mut self, event: &E) -> anyhow::Result<Step<Verdict>> {
        if self.state != TaskState::AwaitingEvent && self.advance()?.is_complete() {
            return Ok(Step::Complete);
        }
        let step = self.guard(|body| body.on_event(event))?;
        self.state = match step {
            Step::Yield(_) => TaskState::HoldingVerdict,
            Step::Complete => TaskState::Completed,
        };
        Ok(step)
    }

    fn guard<T>(
        &mut self,
        phase: impl FnOnce(&mut dyn HookTask<E>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let result = phase(self.body.as_mut());
        // A body that failed cannot be resumed safely.
        if result.is_err() {
            self.state = TaskState::Completed;
        }
        result
    }
}

impl<E> std::fmt::Debug for ResumableTask<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableTask")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
