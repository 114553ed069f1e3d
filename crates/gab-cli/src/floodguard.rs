//! Bundled plugin that swallows messages from users who send too fast.

use std::collections::VecDeque;
use std::path::PathBuf;

use tracing::info;

use gab_hooks::{Driver, HookSpec, HookTask, catalog};
use gab_plugin_sdk::{Mount, Plugin, PluginRegistration};
use gab_types::{HookEvent, Outbox, Step, Verdict};

pub const PLUGIN_NAME: &str = "floodguard";

/// Messages allowed inside one window.
const DEFAULT_LIMIT: usize = 5;
const DEFAULT_WINDOW_MS: i64 = 10_000;

/// Per-user task: remembers recent message times.
struct FloodTask {
    user: String,
    limit: usize,
    window_ms: i64,
    recent: VecDeque<i64>,
    warned: bool,
    outbox: Option<Outbox>,
}

impl HookTask<HookEvent> for FloodTask {
    fn on_event(&mut self, event: &HookEvent) -> anyhow::Result<Step<Verdict>> {
        let HookEvent::Message { timestamp, .. } = event else {
            return Ok(Step::Yield(Verdict::Pass));
        };
        while self
            .recent
            .front()
            .is_some_and(|&seen| seen <= timestamp - self.window_ms)
        {
            self.recent.pop_front();
        }
        self.recent.push_back(*timestamp);

        if self.recent.len() <= self.limit {
            self.warned = false;
            return Ok(Step::Yield(Verdict::Pass));
        }
        if !self.warned {
            self.warned = true;
            info!(user = %self.user, "Flood detected, dropping messages");
            if let Some(outbox) = &self.outbox {
                outbox.error(&self.user, "You are sending messages too quickly. Please slow down.");
            }
        }
        Ok(Step::Yield(Verdict::Consume))
    }
}

pub struct FloodGuard {
    limit: usize,
    window_ms: i64,
}

impl FloodGuard {
    pub fn new(limit: usize, window_ms: i64) -> Self {
        Self { limit, window_ms }
    }
}

impl Default for FloodGuard {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW_MS)
    }
}

impl Plugin for FloodGuard {
    fn mount(&mut self, mount: &mut Mount<'_>) -> anyhow::Result<()> {
        let (limit, window_ms) = (self.limit, self.window_ms);
        let spec = HookSpec::new("floodguard", mount.file(), move |driver: &dyn Driver| {
            Box::new(FloodTask {
                user: driver.active_user().to_string(),
                limit,
                window_ms,
                recent: VecDeque::with_capacity(limit + 1),
                warned: false,
                outbox: driver.outbox().cloned(),
            }) as Box<dyn HookTask<HookEvent>>
        })
        .per_user()
        .describe("Drop messages from users who flood the bot");
        mount.hook(&catalog::staged(catalog::EV_MSG, catalog::Stage::Pre), spec);
        Ok(())
    }
}

pub fn registration() -> PluginRegistration {
    PluginRegistration::new(PLUGIN_NAME, PathBuf::from(file!()), || {
        Ok(Box::new(FloodGuard::default()) as Box<dyn Plugin>)
    })
}
