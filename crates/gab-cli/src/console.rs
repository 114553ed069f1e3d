//! Console driver: chat with the bot over stdin/stdout as a single user.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gab_config::{ConfigStores, GabConfig, Prompter};
use gab_hooks::{Locations, UserContext, catalog};
use gab_plugin_sdk::{PluginControl, PluginHost};
use gab_timers::{TimerFramework, TimerOptions};
use gab_types::{HookEvent, OutboundMessage, Outbox, Rank};

use crate::floodguard;

/// Locations an outgoing message passes before delivery.
const OUTGOING: [&str; 3] = [
    catalog::SEND_MSG_PER_MSG,
    catalog::SEND_TO,
    catalog::SEND_MSG_PER_USER,
];

pub struct Console {
    user: String,
    rank: Option<Rank>,
    stores: Arc<Mutex<ConfigStores>>,
    host: PluginHost,
    timers: Arc<Mutex<TimerFramework>>,
    outbox: Outbox,
    inbox: UnboundedReceiver<OutboundMessage>,
}

impl Console {
    /// Load stores, mount the configured plugins and fire the initializers.
    ///
    /// `rank` overrides the rank looked up in `roster.ini`.
    pub fn new(
        user: impl Into<String>,
        rank: Option<Rank>,
        config: &GabConfig,
        prompter: &mut dyn Prompter,
    ) -> Self {
        let user = user.into();
        let mut stores = ConfigStores::with_templates(&config.ini.dir, config.ini.templates.clone());
        for name in &config.ini.preload {
            if !stores.load(name, &[]) {
                continue;
            }
            match stores.template(name) {
                Ok(template) => {
                    if let Err(e) = stores.merge_template(name, &template, prompter) {
                        warn!(store = %name, "Failed to merge template: {e}");
                    }
                }
                Err(e) => warn!(store = %name, "Failed to read template: {e}"),
            }
        }

        let locations = Arc::new(Locations::with_standard_locations());
        let mut host = PluginHost::new(Arc::clone(&locations), config.commands.prefix.clone());
        host.register(gab_admin::registration());
        host.register(floodguard::registration());

        let mut autoload = config.plugins.autoload.clone();
        for name in gab_admin::configured_plugins(&stores) {
            if !autoload.contains(&name) {
                autoload.push(name);
            }
        }
        for name in &autoload {
            if let Err(e) = host.load_plugin(name) {
                warn!(plugin = %name, "Failed to autoload plugin: {e}");
            }
        }

        let stores = Arc::new(Mutex::new(stores));
        let mut timers = TimerFramework::new();
        if config.timers.autosave_secs > 0 {
            let shared = Arc::clone(&stores);
            timers.add_timer(
                "autosave",
                Duration::from_secs(config.timers.autosave_secs),
                move || -> anyhow::Result<()> {
                    let saved = shared.lock().unwrap_or_else(PoisonError::into_inner).saveall()?;
                    debug!(saved, "Ini stores saved");
                    Ok(())
                },
                TimerOptions::default().describe("Save every loaded ini store"),
            );
        }

        let (outbox, inbox) = Outbox::channel();
        let console = Self {
            user,
            rank,
            stores,
            host,
            timers: Arc::new(Mutex::new(timers)),
            outbox,
            inbox,
        };
        let driver = console.driver(&console.user);
        locations.evaluate(catalog::INITIALIZERS, &driver, &HookEvent::Startup);
        console
    }

    fn driver(&self, user: &str) -> UserContext {
        UserContext::new(user).with_outbox(self.outbox.clone())
    }

    fn stores(&self) -> MutexGuard<'_, ConfigStores> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rank(&self) -> Rank {
        self.rank
            .unwrap_or_else(|| gab_admin::rank_of(&self.stores(), &self.user))
    }

    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    pub fn handle_line(&mut self, line: &str) {
        self.handle_line_at(line, chrono::Utc::now().timestamp_millis());
    }

    /// Treat `line` as a message from the console user received at
    /// `timestamp` (unix millis).
    ///
    /// `pre_ev_msg` runs first, so its hooks can also stop commands.
    /// Command lines then go to the command registry; everything else
    /// continues through `ev_msg` and `post_ev_msg`.
    pub fn handle_line_at(&mut self, line: &str, timestamp: i64) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let event = HookEvent::Message {
            from: self.user.clone(),
            resource: None,
            body: line.to_string(),
            timestamp,
        };
        let Some([pre, main, post]) = catalog::pipeline_for(&event) else {
            return;
        };
        let driver = self.driver(&self.user);
        let locations = Arc::clone(self.host.locations());

        if locations.evaluate(&pre, &driver, &event) {
            debug!(location = %pre, "Message consumed");
            return;
        }

        let rank = self.rank();
        let handled = {
            let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
            self.host
                .handle_command(&self.user, rank, line, &mut stores, &self.outbox)
        };
        match handled {
            Some(Ok(())) => return,
            Some(Err(e)) => {
                self.outbox.error(&self.user, e.to_string());
                return;
            }
            None => {}
        }

        for location in [main, post] {
            if locations.evaluate(&location, &driver, &event) {
                debug!(location = %location, "Message consumed");
                break;
            }
        }
    }

    /// Drain queued outbound messages, dropping those a send hook consumes.
    pub fn flush(&mut self) -> Vec<OutboundMessage> {
        let mut delivered = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            let event = HookEvent::Outgoing {
                recipient: Some(message.recipient.clone()),
                resource: None,
                text: message.text.clone(),
            };
            let driver = self.driver(&message.recipient);
            let locations = self.host.locations();
            if let Some(location) = OUTGOING
                .iter()
                .find(|location| locations.evaluate(location, &driver, &event))
            {
                debug!(location, recipient = %message.recipient, "Outgoing message dropped");
                continue;
            }
            delivered.push(message);
        }
        delivered
    }

    /// Read stdin until EOF or Ctrl-C, ticking timers every `tick`.
    pub async fn run(mut self, tick: Duration) -> Result<()> {
        let cancel = CancellationToken::new();
        let ticker = tokio::spawn(gab_timers::drive(
            Arc::clone(&self.timers),
            tick,
            cancel.clone(),
        ));

        println!("gab console, chatting as {} (Ctrl-D to quit)", self.user);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => self.handle_line(&line),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
            for message in self.flush() {
                print_message(&message);
            }
        }

        cancel.cancel();
        join_ticker(ticker).await;
        self.shutdown();
        Ok(())
    }

    /// Unmount every plugin and save the stores.
    pub fn shutdown(&mut self) {
        let loaded: Vec<String> = self.host.loaded().map(str::to_string).collect();
        for name in loaded {
            if let Err(e) = self.host.unload_plugin(&name) {
                warn!(plugin = %name, "Failed to unload plugin: {e}");
            }
        }
        match self.stores().saveall() {
            Ok(saved) => info!(saved, "Ini stores saved"),
            Err(e) => warn!("Failed to save ini stores: {e}"),
        }
    }
}

/// Wait for the timer driver to stop. Returns `false` if it panicked or
/// was aborted.
async fn join_ticker(ticker: JoinHandle<()>) -> bool {
    match ticker.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Timer driver did not stop cleanly: {e}");
            false
        }
    }
}

fn print_message(message: &OutboundMessage) {
    if message.is_error {
        println!("[error] {}", message.text);
    } else {
        println!("{}", message.text);
    }
}

#[cfg(test)]
mod tests {
    use gab_config::NoPrompt;
    use gab_hooks::{HookSpec, task_fn};
    use gab_types::{Step, Verdict};

    use super::*;

    fn config(dir: &std::path::Path, autoload: &[&str]) -> GabConfig {
        let mut config = GabConfig::default();
        config.ini.dir = dir.to_path_buf();
        config.plugins.autoload = autoload.iter().map(|name| name.to_string()).collect();
        config
    }

    fn texts(console: &mut Console) -> Vec<String> {
        console.flush().into_iter().map(|message| message.text).collect()
    }

    #[test]
    fn test_admin_commands_from_console() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = Console::new("root", Some(Rank::Admin), &config(dir.path(), &["admin"]), &mut NoPrompt);
        assert!(console.host().is_loaded("admin"));

        console.handle_line_at("!load -p floodguard", 0);
        assert_eq!(texts(&mut console), vec!["Plugin (floodguard) successfully loaded."]);
        assert!(console.host().is_loaded("floodguard"));
    }

    #[test]
    fn test_rank_comes_from_roster() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("roster.ini"), "[ranks]\nalice = admin\n").unwrap();
        let mut config = config(dir.path(), &["admin"]);
        config.ini.preload.push("roster".into());

        let mut console = Console::new("bob", None, &config, &mut NoPrompt);
        console.handle_line_at("!load -i extra", 0);
        let replies = console.flush();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].is_error);
        assert!(!console.stores().loaded("extra"));

        let mut console = Console::new("alice", None, &config, &mut NoPrompt);
        console.handle_line_at("!load -i extra", 0);
        assert_eq!(texts(&mut console), vec!["I have successfully loaded the ini (extra)"]);
    }

    #[test]
    fn test_configured_plugins_are_autoloaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ini"), "[system]\nplugins = floodguard\n").unwrap();
        let console = Console::new("alice", None, &config(dir.path(), &[]), &mut NoPrompt);
        assert!(console.host().is_loaded("floodguard"));
        assert!(!console.host().is_loaded("admin"));
    }

    #[test]
    fn test_template_fills_config_on_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        std::fs::write(
            dir.path().join("templates").join("config.ini"),
            "[system]\nplugins = admin\n",
        )
        .unwrap();
        let console = Console::new("alice", None, &config(dir.path(), &[]), &mut NoPrompt);
        assert!(console.host().is_loaded("admin"));
        let saved = std::fs::read_to_string(dir.path().join("config.ini")).unwrap();
        assert!(saved.contains("plugins = admin"));
    }

    #[test]
    fn test_floodguard_stops_commands_too() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = Console::new(
            "root",
            Some(Rank::Admin),
            &config(dir.path(), &["admin", "floodguard"]),
            &mut NoPrompt,
        );
        for at in 0..5 {
            console.handle_line_at("hello", at);
        }
        assert!(texts(&mut console).is_empty());

        console.handle_line_at("!unload -p admin", 5);
        let replies = console.flush();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.contains("too quickly"));
        assert!(console.host().is_loaded("admin"));
    }

    #[test]
    fn test_send_hooks_can_drop_outgoing() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = Console::new("root", Some(Rank::Admin), &config(dir.path(), &["admin"]), &mut NoPrompt);
        console
            .host()
            .locations()
            .register(
                catalog::SEND_TO,
                HookSpec::new("censor", "censor.rs", |_| {
                    Box::new(task_fn(|event: &HookEvent| {
                        let secret = matches!(event, HookEvent::Outgoing { text, .. } if text.contains("secret"));
                        Ok(Step::Yield(Verdict::from(secret)))
                    }))
                }),
            )
            .unwrap();

        console.outbox.send("root", "a secret");
        console.outbox.send("root", "public");
        assert_eq!(texts(&mut console), vec!["public"]);
    }

    #[tokio::test]
    async fn test_join_ticker_reports_a_panicked_driver() {
        assert!(join_ticker(tokio::spawn(async {})).await);
        let panicked: JoinHandle<()> = tokio::spawn(async { panic!("timer callback blew up") });
        assert!(!join_ticker(panicked).await);
    }

    #[test]
    fn test_shutdown_unloads_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = Console::new("root", Some(Rank::Admin), &config(dir.path(), &["admin"]), &mut NoPrompt);
        console
            .stores()
            .set_entry("config", "system", "owner", "root")
            .unwrap();
        console.shutdown();
        assert_eq!(console.host().loaded().count(), 0);
        assert!(dir.path().join("config.ini").exists());
    }
}
