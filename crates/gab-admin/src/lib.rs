//! Administrative commands: `reload`, `load` and `unload` for ini stores
//! and plugins.
//!
//! ```text
//! !reload -i            re-read every ini store
//! !reload -p            reload the plugins listed in config.ini [system] plugins
//! !load -i roster       load roster.ini
//! !unload -p floodguard unmount a plugin
//! !reload -a            same as -p -i
//! ```

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use tracing::{error, info};

use gab_config::ConfigStores;
use gab_plugin_sdk::{
    Command, CommandEnv, Mount, Plugin, PluginError, PluginRegistration,
};
use gab_types::Rank;

/// Catalog name of the admin plugin.
pub const PLUGIN_NAME: &str = "admin";

const USE_ONE_ARGUMENT: &str = "Please use one of the arguments. Ex. -p user, -i roster";

/// Flags shared by `reload`, `load` and `unload`.
#[derive(Debug, Parser)]
#[command(name = "!(re|un)load", disable_help_flag = true)]
struct LoadArgs {
    /// Stray positional; always rejected.
    #[arg(value_name = "command")]
    extra: Option<String>,

    /// Equivalent to -p -i
    #[arg(short, long)]
    all: bool,

    /// (re|un)load plugins
    #[arg(short, long, value_name = "plugin_name")]
    plugin: Option<Option<String>>,

    /// (re|un)load inis
    #[arg(short, long, value_name = "ini_name")]
    ini: Option<Option<String>>,
}

/// What one flag asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Nothing,
    All,
    Named(String),
}

impl From<Option<Option<String>>> for Target {
    fn from(flag: Option<Option<String>>) -> Self {
        match flag {
            None => Self::Nothing,
            Some(None) => Self::All,
            Some(Some(name)) => Self::Named(name),
        }
    }
}

#[derive(Debug)]
struct Request {
    ini: Target,
    plugin: Target,
}

/// Parse command arguments, lowercased. `Ok(None)` means a stray
/// positional was given.
fn parse_request(args: &str) -> Result<Option<Request>, clap::Error> {
    let lowered = args.to_lowercase();
    let parsed = LoadArgs::try_parse_from(
        std::iter::once("load").chain(lowered.split_whitespace()),
    )?;
    if parsed.extra.is_some() {
        return Ok(None);
    }
    let mut request = Request {
        ini: parsed.ini.into(),
        plugin: parsed.plugin.into(),
    };
    if parsed.all {
        if request.ini == Target::Nothing {
            request.ini = Target::All;
        }
        if request.plugin == Target::Nothing {
            request.plugin = Target::All;
        }
    }
    Ok(Some(request))
}

fn usage(summary: &str, prog: &'static str) -> String {
    let mut command = LoadArgs::command().name(prog);
    format!("{summary}\n{}", command.render_help())
}

/// Parse `args` or tell the user what went wrong.
fn request_or_reply(user: &str, args: &str, env: &CommandEnv<'_>) -> Option<Request> {
    match parse_request(args) {
        Ok(Some(request)) => Some(request),
        Ok(None) => {
            env.error(user, USE_ONE_ARGUMENT);
            None
        }
        Err(e) => {
            env.error(user, e.render().to_string());
            None
        }
    }
}

fn report_load_failure(user: &str, name: &str, e: &PluginError, env: &CommandEnv<'_>) {
    match e {
        PluginError::NotFound(_) => {
            env.error(user, format!("The plugin \"{name}\" could not be found."));
        }
        other => {
            error!(plugin = name, "Plugin failed to load: {other}");
            env.error(
                user,
                format!("There was an error loading the plugin ({name}). The details have been logged."),
            );
        }
    }
}

/// Plugins named in `config.ini` under `[system] plugins`.
pub fn configured_plugins(stores: &ConfigStores) -> Vec<String> {
    stores
        .get("config")
        .and_then(|config| config.get("system", "plugins"))
        .map(|plugins| {
            plugins
                .iter()
                .flat_map(|entry| entry.split_whitespace())
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

/// Rank of `user` from `roster.ini` `[ranks]`; `user` when unlisted.
pub fn rank_of(stores: &ConfigStores, user: &str) -> Rank {
    stores
        .get("roster")
        .and_then(|roster| roster.first("ranks", &user.to_lowercase()))
        .and_then(|rank| rank.parse().ok())
        .unwrap_or_default()
}

// ──────────────────── reload ────────────────────

pub struct Reload {
    help: String,
}

impl Reload {
    pub fn new() -> Self {
        Self {
            help: usage("Reload parts of the bot.", "!reload"),
        }
    }
}

impl Default for Reload {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Reload {
    fn name(&self) -> &str {
        "reload"
    }

    fn rank(&self) -> Rank {
        Rank::Admin
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn run(&self, user: &str, args: &str, env: &mut CommandEnv<'_>) -> anyhow::Result<()> {
        let Some(request) = request_or_reply(user, args, env) else {
            return Ok(());
        };

        match &request.ini {
            Target::Nothing => {}
            Target::All => match env.stores.readall() {
                Ok(_) => {
                    env.reply(user, "I have read all ini's");
                }
                Err(e) => {
                    error!("Failed to re-read ini stores: {e}");
                    env.error(user, format!("I couldn't read every ini: {e}"));
                }
            },
            Target::Named(name) => match env.stores.read(name) {
                Ok(()) => {
                    env.reply(user, format!("I have read the ini ({name})"));
                }
                Err(e) => {
                    env.error(user, format!("I can't read the ini ({name}): {e}"));
                }
            },
        }

        let targets = match &request.plugin {
            Target::Nothing => return Ok(()),
            Target::All => configured_plugins(env.stores),
            Target::Named(name) => vec![name.clone()],
        };
        let mut loaded = Vec::new();
        for name in targets {
            match env.plugins.load_plugin(&name) {
                Ok(()) => loaded.push(name),
                Err(e) => report_load_failure(user, &name, &e, env),
            }
        }
        if loaded.is_empty() {
            loaded.push("None to be refreshed.".to_string());
        }
        info!(user, plugins = ?loaded, "Plugins reloaded");
        env.reply(user, format!("Plugins reloaded: {}", loaded.join(" ")));
        Ok(())
    }
}

// ──────────────────── load ────────────────────

pub struct Load {
    help: String,
}

impl Load {
    pub fn new() -> Self {
        Self {
            help: usage("Load parts of the bot.", "!load"),
        }
    }
}

impl Default for Load {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Load {
    fn name(&self) -> &str {
        "load"
    }

    fn rank(&self) -> Rank {
        Rank::Admin
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn run(&self, user: &str, args: &str, env: &mut CommandEnv<'_>) -> anyhow::Result<()> {
        let Some(request) = request_or_reply(user, args, env) else {
            return Ok(());
        };

        match &request.ini {
            Target::Nothing => {}
            Target::All => {
                env.error(user, "You must pass the name of an ini to load.");
            }
            Target::Named(name) => {
                if env.stores.load(name, &[]) {
                    env.reply(user, format!("I have successfully loaded the ini ({name})"));
                } else {
                    env.reply(user, format!("I can't load the ini ({name})"));
                }
            }
        }

        match &request.plugin {
            Target::Nothing => {}
            Target::All => {
                env.error(user, "You must pass the name of a plugin to load.");
            }
            Target::Named(name) if env.plugins.is_loaded(name) => {
                env.error(
                    user,
                    "This plugin has already been loaded. To update it please use '!reload -p'",
                );
            }
            Target::Named(name) => match env.plugins.load_plugin(name) {
                Ok(()) => {
                    env.reply(user, format!("Plugin ({name}) successfully loaded."));
                }
                Err(e) => report_load_failure(user, name, &e, env),
            },
        }
        Ok(())
    }
}

// ──────────────────── unload ────────────────────

pub struct Unload {
    help: String,
}

impl Unload {
    pub fn new() -> Self {
        Self {
            help: usage("Unload parts of the bot.", "!unload"),
        }
    }
}

impl Default for Unload {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Unload {
    fn name(&self) -> &str {
        "unload"
    }

    fn rank(&self) -> Rank {
        Rank::Admin
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn run(&self, user: &str, args: &str, env: &mut CommandEnv<'_>) -> anyhow::Result<()> {
        let Some(request) = request_or_reply(user, args, env) else {
            return Ok(());
        };

        match &request.ini {
            Target::Nothing => {}
            Target::All => {
                env.error(user, "You must pass the name of an ini to unload.");
            }
            Target::Named(name) => {
                if env.stores.unload(name, false) {
                    env.reply(user, format!("I have successfully unloaded the ini ({name})"));
                } else {
                    env.reply(user, format!("I can't unload the ini ({name})"));
                }
            }
        }

        match &request.plugin {
            Target::Nothing => {}
            Target::All => {
                env.error(user, "You must pass the name of a plugin to unload.");
            }
            Target::Named(name) => {
                if !env.plugins.is_loaded(name) {
                    env.error(
                        user,
                        format!("Plugin ({name}) hasn't been loaded or was spelled wrong."),
                    );
                    return Ok(());
                }
                if env.plugins.plugin_path(name).is_none() {
                    env.error(
                        user,
                        "I have that plugin loaded but I can't find the file to unload it.",
                    );
                    return Ok(());
                }
                env.plugins.unload_plugin(name)?;
                env.reply(user, format!("Unloaded plugin ({name})"));
            }
        }
        Ok(())
    }
}

// ──────────────────── plugin ────────────────────

/// Mounts the three administrative commands.
#[derive(Debug, Default)]
pub struct AdminPlugin;

impl Plugin for AdminPlugin {
    fn mount(&mut self, mount: &mut Mount<'_>) -> anyhow::Result<()> {
        mount
            .command(Reload::new())
            .command(Load::new())
            .command(Unload::new());
        Ok(())
    }
}

/// Catalog entry for [`AdminPlugin`].
pub fn registration() -> PluginRegistration {
    PluginRegistration::new(PLUGIN_NAME, PathBuf::from(file!()), || {
        Ok(Box::new(AdminPlugin) as Box<dyn Plugin>)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gab_hooks::Locations;
    use gab_plugin_sdk::{PluginControl, PluginHost};
    use gab_types::{OutboundMessage, Outbox};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    struct Quiet;

    impl Plugin for Quiet {
        fn mount(&mut self, _mount: &mut Mount<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        stores: ConfigStores,
        host: PluginHost,
        outbox: Outbox,
        rx: UnboundedReceiver<OutboundMessage>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let stores = ConfigStores::new(dir.path());
            let mut host = PluginHost::new(Arc::new(Locations::with_standard_locations()), "!");
            host.register(registration());
            host.register(PluginRegistration::new("quiet", "plugins/quiet.rs", || {
                Ok(Box::new(Quiet) as Box<dyn Plugin>)
            }));
            host.load_plugin(PLUGIN_NAME).unwrap();
            let (outbox, rx) = Outbox::channel();
            Self {
                _dir: dir,
                stores,
                host,
                outbox,
                rx,
            }
        }

        fn run(&mut self, line: &str) -> Vec<OutboundMessage> {
            self.host
                .handle_command("root", Rank::Admin, line, &mut self.stores, &self.outbox)
                .unwrap()
                .unwrap();
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }

        fn texts(&mut self, line: &str) -> Vec<String> {
            self.run(line).into_iter().map(|m| m.text).collect()
        }
    }

    #[test]
    fn test_parse_request_flags() {
        let request = parse_request("-p -i Roster").unwrap().unwrap();
        assert_eq!(request.plugin, Target::All);
        assert_eq!(request.ini, Target::Named("roster".into()));

        let request = parse_request("-a").unwrap().unwrap();
        assert_eq!(request.plugin, Target::All);
        assert_eq!(request.ini, Target::All);

        let request = parse_request("-a -p quiet").unwrap().unwrap();
        assert_eq!(request.plugin, Target::Named("quiet".into()));

        let request = parse_request("").unwrap().unwrap();
        assert_eq!(request.plugin, Target::Nothing);
        assert_eq!(request.ini, Target::Nothing);

        assert!(parse_request("restart").unwrap().is_none());
        assert!(parse_request("--bogus").is_err());
    }

    #[test]
    fn test_stray_positional_is_rejected() {
        let mut harness = Harness::new();
        let replies = harness.run("!reload everything");
        assert_eq!(replies.len(), 1);
        assert!(replies[0].is_error);
        assert_eq!(replies[0].text, USE_ONE_ARGUMENT);
    }

    #[test]
    fn test_commands_require_admin() {
        let mut harness = Harness::new();
        let result = harness.host.handle_command(
            "alice",
            Rank::Moderator,
            "!load -p quiet",
            &mut harness.stores,
            &harness.outbox,
        );
        assert!(result.unwrap().is_err());
        assert!(!harness.host.is_loaded("quiet"));
    }

    #[test]
    fn test_load_and_unload_plugin() {
        let mut harness = Harness::new();
        assert_eq!(harness.texts("!load -p quiet"), vec!["Plugin (quiet) successfully loaded."]);
        assert!(harness.host.is_loaded("quiet"));
        assert_eq!(
            harness.texts("!load -p quiet"),
            vec!["This plugin has already been loaded. To update it please use '!reload -p'"]
        );
        assert_eq!(harness.texts("!load -p"), vec!["You must pass the name of a plugin to load."]);
        assert_eq!(
            harness.texts("!load -p ghost"),
            vec!["The plugin \"ghost\" could not be found."]
        );

        assert_eq!(harness.texts("!unload -p QUIET"), vec!["Unloaded plugin (quiet)"]);
        assert!(!harness.host.is_loaded("quiet"));
        assert_eq!(
            harness.texts("!unload -p quiet"),
            vec!["Plugin (quiet) hasn't been loaded or was spelled wrong."]
        );
    }

    #[test]
    fn test_load_and_unload_ini() {
        let mut harness = Harness::new();
        assert_eq!(
            harness.texts("!load -i roster"),
            vec!["I have successfully loaded the ini (roster)"]
        );
        assert!(harness.stores.loaded("roster"));
        assert_eq!(harness.texts("!load -i"), vec!["You must pass the name of an ini to load."]);
        assert_eq!(
            harness.texts("!unload -i roster"),
            vec!["I have successfully unloaded the ini (roster)"]
        );
        assert_eq!(harness.texts("!unload -i roster"), vec!["I can't unload the ini (roster)"]);
    }

    #[test]
    fn test_reload_configured_plugins() {
        let mut harness = Harness::new();
        harness.stores.load("config", &[]);
        harness
            .stores
            .add_entry("config", "system", "plugins", "quiet")
            .unwrap();
        harness
            .stores
            .add_entry("config", "system", "plugins", "ghost")
            .unwrap();

        let replies = harness.texts("!reload -p");
        assert_eq!(
            replies,
            vec![
                "The plugin \"ghost\" could not be found.".to_string(),
                "Plugins reloaded: quiet".to_string(),
            ]
        );
        assert!(harness.host.is_loaded("quiet"));
    }

    #[test]
    fn test_reload_nothing_to_refresh() {
        let mut harness = Harness::new();
        assert_eq!(harness.texts("!reload -p"), vec!["Plugins reloaded: None to be refreshed."]);
    }

    #[test]
    fn test_reload_all_reads_inis_then_plugins() {
        let mut harness = Harness::new();
        harness.stores.load("roster", &[]);
        assert_eq!(
            harness.texts("!reload -a"),
            vec!["I have read all ini's", "Plugins reloaded: None to be refreshed."]
        );
        assert_eq!(
            harness.texts("!reload -i roster"),
            vec!["I have read the ini (roster)"]
        );
    }

    #[test]
    fn test_admin_can_reload_itself() {
        let mut harness = Harness::new();
        assert_eq!(harness.texts("!reload -p admin"), vec!["Plugins reloaded: admin"]);
        assert!(harness.host.commands().get("reload").is_some());
    }

    #[test]
    fn test_rank_of_reads_roster() {
        let mut harness = Harness::new();
        harness.stores.load("roster", &[]);
        harness
            .stores
            .set_entry("roster", "ranks", "root", "admin")
            .unwrap();
        assert_eq!(rank_of(&harness.stores, "ROOT"), Rank::Admin);
        assert_eq!(rank_of(&harness.stores, "alice"), Rank::User);
    }

    #[test]
    fn test_help_mentions_flags() {
        let reload = Reload::new();
        assert!(reload.help().starts_with("Reload parts of the bot."));
        assert!(reload.help().contains("--plugin"));
    }
}
