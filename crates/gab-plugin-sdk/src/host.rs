//! Plugin host: a catalog of plugin factories and the set currently mounted.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{error, info, warn};

use gab_config::ConfigStores;
use gab_hooks::Locations;
use gab_types::{HookEvent, Outbox, Rank};

use crate::command::CommandRegistry;
use crate::{CommandEnv, CommandError, Mount, Plugin, PluginControl, PluginError};

/// Builds a fresh plugin instance on every mount.
pub type PluginFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn Plugin>> + Send + Sync>;

/// A plugin the host knows how to mount.
pub struct PluginRegistration {
    pub name: String,
    /// Identifies everything the plugin contributes, for retirement.
    pub file: PathBuf,
    pub factory: PluginFactory,
}

impl PluginRegistration {
    pub fn new<F>(name: impl Into<String>, file: impl Into<PathBuf>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            name: name.into().to_lowercase(),
            file: file.into(),
            factory: Box::new(factory),
        }
    }
}

struct Mounted {
    plugin: Box<dyn Plugin>,
    file: PathBuf,
}

/// Mounts plugins into the hook registry and the command registry.
pub struct PluginHost {
    catalog: IndexMap<String, PluginRegistration>,
    loaded: IndexMap<String, Mounted>,
    locations: Arc<Locations<HookEvent>>,
    commands: CommandRegistry,
}

impl PluginHost {
    pub fn new(locations: Arc<Locations<HookEvent>>, prefix: impl Into<String>) -> Self {
        Self {
            catalog: IndexMap::new(),
            loaded: IndexMap::new(),
            locations,
            commands: CommandRegistry::new(prefix),
        }
    }

    /// Add a plugin to the catalog. Replaces a registration of the same name;
    /// a mounted instance stays mounted until reloaded.
    pub fn register(&mut self, registration: PluginRegistration) {
        info!(plugin = %registration.name, file = %registration.file.display(), "Plugin registered");
        self.catalog.insert(registration.name.clone(), registration);
    }

    pub fn available(&self) -> impl Iterator<Item = &str> {
        self.catalog.keys().map(String::as_str)
    }

    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    pub fn locations(&self) -> &Arc<Locations<HookEvent>> {
        &self.locations
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    fn mount(&mut self, name: &str) -> Result<(), PluginError> {
        let registration = self
            .catalog
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        let file = registration.file.clone();
        let failed = |source| PluginError::Failed {
            plugin: name.to_string(),
            source,
        };

        let mut plugin = (registration.factory)().map_err(failed)?;
        let mut mount = Mount::new(&file);
        plugin.mount(&mut mount).map_err(failed)?;
        let (hooks, commands) = mount.into_parts();

        for (location, spec) in hooks {
            if let Err(source) = self.locations.register(&location, spec) {
                self.locations.retire_file(&file);
                return Err(PluginError::Registry {
                    plugin: name.to_string(),
                    source,
                });
            }
        }
        for command in commands {
            self.commands.register(command, &file);
        }
        info!(plugin = name, file = %file.display(), "Plugin loaded");
        self.loaded.insert(name.to_string(), Mounted { plugin, file });
        Ok(())
    }

    fn unmount(&mut self, name: &str) -> Result<(), PluginError> {
        let mut mounted = self
            .loaded
            .shift_remove(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        mounted.plugin.exit();
        let hooks = self.locations.retire_file(&mounted.file);
        let commands = self.commands.unregister_file(&mounted.file);
        info!(plugin = name, hooks, commands, "Plugin unloaded");
        Ok(())
    }

    /// Run a command line for `user`.
    ///
    /// `None` when the line is not a command; the caller then treats it as
    /// an ordinary message.
    pub fn handle_command(
        &mut self,
        user: &str,
        rank: Rank,
        line: &str,
        stores: &mut ConfigStores,
        outbox: &Outbox,
    ) -> Option<Result<(), CommandError>> {
        let (name, args) = self.commands.parse(line)?;
        let command = match self.commands.resolve(name, rank) {
            Ok(command) => command,
            Err(e) => {
                warn!(user, command = name, "Command refused: {e}");
                return Some(Err(e));
            }
        };
        let mut env = CommandEnv {
            stores,
            plugins: self,
            outbox,
        };
        let result = command
            .run(user, args, &mut env)
            .map_err(|source| CommandError::Failed {
                command: command.name().to_string(),
                source,
            });
        if let Err(e) = &result {
            error!(user, "{e}");
        }
        Some(result)
    }
}

impl PluginControl for PluginHost {
    fn load_plugin(&mut self, name: &str) -> Result<(), PluginError> {
        let name = name.to_lowercase();
        if self.loaded.contains_key(&name) {
            self.unmount(&name)?;
        }
        self.mount(&name)
    }

    fn unload_plugin(&mut self, name: &str) -> Result<(), PluginError> {
        self.unmount(&name.to_lowercase())
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(&name.to_lowercase())
    }

    fn plugin_path(&self, name: &str) -> Option<PathBuf> {
        self.catalog
            .get(&name.to_lowercase())
            .map(|registration| registration.file.clone())
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("catalog", &self.catalog.keys().collect::<Vec<_>>())
            .field("loaded", &self.loaded.keys().collect::<Vec<_>>())
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use gab_hooks::{HookSpec, UserContext, catalog, task_fn};
    use gab_types::{Step, Verdict};

    use super::*;
    use crate::Command;

    struct Shout;

    impl Command for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn run(&self, user: &str, args: &str, env: &mut CommandEnv<'_>) -> anyhow::Result<()> {
            env.reply(user, args.to_uppercase());
            Ok(())
        }
    }

    /// Loads another plugin from inside a command.
    struct LoadOther;

    impl Command for LoadOther {
        fn name(&self) -> &str {
            "loadother"
        }

        fn rank(&self) -> Rank {
            Rank::Admin
        }

        fn run(&self, _user: &str, args: &str, env: &mut CommandEnv<'_>) -> anyhow::Result<()> {
            env.plugins.load_plugin(args)?;
            Ok(())
        }
    }

    struct Swallow {
        exits: Arc<AtomicUsize>,
    }

    impl Plugin for Swallow {
        fn mount(&mut self, mount: &mut Mount<'_>) -> anyhow::Result<()> {
            mount
                .hook(
                    catalog::EV_MSG,
                    HookSpec::new("swallow", mount.file(), |_| {
                        Box::new(task_fn(|_: &HookEvent| Ok(Step::Yield(Verdict::Consume))))
                    }),
                )
                .command(Shout);
            Ok(())
        }

        fn exit(&mut self) {
            self.exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Admin;

    impl Plugin for Admin {
        fn mount(&mut self, mount: &mut Mount<'_>) -> anyhow::Result<()> {
            mount.command(LoadOther);
            Ok(())
        }
    }

    struct BadLocation;

    impl Plugin for BadLocation {
        fn mount(&mut self, mount: &mut Mount<'_>) -> anyhow::Result<()> {
            let file = mount.file();
            mount
                .hook(catalog::EV_MSG, HookSpec::new("first", file, |_| {
                    Box::new(task_fn(|_: &HookEvent| Ok(Step::Complete)))
                }))
                .hook("no_such_location", HookSpec::new("second", file, |_| {
                    Box::new(task_fn(|_: &HookEvent| Ok(Step::Complete)))
                }));
            Ok(())
        }
    }

    fn host() -> (PluginHost, Arc<AtomicUsize>) {
        let locations = Arc::new(Locations::with_standard_locations());
        let mut host = PluginHost::new(locations, "!");
        let exits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&exits);
        host.register(PluginRegistration::new("Swallow", "plugins/swallow.rs", move || {
            Ok(Box::new(Swallow {
                exits: Arc::clone(&counter),
            }) as Box<dyn Plugin>)
        }));
        host.register(PluginRegistration::new("admin", "plugins/admin.rs", || {
            Ok(Box::new(Admin) as Box<dyn Plugin>)
        }));
        host.register(PluginRegistration::new("bad", "plugins/bad.rs", || {
            Ok(Box::new(BadLocation) as Box<dyn Plugin>)
        }));
        host.register(PluginRegistration::new("broken", "plugins/broken.rs", || {
            anyhow::bail!("missing dependency")
        }));
        (host, exits)
    }

    fn message(from: &str) -> HookEvent {
        HookEvent::Message {
            from: from.into(),
            resource: None,
            body: "hi".into(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_load_mounts_hooks_and_commands() {
        let (mut host, _) = host();
        host.load_plugin("swallow").unwrap();
        assert!(host.is_loaded("SWALLOW"));
        assert!(host.locations().contains_hook(catalog::EV_MSG, "swallow"));
        assert!(host.commands().get("shout").is_some());

        let driver = UserContext::new("alice");
        assert!(host.locations().evaluate(catalog::EV_MSG, &driver, &message("alice")));
    }

    #[test]
    fn test_unload_retires_everything() {
        let (mut host, exits) = host();
        host.load_plugin("swallow").unwrap();
        let driver = UserContext::new("alice");
        host.locations().evaluate(catalog::EV_MSG, &driver, &message("alice"));

        host.unload_plugin("swallow").unwrap();
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert!(!host.is_loaded("swallow"));
        assert!(!host.locations().contains_hook(catalog::EV_MSG, "swallow"));
        assert!(host.commands().is_empty());
        assert!(matches!(
            host.unload_plugin("swallow"),
            Err(PluginError::NotLoaded(_))
        ));
    }

    #[test]
    fn test_load_twice_reloads() {
        let (mut host, exits) = host();
        host.load_plugin("swallow").unwrap();
        host.load_plugin("swallow").unwrap();
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert_eq!(host.loaded().collect::<Vec<_>>(), vec!["swallow"]);
        assert_eq!(host.locations().hooks(catalog::EV_MSG).len(), 1);
    }

    #[test]
    fn test_failed_mounts_leave_nothing_behind() {
        let (mut host, _) = host();
        assert!(matches!(host.load_plugin("nope"), Err(PluginError::NotFound(_))));
        assert!(matches!(host.load_plugin("broken"), Err(PluginError::Failed { .. })));
        assert!(matches!(
            host.load_plugin("bad"),
            Err(PluginError::Registry { .. })
        ));
        assert!(!host.is_loaded("bad"));
        assert!(!host.locations().contains_hook(catalog::EV_MSG, "first"));
        assert_eq!(host.loaded().count(), 0);
    }

    #[test]
    fn test_plugin_path() {
        let (host, _) = host();
        assert_eq!(host.plugin_path("Admin"), Some(PathBuf::from("plugins/admin.rs")));
        assert_eq!(host.plugin_path("ghost"), None);
    }

    #[test]
    fn test_handle_command_routes_and_checks_rank() {
        let dir = tempfile::tempdir().unwrap();
        let mut stores = ConfigStores::new(dir.path());
        let (outbox, mut rx) = Outbox::channel();
        let (mut host, _) = host();
        host.load_plugin("admin").unwrap();

        assert!(host
            .handle_command("alice", Rank::User, "hello there", &mut stores, &outbox)
            .is_none());
        assert!(matches!(
            host.handle_command("alice", Rank::User, "!loadother swallow", &mut stores, &outbox),
            Some(Err(CommandError::Forbidden { .. }))
        ));
        assert!(!host.is_loaded("swallow"));

        host.handle_command("root", Rank::Admin, "!loadother swallow", &mut stores, &outbox)
            .unwrap()
            .unwrap();
        assert!(host.is_loaded("swallow"));

        host.handle_command("alice", Rank::User, "!shout hey", &mut stores, &outbox)
            .unwrap()
            .unwrap();
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.recipient, "alice");
        assert_eq!(reply.text, "HEY");

        assert!(matches!(
            host.handle_command("root", Rank::Admin, "!loadother ghost", &mut stores, &outbox),
            Some(Err(CommandError::Failed { .. }))
        ));
    }
}
