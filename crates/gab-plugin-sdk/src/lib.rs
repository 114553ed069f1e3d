//! gab Plugin SDK: what a plugin implements to contribute hooks and
//! commands to the bot.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use gab_plugin_sdk::{Command, CommandEnv, Mount, Plugin};
//! use gab_hooks::{HookSpec, task_fn};
//! use gab_types::{Step, Verdict};
//!
//! struct Echo;
//!
//! impl Command for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn run(&self, user: &str, args: &str, env: &mut CommandEnv<'_>) -> anyhow::Result<()> {
//!         env.reply(user, args);
//!         Ok(())
//!     }
//! }
//!
//! struct EchoPlugin;
//!
//! impl Plugin for EchoPlugin {
//!     fn mount(&mut self, mount: &mut Mount<'_>) -> anyhow::Result<()> {
//!         mount.command(Echo);
//!         mount.hook("ev_msg", HookSpec::new("log", mount.file(), |_| {
//!             Box::new(task_fn(|_| Ok(Step::Yield(Verdict::Pass))))
//!         }));
//!         Ok(())
//!     }
//! }
//! ```

pub mod command;
pub mod host;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use gab_config::ConfigStores;
use gab_hooks::{HookSpec, RegistryError};
use gab_types::{HookEvent, Outbox, Rank};

pub use command::{CommandRegistry, MountedCommand};
pub use host::{PluginFactory, PluginHost, PluginRegistration};

// ──────────────────── Commands ────────────────────

/// A chat command, invoked as `<prefix><name> <args>`.
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    /// Least rank allowed to run the command.
    fn rank(&self) -> Rank {
        Rank::User
    }

    fn help(&self) -> &str {
        ""
    }

    /// `args` is everything after the command name, trimmed.
    fn run(&self, user: &str, args: &str, env: &mut CommandEnv<'_>) -> anyhow::Result<()>;
}

/// What a running command can reach.
pub struct CommandEnv<'a> {
    pub stores: &'a mut ConfigStores,
    pub plugins: &'a mut dyn PluginControl,
    pub outbox: &'a Outbox,
}

impl CommandEnv<'_> {
    pub fn reply(&self, user: &str, text: impl Into<String>) -> bool {
        self.outbox.send(user, text)
    }

    pub fn error(&self, user: &str, text: impl Into<String>) -> bool {
        self.outbox.error(user, text)
    }
}

/// Plugin management as seen by commands.
pub trait PluginControl {
    /// Mount a plugin from the catalog, remounting it if already loaded.
    fn load_plugin(&mut self, name: &str) -> Result<(), PluginError>;
    fn unload_plugin(&mut self, name: &str) -> Result<(), PluginError>;
    fn is_loaded(&self, name: &str) -> bool;
    fn plugin_path(&self, name: &str) -> Option<PathBuf>;
}

// ──────────────────── Plugins ────────────────────

/// A mounted unit of hooks and commands.
pub trait Plugin: Send {
    /// Declare the plugin's hooks and commands.
    fn mount(&mut self, mount: &mut Mount<'_>) -> anyhow::Result<()>;

    /// Called when the plugin is unmounted, before its hooks are retired.
    fn exit(&mut self) {}
}

/// Collects what a plugin contributes while it is being mounted.
pub struct Mount<'a> {
    file: &'a Path,
    hooks: Vec<(String, HookSpec<HookEvent>)>,
    commands: Vec<Arc<dyn Command>>,
}

impl<'a> Mount<'a> {
    pub fn new(file: &'a Path) -> Self {
        Self {
            file,
            hooks: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Source file the plugin is registered under; hooks should carry it.
    pub fn file(&self) -> &'a Path {
        self.file
    }

    pub fn hook(&mut self, location: &str, spec: HookSpec<HookEvent>) -> &mut Self {
        self.hooks.push((location.to_string(), spec));
        self
    }

    pub fn command(&mut self, command: impl Command + 'static) -> &mut Self {
        self.commands.push(Arc::new(command));
        self
    }

    pub(crate) fn into_parts(self) -> (Vec<(String, HookSpec<HookEvent>)>, Vec<Arc<dyn Command>>) {
        (self.hooks, self.commands)
    }
}

// ──────────────────── Errors ────────────────────

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no plugin named {0}")]
    NotFound(String),
    #[error("plugin already loaded: {0}")]
    AlreadyLoaded(String),
    #[error("plugin not loaded: {0}")]
    NotLoaded(String),
    #[error("plugin {plugin} could not register a hook: {source}")]
    Registry {
        plugin: String,
        #[source]
        source: RegistryError,
    },
    #[error("plugin {plugin} failed to mount: {source}")]
    Failed {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command} requires rank {required}")]
    Forbidden { command: String, required: Rank },
    #[error("{command} failed: {source}")]
    Failed {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}
