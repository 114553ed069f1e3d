//! Command mount: name lookup, prefix parsing and rank checks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use gab_types::Rank;

use crate::{Command, CommandError};

/// A registered command and the plugin file it came from.
#[derive(Clone)]
pub struct MountedCommand {
    pub command: Arc<dyn Command>,
    pub file: PathBuf,
}

impl std::fmt::Debug for MountedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountedCommand")
            .field("name", &self.command.name())
            .field("rank", &self.command.rank())
            .field("file", &self.file)
            .finish()
    }
}

/// Commands keyed by lowercase name, in mount order.
#[derive(Debug)]
pub struct CommandRegistry {
    prefix: String,
    commands: IndexMap<String, MountedCommand>,
}

impl CommandRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            commands: IndexMap::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Mount a command. A command of the same name is replaced.
    pub fn register(&mut self, command: Arc<dyn Command>, file: &Path) {
        let name = command.name().to_lowercase();
        info!(command = %name, rank = %command.rank(), file = %file.display(), "Command registered");
        let mounted = MountedCommand {
            command,
            file: file.to_path_buf(),
        };
        if self.commands.insert(name, mounted).is_some() {
            debug!("Replaced an existing command of the same name");
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.commands.shift_remove(&name.to_lowercase()).is_some()
    }

    /// Drop every command mounted from `file`. Returns how many were removed.
    pub fn unregister_file(&mut self, file: &Path) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, mounted| mounted.file != file);
        before - self.commands.len()
    }

    pub fn get(&self, name: &str) -> Option<&MountedCommand> {
        self.commands.get(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Split `<prefix><name> <args>` into name and trimmed args.
    /// `None` if the line does not start with the prefix or names nothing.
    pub fn parse<'l>(&self, line: &'l str) -> Option<(&'l str, &'l str)> {
        let rest = line.trim_start().strip_prefix(self.prefix.as_str())?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest.trim_end(), ""),
        };
        (!name.is_empty()).then_some((name, args))
    }

    /// Find `name` and check that `rank` may run it.
    pub fn resolve(&self, name: &str, rank: Rank) -> Result<Arc<dyn Command>, CommandError> {
        let mounted = self
            .get(name)
            .ok_or_else(|| CommandError::Unknown(name.to_lowercase()))?;
        let required = mounted.command.rank();
        if rank < required {
            return Err(CommandError::Forbidden {
                command: mounted.command.name().to_string(),
                required,
            });
        }
        Ok(Arc::clone(&mounted.command))
    }

    /// `name - help` lines for every command `rank` may run.
    pub fn help_for(&self, rank: Rank) -> Vec<String> {
        self.commands
            .iter()
            .filter(|(_, mounted)| mounted.command.rank() <= rank)
            .map(|(name, mounted)| match mounted.command.help() {
                "" => name.clone(),
                help => format!("{name} - {help}"),
            })
            .collect()
    }
}
