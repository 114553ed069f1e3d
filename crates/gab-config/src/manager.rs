//! Named ini stores shared across the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::ConfigError;
use crate::ini::IniFile;
use crate::template::{Prompter, merge_template};

/// Registry of loaded ini stores, keyed by lowercase name.
///
/// `<name>.ini` files live under `root` (optionally in sub-folders), and
/// templates under `root/<templates>`.
#[derive(Debug)]
pub struct ConfigStores {
    root: PathBuf,
    templates: String,
    stores: HashMap<String, IniFile>,
}

impl ConfigStores {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_templates(root, "templates")
    }

    pub fn with_templates(root: impl Into<PathBuf>, templates: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            templates: templates.into(),
            stores: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, name: &str, subfolders: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(subfolders);
        path.push(format!("{name}.ini"));
        path
    }

    /// Load `<name>.ini` and make it available under `name`.
    /// Returns `false` if the file could not be read.
    pub fn load(&mut self, name: &str, subfolders: &[&str]) -> bool {
        let name = name.to_lowercase();
        let path = self.file_path(&name, subfolders);
        match IniFile::open(&path) {
            Ok(ini) => {
                info!(store = %name, path = %path.display(), "Ini store loaded");
                self.stores.insert(name, ini);
                true
            }
            Err(e) => {
                warn!(store = %name, path = %path.display(), "Failed to load ini store: {e}");
                false
            }
        }
    }

    pub fn loaded(&self, name: &str) -> bool {
        self.stores.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&IniFile> {
        self.stores.get(&name.to_lowercase())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut IniFile> {
        self.stores.get_mut(&name.to_lowercase())
    }

    /// Drop a store, saving it first if asked. Returns `false` if it was not
    /// loaded, or if the requested save failed (the store then stays loaded).
    pub fn unload(&mut self, name: &str, save: bool) -> bool {
        let name = name.to_lowercase();
        let Some(ini) = self.stores.get(&name) else {
            return false;
        };
        if save {
            if let Err(e) = ini.save() {
                error!(store = %name, "Failed to save ini store before unloading: {e}");
                return false;
            }
        }
        self.stores.remove(&name);
        info!(store = %name, "Ini store unloaded");
        true
    }

    /// Save store `name` under `<new_name>.ini` in the same folder and
    /// register it under the new name.
    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<(), ConfigError> {
        let name = name.to_lowercase();
        let new_name = new_name.to_lowercase();
        let mut ini = self
            .stores
            .remove(&name)
            .ok_or_else(|| ConfigError::NotLoaded(name.clone()))?;
        let new_path = ini.path().with_file_name(format!("{new_name}.ini"));
        ini.set_path(new_path);
        let saved = ini.save();
        self.stores.insert(new_name, ini);
        saved
    }

    /// Re-read one store from disk.
    pub fn read(&mut self, name: &str) -> Result<(), ConfigError> {
        self.get_mut(name)
            .ok_or_else(|| ConfigError::NotLoaded(name.to_lowercase()))?
            .read()
    }

    /// Re-read every loaded store. Returns how many were read.
    pub fn readall(&mut self) -> Result<usize, ConfigError> {
        for ini in self.stores.values_mut() {
            ini.read()?;
        }
        Ok(self.stores.len())
    }

    /// Save every loaded store. Returns how many were saved.
    pub fn saveall(&self) -> Result<usize, ConfigError> {
        for ini in self.stores.values() {
            ini.save()?;
        }
        Ok(self.stores.len())
    }

    /// `false` when the store is not loaded.
    pub fn has_entry(&self, name: &str, section: &str, key: &str, entry: &str) -> bool {
        self.get(name)
            .is_some_and(|ini| ini.has_entry(section, key, entry))
    }

    /// `Ok(false)` when the store is not loaded or the entry exists.
    pub fn add_entry(&mut self, name: &str, section: &str, key: &str, entry: &str) -> Result<bool, ConfigError> {
        match self.get_mut(name) {
            Some(ini) => ini.add_entry(section, key, entry),
            None => Ok(false),
        }
    }

    /// `Ok(false)` when the store is not loaded or the entry is missing.
    pub fn del_entry(&mut self, name: &str, section: &str, key: &str, entry: &str) -> Result<bool, ConfigError> {
        match self.get_mut(name) {
            Some(ini) => ini.del_entry(section, key, entry),
            None => Ok(false),
        }
    }

    /// `Ok(false)` when the store is not loaded.
    pub fn set_entry(&mut self, name: &str, section: &str, key: &str, entry: &str) -> Result<bool, ConfigError> {
        match self.get_mut(name) {
            Some(ini) => ini.set_entry(section, key, entry),
            None => Ok(false),
        }
    }

    /// Read the template for `name` from the templates folder.
    pub fn template(&self, name: &str) -> Result<IniFile, ConfigError> {
        IniFile::open(self.file_path(&name.to_lowercase(), &[self.templates.as_str()]))
    }

    /// Fill store `name`'s missing keys from `template` and save it.
    /// Returns how many keys were filled.
    pub fn merge_template(
        &mut self,
        name: &str,
        template: &IniFile,
        prompter: &mut dyn Prompter,
    ) -> Result<usize, ConfigError> {
        let ini = self
            .get_mut(name)
            .ok_or_else(|| ConfigError::NotLoaded(name.to_lowercase()))?;
        let filled = merge_template(ini, template, prompter);
        if filled > 0 {
            ini.save()?;
        }
        Ok(filled)
    }
}
