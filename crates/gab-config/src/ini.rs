//! Ini-backed store: `section → key → ordered list of entries`.
//!
//! File format:
//!
//! ```ini
//! [system]
//! # Plugins mounted at start-up
//! plugins = admin
//! plugins = floodguard
//! ```
//!
//! A key repeated on several lines collects its values, in order, into one
//! entry list. Comment lines (`#` or `;`) directly above a key are kept as
//! that key's description. Values are trimmed and cannot span lines.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::debug;

use crate::ConfigError;

pub type Section = IndexMap<String, Vec<String>>;

/// One ini file. Every mutating entry operation saves immediately.
#[derive(Debug, Clone)]
pub struct IniFile {
    path: PathBuf,
    sections: IndexMap<String, Section>,
    comments: HashMap<(String, String), String>,
}

/// Values are trimmed on read, so anything that would not survive a
/// save/read cycle unchanged is refused.
fn check(what: &'static str, value: &str) -> Result<(), ConfigError> {
    let bad = value.is_empty()
        || value.trim() != value
        || value.contains(['\n', '\r'])
        || (what != "entry" && value.contains(['=', '[', ']']));
    if bad {
        return Err(ConfigError::InvalidValue {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl IniFile {
    /// An empty store bound to `path`. Nothing is read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sections: IndexMap::new(),
            comments: HashMap::new(),
        }
    }

    /// Bind to `path` and read it. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut ini = Self::new(path);
        ini.read()?;
        Ok(ini)
    }

    /// Parse ini text; `path` is only used for error messages and saving.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self, ConfigError> {
        let mut ini = Self::new(path);
        ini.load_text(text)?;
        Ok(ini)
    }

    fn load_text(&mut self, text: &str) -> Result<(), ConfigError> {
        let mut sections: IndexMap<String, Section> = IndexMap::new();
        let mut comments = HashMap::new();
        let mut current: Option<String> = None;
        let mut pending: Vec<String> = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let error = |message: &str| ConfigError::Parse {
                path: self.path.display().to_string(),
                line: index + 1,
                message: message.to_string(),
            };

            if line.is_empty() {
                pending.clear();
            } else if let Some(comment) = line.strip_prefix('#').or_else(|| line.strip_prefix(';')) {
                pending.push(comment.trim().to_string());
            } else if let Some(name) = line.strip_prefix('[') {
                let name = name
                    .strip_suffix(']')
                    .ok_or_else(|| error("unterminated section header"))?
                    .trim();
                sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                pending.clear();
            } else {
                let (key, value) = line
                    .split_once('=')
                    .ok_or_else(|| error("expected `key = value`"))?;
                let section = current
                    .as_ref()
                    .ok_or_else(|| error("key outside of any section"))?;
                let key = key.trim().to_string();
                if !pending.is_empty() {
                    comments.insert((section.clone(), key.clone()), pending.join("\n"));
                    pending.clear();
                }
                sections
                    .entry(section.clone())
                    .or_default()
                    .entry(key)
                    .or_default()
                    .push(value.trim().to_string());
            }
        }

        self.sections = sections;
        self.comments = comments;
        Ok(())
    }

    /// Render the store back to ini text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, (name, section)) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{name}]");
            for (key, values) in section {
                if let Some(comment) = self.comments.get(&(name.clone(), key.clone())) {
                    for line in comment.lines() {
                        let _ = writeln!(out, "# {line}");
                    }
                }
                for value in values {
                    let _ = writeln!(out, "{key} = {value}");
                }
            }
        }
        out
    }

    /// Re-read the file, discarding in-memory state.
    pub fn read(&mut self) -> Result<(), ConfigError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Ini file {} not found, starting empty", self.path.display());
                String::new()
            }
            Err(e) => return Err(e.into()),
        };
        self.load_text(&text)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, self.render())?;
        debug!("Saved ini file {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the store at a new file. Does not save.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&[String]> {
        self.sections.get(section)?.get(key).map(Vec::as_slice)
    }

    /// First entry of a key, for keys used as scalars.
    pub fn first(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key)?.first().map(String::as_str)
    }

    pub fn contains(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    pub fn comment(&self, section: &str, key: &str) -> Option<&str> {
        self.comments
            .get(&(section.to_string(), key.to_string()))
            .map(String::as_str)
    }

    pub fn has_entry(&self, section: &str, key: &str, entry: &str) -> bool {
        self.get(section, key)
            .is_some_and(|entries| entries.iter().any(|e| e == entry))
    }

    /// Add `entry` to `key`. Returns `false` if it was already there.
    pub fn add_entry(&mut self, section: &str, key: &str, entry: &str) -> Result<bool, ConfigError> {
        check("section", section)?;
        check("key", key)?;
        check("entry", entry)?;
        if self.has_entry(section, key, entry) {
            return Ok(false);
        }
        self.sections
            .entry(section.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(entry.to_string());
        self.save()?;
        Ok(true)
    }

    /// Remove `entry` from `key`; the key goes away with its last entry.
    /// Returns `false` if the entry was not there.
    pub fn del_entry(&mut self, section: &str, key: &str, entry: &str) -> Result<bool, ConfigError> {
        let Some(entries) = self
            .sections
            .get_mut(section)
            .and_then(|keys| keys.get_mut(key))
        else {
            return Ok(false);
        };
        let Some(position) = entries.iter().position(|e| e == entry) else {
            return Ok(false);
        };
        entries.remove(position);
        if entries.is_empty() {
            if let Some(keys) = self.sections.get_mut(section) {
                keys.shift_remove(key);
            }
            self.comments.remove(&(section.to_string(), key.to_string()));
        }
        self.save()?;
        Ok(true)
    }

    /// Replace all entries of `key` with exactly `entry`.
    pub fn set_entry(&mut self, section: &str, key: &str, entry: &str) -> Result<bool, ConfigError> {
        check("section", section)?;
        check("key", key)?;
        check("entry", entry)?;
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), vec![entry.to_string()]);
        self.save()?;
        Ok(true)
    }

    /// Set a whole entry list without saving. Used by template merging.
    pub(crate) fn put(&mut self, section: &str, key: &str, entries: Vec<String>, comment: Option<&str>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), entries);
        if let Some(comment) = comment {
            self.comments
                .insert((section.to_string(), key.to_string()), comment.to_string());
        }
    }
}
