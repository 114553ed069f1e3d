//! gab-config: bot settings plus the ini-backed key/value stores that
//! plugins and administrative commands persist into.
//!
//! - [`GabConfig`]: process settings, read from `~/.gab/config.json5`.
//! - [`IniFile`]: one `section → key → [entries]` store, saved on every change.
//! - [`ConfigStores`]: named stores keyed by lowercase name.

pub mod ini;
pub mod manager;
pub mod settings;
pub mod template;

use thiserror::Error;

pub use ini::IniFile;
pub use manager::ConfigStores;
pub use settings::{GabConfig, config_dir, config_file_path, load_config, load_config_from};
pub use template::{NoPrompt, Prompter, StdinPrompter, merge_template};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("invalid ini {what}: {value:?}")]
    InvalidValue { what: &'static str, value: String },
    #[error("ini store not loaded: {0}")]
    NotLoaded(String),
}
