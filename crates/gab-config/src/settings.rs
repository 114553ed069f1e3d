//! Process-level settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Timer tick settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSettings {
    /// Milliseconds between two `process_timers` calls.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Seconds between two saves of every loaded ini store; `0` disables.
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_autosave_secs() -> u64 {
    300
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            autosave_secs: default_autosave_secs(),
        }
    }
}

/// Where ini stores live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IniSettings {
    /// Root folder for `<name>.ini` files.
    #[serde(default = "default_ini_dir")]
    pub dir: PathBuf,
    /// Sub-folder of `dir` holding templates.
    #[serde(default = "default_templates")]
    pub templates: String,
    /// Stores loaded at start-up.
    #[serde(default = "default_preload")]
    pub preload: Vec<String>,
}

fn default_ini_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_templates() -> String {
    "templates".to_string()
}

fn default_preload() -> Vec<String> {
    vec!["config".to_string()]
}

impl Default for IniSettings {
    fn default() -> Self {
        Self {
            dir: default_ini_dir(),
            templates: default_templates(),
            preload: default_preload(),
        }
    }
}

/// Plugins mounted at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginSettings {
    #[serde(default)]
    pub autoload: Vec<String>,
}

/// How user commands are recognised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Prefix marking a chat line as a command.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "!".to_string()
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

/// Top-level gab configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GabConfig {
    #[serde(default)]
    pub timers: TimerSettings,
    #[serde(default)]
    pub ini: IniSettings,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub commands: CommandSettings,
}

/// Resolve the gab config directory (~/.gab/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".gab"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.gab/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<GabConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<GabConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(GabConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: GabConfig = json5::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GabConfig::default();
        assert_eq!(config.timers.tick_ms, 1000);
        assert_eq!(config.timers.autosave_secs, 300);
        assert_eq!(config.commands.prefix, "!");
        assert_eq!(config.ini.preload, vec!["config".to_string()]);
        assert!(config.plugins.autoload.is_empty());
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            timers: { tick_ms: 250 },
            plugins: { autoload: ["admin", "floodguard"] },
            commands: { prefix: "/" },
        }"#;
        let config: GabConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.timers.tick_ms, 250);
        assert_eq!(config.plugins.autoload, vec!["admin", "floodguard"]);
        assert_eq!(config.commands.prefix, "/");
        assert_eq!(config.ini.templates, "templates");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config.timers.tick_ms, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{ ini: { dir: '/srv/gab', preload: [] } }").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.ini.dir, PathBuf::from("/srv/gab"));
        assert!(config.ini.preload.is_empty());
    }
}
