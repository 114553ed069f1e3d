//! Filling a store's missing keys from a template.

use std::io::{BufRead, Write};

use tracing::info;

use crate::ini::IniFile;

/// Asks an operator for a value the template cannot supply.
pub trait Prompter {
    /// `description` is the template comment for the key, or `section.key`.
    /// `None` or an empty answer keeps the template default.
    fn prompt(&mut self, section: &str, key: &str, description: &str) -> Option<String>;
}

impl<F> Prompter for F
where
    F: FnMut(&str, &str, &str) -> Option<String>,
{
    fn prompt(&mut self, section: &str, key: &str, description: &str) -> Option<String> {
        self(section, key, description)
    }
}

/// Never asks; template defaults are used as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn prompt(&mut self, _section: &str, _key: &str, _description: &str) -> Option<String> {
        None
    }
}

/// Asks on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&mut self, _section: &str, _key: &str, description: &str) -> Option<String> {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{description}\nLeave Blank to use Default > ");
        let _ = stdout.flush();
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer).ok()?;
        Some(answer.trim().to_string())
    }
}

/// Copy every section/key of `template` that `store` lacks.
///
/// Keys whose template entries are all blank have no usable default, so the
/// operator is asked. Does not save; returns how many keys were filled.
pub fn merge_template(store: &mut IniFile, template: &IniFile, prompter: &mut dyn Prompter) -> usize {
    let mut filled = 0;
    for section in template.sections() {
        let Some(keys) = template.section(section) else {
            continue;
        };
        for (key, defaults) in keys {
            if store.contains(section, key) {
                continue;
            }
            let comment = template.comment(section, key);
            let has_default = defaults.iter().any(|value| !value.is_empty());
            let entries = if has_default {
                defaults.clone()
            } else {
                let description = comment
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{section}.{key}"));
                match prompter.prompt(section, key, &description) {
                    Some(answer) if !answer.is_empty() => vec![answer],
                    _ => defaults.clone(),
                }
            };
            store.put(section, key, entries, comment);
            filled += 1;
        }
    }
    if filled > 0 {
        info!(filled, store = %store.path().display(), "Merged template defaults");
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
[system]
plugins = admin
# Jabber password for the bot account
password =

[roster]
admins =
";

    #[test]
    fn test_merge_fills_only_missing_keys() {
        let template = IniFile::parse("templates/config.ini", TEMPLATE).unwrap();
        let mut store = IniFile::parse("config.ini", "[system]\nplugins = custom\n").unwrap();

        let mut asked = Vec::new();
        let mut prompter = |section: &str, key: &str, description: &str| {
            asked.push(format!("{section}.{key}: {description}"));
            (key == "password").then(|| "hunter2".to_string())
        };
        let filled = merge_template(&mut store, &template, &mut prompter);

        assert_eq!(filled, 2);
        assert_eq!(store.first("system", "plugins"), Some("custom"));
        assert_eq!(store.first("system", "password"), Some("hunter2"));
        // Blank answer keeps the (empty) template default.
        assert_eq!(store.first("roster", "admins"), Some(""));
        assert_eq!(
            asked,
            vec![
                "system.password: Jabber password for the bot account".to_string(),
                "roster.admins: roster.admins".to_string(),
            ]
        );
    }

    #[test]
    fn test_merge_uses_defaults_without_prompting() {
        let template = IniFile::parse("t.ini", "[a]\nk = v1\nk = v2\n").unwrap();
        let mut store = IniFile::parse("s.ini", "").unwrap();
        assert_eq!(merge_template(&mut store, &template, &mut NoPrompt), 1);
        assert_eq!(store.get("a", "k").unwrap().len(), 2);
        assert_eq!(merge_template(&mut store, &template, &mut NoPrompt), 0);
    }
}
