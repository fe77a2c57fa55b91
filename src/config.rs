use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const API_URL_ENV: &str = "MAILFORGE_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default)]
    pub keybindings: Keybindings,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("mailforge.log")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keybindings {
    pub quit: Vec<String>,
    pub back: Vec<String>,
    pub next_field: Vec<String>,
    pub prev_field: Vec<String>,
    pub move_up: Vec<String>,
    pub move_down: Vec<String>,
    pub select: Vec<String>,
    pub next_step: Vec<String>,
    pub prev_step: Vec<String>,
    pub submit: Vec<String>,
    pub generate: Vec<String>,
    pub toggle_schedule: Vec<String>,
    pub toggle_throttle: Vec<String>,
    pub cycle_column: Vec<String>,
    pub insert_column: Vec<String>,
    pub reload: Vec<String>,
    pub preview: Vec<String>,
    pub upload: Vec<String>,
    pub delete: Vec<String>,
    pub connect_gmail: Vec<String>,
    pub connect_sendgrid: Vec<String>,
    pub rotate_key: Vec<String>,
    pub switch_form: Vec<String>,
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Keybindings {
    fn default() -> Self {
        Self {
            quit: keys(&["ctrl-q"]),
            back: keys(&["Esc"]),
            next_field: keys(&["Tab"]),
            prev_field: keys(&["BackTab"]),
            move_up: keys(&["Up"]),
            move_down: keys(&["Down"]),
            select: keys(&["Enter"]),
            next_step: keys(&["ctrl-n"]),
            prev_step: keys(&["ctrl-p"]),
            submit: keys(&["ctrl-s"]),
            generate: keys(&["ctrl-g"]),
            toggle_schedule: keys(&["ctrl-t"]),
            toggle_throttle: keys(&["ctrl-r"]),
            cycle_column: keys(&["ctrl-e"]),
            insert_column: keys(&["ctrl-l"]),
            reload: keys(&["r"]),
            preview: keys(&["p"]),
            upload: keys(&["u"]),
            delete: keys(&["d", "Delete"]),
            connect_gmail: keys(&["g"]),
            connect_sendgrid: keys(&["s"]),
            rotate_key: keys(&["k"]),
            switch_form: keys(&["ctrl-o"]),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            log_file: default_log_file(),
            keybindings: Keybindings::default(),
        }
    }
}

pub fn parse_key_string(key_str: &str) -> (KeyCode, KeyModifiers) {
    let mut parts: Vec<&str> = key_str.split('-').collect();
    let mut modifiers = KeyModifiers::empty();

    // The last segment is the key itself, everything before it a modifier
    let base_key_str = parts.pop().unwrap_or("");

    for part in parts {
        match part.to_lowercase().as_str() {
            "ctrl" => modifiers.insert(KeyModifiers::CONTROL),
            "alt" => modifiers.insert(KeyModifiers::ALT),
            "shift" => modifiers.insert(KeyModifiers::SHIFT),
            _ => {}
        }
    }

    let code = match base_key_str {
        "Backspace" => KeyCode::Backspace,
        "Enter" => KeyCode::Enter,
        "Left" => KeyCode::Left,
        "Right" => KeyCode::Right,
        "Up" => KeyCode::Up,
        "Down" => KeyCode::Down,
        "Tab" => KeyCode::Tab,
        "BackTab" => KeyCode::BackTab,
        "Esc" => KeyCode::Esc,
        "Delete" => KeyCode::Delete,
        "PageUp" => KeyCode::PageUp,
        "PageDown" => KeyCode::PageDown,
        " " => KeyCode::Char(' '),
        s => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => KeyCode::Null,
            }
        }
    };

    (code, modifiers)
}

/// Modifiers must match exactly, except SHIFT which terminals report
/// inconsistently for uppercase letters and BackTab.
pub fn matches_key(event: KeyEvent, bindings: &[String]) -> bool {
    let relevant = |m: KeyModifiers| m - KeyModifiers::SHIFT;
    bindings.iter().any(|b| {
        let (code, modifiers) = parse_key_string(b);
        event.code == code && relevant(event.modifiers) == relevant(modifiers)
    })
}

/// Command-line switches.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CliArgs {
    pub debug: bool,
    pub reset_token: bool,
    pub api_url: Option<String>,
    pub callback: Option<String>,
}

impl CliArgs {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--debug" => parsed.debug = true,
                "--reset-token" => parsed.reset_token = true,
                "--api-url" => {
                    parsed.api_url = Some(
                        args.next()
                            .ok_or_else(|| anyhow::anyhow!("--api-url needs a value"))?,
                    )
                }
                "--callback" => {
                    parsed.callback = Some(
                        args.next()
                            .ok_or_else(|| anyhow::anyhow!("--callback needs a value"))?,
                    )
                }
                other => anyhow::bail!("Unknown argument: {}", other),
            }
        }
        Ok(parsed)
    }
}

impl Config {
    pub fn load() -> Self {
        use std::fs;
        if let Ok(content) = fs::read_to_string("settings.toml") {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => eprintln!("Ignoring invalid settings.toml: {}", e),
            }
        }
        Self::default()
    }

    /// Environment first, then command line.
    pub fn apply_overrides(&mut self, env_api_url: Option<String>, args: &CliArgs) {
        if let Some(url) = env_api_url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(url) = &args.api_url {
            self.api_url = url.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_parse_key_string() {
        assert_eq!(
            parse_key_string("ctrl-s"),
            (KeyCode::Char('s'), KeyModifiers::CONTROL)
        );
        assert_eq!(parse_key_string("Esc"), (KeyCode::Esc, KeyModifiers::empty()));
        assert_eq!(parse_key_string("Nope").0, KeyCode::Null);
    }

    #[test]
    fn test_plain_letter_does_not_match_ctrl_binding() {
        let bindings = keys(&["p"]);
        assert!(matches_key(key(KeyCode::Char('p'), KeyModifiers::NONE), &bindings));
        assert!(!matches_key(
            key(KeyCode::Char('p'), KeyModifiers::CONTROL),
            &bindings
        ));
        assert!(matches_key(
            key(KeyCode::BackTab, KeyModifiers::SHIFT),
            &keys(&["BackTab"])
        ));
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_url = "https://api.mailforge.dev"
            [keybindings]
            quit = ["ctrl-c"]
            "#,
        )
        .unwrap();
        assert_eq!(config.api_url, "https://api.mailforge.dev");
        assert_eq!(config.keybindings.quit, vec!["ctrl-c"]);
        assert_eq!(config.keybindings.submit, vec!["ctrl-s"]);
        assert_eq!(config.log_file, PathBuf::from("mailforge.log"));
    }

    #[test]
    fn test_overrides_order() {
        let mut config = Config::default();
        let args = CliArgs::parse(
            ["--api-url", "http://cli:1", "--debug"]
                .iter()
                .map(|s| s.to_string()),
        )
        .unwrap();
        config.apply_overrides(Some("http://env:2".into()), &args);
        assert_eq!(config.api_url, "http://cli:1");
        assert!(args.debug);

        let mut config = Config::default();
        config.apply_overrides(Some("http://env:2".into()), &CliArgs::default());
        assert_eq!(config.api_url, "http://env:2");
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(CliArgs::parse(vec!["--bogus".to_string()]).is_err());
        assert!(CliArgs::parse(vec!["--callback".to_string()]).is_err());
    }
}
