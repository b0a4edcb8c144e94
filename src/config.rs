use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::ActionKind;
use crate::network::GenerationOptions;
use crate::popup::ShellOptions;

/// Defaults shipped with the binary; also the seed for the user file.
const BLUEPRINT: &str = include_str!("../selectai.toml");
const CONFIG_FILE: &str = "selectai.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub gemini_model: String,
    pub gemini_api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub lang: Option<String>,
    pub target_language: String,
    pub mini_popup_enabled_tabs: Vec<String>,
    pub min_selection_length: usize,
    pub chat_max_turns: usize,
    pub history_path: Option<String>,
    pub log_dir: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let user_config_path = get_user_config_path().map_err(|e| ConfigError::Message(e.to_string()))?;

        // First start: seed the user config from the blueprint.
        if !user_config_path.exists() {
            if let Some(parent) = user_config_path.parent() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
            }
            fs::write(&user_config_path, BLUEPRINT).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }

        Self::from_layers(&user_config_path, Path::new(CONFIG_FILE))
    }

    fn from_layers(user_config_path: &Path, local_path: &Path) -> Result<Self, ConfigError> {
        let s = Config::builder()
            // 1. Project defaults.
            .add_source(File::from_str(BLUEPRINT, FileFormat::Toml))
            // 2. User's global config.
            .add_source(File::from(user_config_path).required(false))
            // 3. Local selectai.toml from CWD.
            .add_source(File::from(local_path).required(false))
            // 4. SELECTAI_GEMINI_API_KEY and friends.
            .add_source(
                Environment::with_prefix("SELECTAI")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mini_popup_enabled_tabs"),
            )
            .build()?;

        s.try_deserialize()
    }

    /// The configured key, falling back to `GEMINI_API_KEY`.
    pub fn credential(&self) -> Option<String> {
        self.gemini_api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }

    pub fn language(&self) -> String {
        self.lang.clone().filter(|l| !l.trim().is_empty()).unwrap_or_else(|| "en".to_string())
    }

    /// Unknown ids are skipped; an empty result means every streaming action.
    pub fn mini_popup_enabled_tabs(&self) -> Vec<ActionKind> {
        let kinds: Vec<ActionKind> = self
            .mini_popup_enabled_tabs
            .iter()
            .filter_map(|id| ActionKind::from_id(id.trim()))
            .filter(|kind| ActionKind::STREAMING.contains(kind))
            .collect();
        if kinds.is_empty() { ActionKind::STREAMING.to_vec() } else { kinds }
    }

    pub fn generation_config(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.gemini_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn shell_options(&self) -> ShellOptions {
        ShellOptions {
            mini_tabs: self.mini_popup_enabled_tabs(),
            output_language: self.language(),
            target_language: self.target_language.clone(),
        }
    }

    pub fn history_dir(&self) -> Option<PathBuf> {
        expand(self.history_path.as_deref())
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        expand(self.log_dir.as_deref())
            .or_else(|| get_user_config_path().ok()?.parent().map(|dir| dir.join("logs")))
    }
}

fn expand(path: Option<&str>) -> Option<PathBuf> {
    let path = path?.trim();
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(shellexpand::tilde(path).into_owned()))
}

pub fn get_user_config_path() -> anyhow::Result<PathBuf> {
    let mut path = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Failed to get home directory"))?;
    path.push(".config");
    path.push("selectai");
    path.push(CONFIG_FILE);
    Ok(path)
}

pub fn save_api_key(api_key: &str) -> anyhow::Result<()> {
    save_api_key_to(&get_user_config_path()?, api_key)
}

fn save_api_key_to(user_config_path: &Path, api_key: &str) -> anyhow::Result<()> {
    let config_str = fs::read_to_string(user_config_path).unwrap_or_else(|_| BLUEPRINT.to_string());
    let mut doc = config_str.parse::<toml::Table>()?;

    doc.insert("gemini_api_key".to_string(), toml::Value::String(api_key.trim().to_string()));

    if let Some(parent) = user_config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(user_config_path, doc.to_string())?;
    tracing::info!(path = %user_config_path.display(), "saved API key");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(dir: &Path) -> Settings {
        Settings::from_layers(&dir.join("user.toml"), &dir.join("local.toml")).unwrap()
    }

    #[test]
    fn blueprint_supplies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load(dir.path());
        assert_eq!(settings.gemini_model, "gemini-2.0-flash");
        assert_eq!(settings.max_tokens, 2048);
        assert_eq!(settings.min_selection_length, 3);
        assert_eq!(settings.language(), "en");
        assert_eq!(settings.mini_popup_enabled_tabs(), ActionKind::STREAMING.to_vec());
    }

    #[test]
    fn local_file_overrides_user_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "lang = \"de\"\ntemperature = 0.3\n").unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "temperature = 0.9\nmini_popup_enabled_tabs = [\"translate\", \"highlight\", \"bogus\"]\n",
        )
        .unwrap();

        let settings = load(dir.path());
        assert_eq!(settings.language(), "de");
        assert_eq!(settings.generation_config().temperature, 0.9);
        assert_eq!(settings.mini_popup_enabled_tabs(), vec![ActionKind::Translate]);
        assert_eq!(settings.shell_options().output_language, "de");
    }

    #[test]
    fn saved_key_is_picked_up_and_other_keys_survive() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("nested").join("user.toml");
        fs::create_dir_all(user.parent().unwrap()).unwrap();
        fs::write(&user, "lang = \"de\"\n").unwrap();

        save_api_key_to(&user, "  abc123 \n").unwrap();

        let settings = Settings::from_layers(&user, &dir.path().join("missing.toml")).unwrap();
        assert_eq!(settings.credential().as_deref(), Some("abc123"));
        assert_eq!(settings.language(), "de");
    }

    #[test]
    fn tilde_paths_expand() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = load(dir.path());
        settings.history_path = Some("~/notes".to_string());
        let expanded = settings.history_dir().unwrap();
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("notes"));
        settings.history_path = Some("  ".to_string());
        assert!(settings.history_dir().is_none());
    }
}
