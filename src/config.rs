use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::converter::ConversionOptions;
use crate::error::ConfigError;

pub const APP_NAME: &str = "mediamorph";
const CONFIG_FILE_NAME: &str = "mediamorph.toml";
const PROFILES_FILE_NAME: &str = "profiles.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Explicit encoder path; `PATH` is searched when unset.
    pub encoder: Option<PathBuf>,
    pub prober: Option<PathBuf>,
    pub locale: String,
    /// Customized profile definitions.
    pub profiles_file: PathBuf,
    /// How long a stopped encoder may take to exit before it is killed.
    pub stop_grace_ms: u64,
    pub conversion: ConversionOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            encoder: None,
            prober: None,
            locale: system_locale(),
            profiles_file: default_profiles_file(),
            stop_grace_ms: 3000,
            conversion: ConversionOptions::default(),
        }
    }
}

impl Settings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.locale.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("locale must not be empty")));
        }
        if self.conversion.profile.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("conversion.profile must not be empty")));
        }
        Ok(())
    }
}

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    settings.validate()?;
    debug!("loaded settings from {}", path.display());
    Ok(settings)
}

/// Load `custom_path`, or the first settings file found in the working
/// directory or the user config directory, or the defaults.
pub fn load_settings_or_default(custom_path: Option<&Path>) -> Result<Settings, ConfigError> {
    if let Some(path) = custom_path {
        return load_settings(path);
    }

    let mut default_paths = vec![PathBuf::from(".").join(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        default_paths.push(dir.join(APP_NAME).join(CONFIG_FILE_NAME));
    }

    for path in default_paths {
        if path.exists() {
            return load_settings(&path);
        }
    }

    Ok(Settings::default())
}

pub fn default_profiles_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join(PROFILES_FILE_NAME)
}

/// `ll_CC` from the environment, `en` when nothing usable is set.
pub fn system_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|value| normalize_locale(&value))
        .unwrap_or_else(|| String::from("en"))
}

fn normalize_locale(value: &str) -> Option<String> {
    let locale = value.split(['.', '@']).next().unwrap_or_default().trim();
    match locale {
        "" | "C" | "POSIX" => None,
        l => Some(l.replace('-', "_")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.stop_grace(), Duration::from_secs(3));
        assert!(settings.profiles_file.ends_with("mediamorph/profiles.json"));
        assert!(settings.encoder.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediamorph.toml");
        fs::write(
            &path,
            r#"
locale = "es_ES"
stop_grace_ms = 500

[conversion]
profile = "WEBM"
tag_output = true
"#,
        )
        .unwrap();
        let settings = load_settings_or_default(Some(&path)).unwrap();
        assert_eq!(settings.locale, "es_ES");
        assert_eq!(settings.stop_grace_ms, 500);
        assert_eq!(settings.conversion.profile, "WEBM");
        assert!(settings.conversion.tag_output);
        assert!(!settings.conversion.delete_input_on_success);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(load_settings(&missing), Err(ConfigError::Read { .. })));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "stop_grace_ms = \"soon\"").unwrap();
        assert!(matches!(load_settings(&bad), Err(ConfigError::Parse { .. })));

        fs::write(&bad, "locale = \"\"").unwrap();
        assert!(matches!(load_settings(&bad), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_normalize_locale() {
        assert_eq!(normalize_locale("es_ES.UTF-8").as_deref(), Some("es_ES"));
        assert_eq!(normalize_locale("pt-BR").as_deref(), Some("pt_BR"));
        assert_eq!(normalize_locale("C"), None);
        assert_eq!(normalize_locale(""), None);
    }
}
