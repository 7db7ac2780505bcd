//! Named conversion profiles.
//!
//! A profile is a target format (container + extension) owning an ordered
//! list of quality presets, each mapping to an encoder parameter string.
//! Profiles are grouped per locale because preset names are translated.
//! The whole set is stored as one JSON document; the bundled defaults are
//! compiled into the crate and a customized copy lives in the user's config
//! directory once anything is imported or added.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ProfileError;

const DEFAULT_PROFILES: &str = include_str!("../profiles/default.json");

pub const EXPORT_FILE_NAME: &str = "profiles.json";
pub const FALLBACK_LOCALE: &str = "en";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub params: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub extension: String,
    pub presets: Vec<Preset>,
}

impl Profile {
    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    pub fn preset_names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn first_preset(&self) -> Option<&Preset> {
        self.presets.first()
    }

    /// Extension without a leading dot.
    pub fn extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }
}

/// Every profile of every locale, keyed by locale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileSet(BTreeMap<String, Vec<Profile>>);

impl ProfileSet {
    pub fn parse(json: &str) -> Result<Self, ProfileError> {
        let set = serde_json::from_str::<ProfileSet>(json)
            .map_err(|e| ProfileError::Format(e.to_string()))?;
        set.validate()?;
        Ok(set)
    }

    pub fn defaults() -> Result<Self, ProfileError> {
        ProfileSet::parse(DEFAULT_PROFILES)
            .map_err(|e| ProfileError::load(Path::new("<bundled>"), e.to_string()))
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Profiles for `locale`, trying `ll_CC`, then `ll`, then the fallback locale.
    pub fn for_locale(&self, locale: &str) -> &[Profile] {
        let language = locale.split(['_', '-', '.']).next().unwrap_or(locale);
        [locale, language, FALLBACK_LOCALE]
            .iter()
            .find_map(|l| self.0.get(*l))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn resolve_locale(&self, locale: &str) -> String {
        let language = locale.split(['_', '-', '.']).next().unwrap_or(locale);
        [locale, language]
            .iter()
            .find(|l| self.0.contains_key(**l))
            .map(|l| l.to_string())
            .unwrap_or_else(|| String::from(FALLBACK_LOCALE))
    }

    fn validate(&self) -> Result<(), ProfileError> {
        for (locale, profiles) in &self.0 {
            let mut names = HashSet::new();
            for profile in profiles {
                if profile.name.trim().is_empty() {
                    let message = format!("unnamed profile in locale {locale:?}");
                    return Err(ProfileError::Format(message));
                }
                if !names.insert(profile.name.as_str()) {
                    return Err(ProfileError::Format(format!(
                        "duplicate profile {:?} in locale {locale:?}",
                        profile.name
                    )));
                }
                if profile.extension().is_empty() {
                    let message = format!("profile {:?} has no extension", profile.name);
                    return Err(ProfileError::Format(message));
                }
                if profile.presets.is_empty() {
                    let message = format!("profile {:?} has no presets", profile.name);
                    return Err(ProfileError::Format(message));
                }
                let mut presets = HashSet::new();
                for preset in &profile.presets {
                    if !presets.insert(preset.name.as_str()) {
                        return Err(ProfileError::Format(format!(
                            "duplicate preset {:?} in profile {:?}",
                            preset.name, profile.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Holds the profile set and knows where its customized copy is stored.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    locale: String,
    set: ProfileSet,
}

impl ProfileStore {
    /// Open the store backed by the customized definition at `path`.
    pub fn open(path: impl Into<PathBuf>, locale: &str) -> Result<Self, ProfileError> {
        let mut store = ProfileStore {
            path: path.into(),
            locale: String::from(locale),
            set: ProfileSet::default(),
        };
        store.load(locale)?;
        Ok(store)
    }

    /// Read the definition from disk (or the bundled defaults) for `locale`.
    pub fn load(&mut self, locale: &str) -> Result<&[Profile], ProfileError> {
        self.set = match fs::read_to_string(&self.path) {
            Ok(json) => ProfileSet::parse(&json)
                .map_err(|e| ProfileError::load(&self.path, e.to_string()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => ProfileSet::defaults()?,
            Err(err) => return Err(ProfileError::load(&self.path, err.to_string())),
        };
        self.locale = self.set.resolve_locale(locale);
        debug!(locale = %self.locale, path = %self.path.display(), "profiles loaded");
        Ok(self.profiles())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn set(&self) -> &ProfileSet {
        &self.set
    }

    pub fn profiles(&self) -> &[Profile] {
        self.set.for_locale(&self.locale)
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles().iter().map(|p| p.name.as_str()).collect()
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ProfileError> {
        self.profiles()
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ProfileError::NotFound(String::from(name)))
    }

    pub fn preset_names(&self, profile: &str) -> Result<Vec<&str>, ProfileError> {
        Ok(self.profile(profile)?.preset_names())
    }

    pub fn current_parameters(&self, profile: &str, preset: &str) -> Result<&str, ProfileError> {
        self.profile(profile)?
            .preset(preset)
            .map(|p| p.params.as_str())
            .ok_or_else(|| ProfileError::NotFound(format!("{profile}/{preset}")))
    }

    /// Write the whole set to `target_dir/profiles.json`.
    pub fn export(&self, target_dir: &Path) -> Result<PathBuf, ProfileError> {
        let target = target_dir.join(EXPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(&self.set)
            .map_err(|e| ProfileError::Format(e.to_string()))?;
        fs::write(&target, json).map_err(|e| ProfileError::from_io(target_dir, e))?;
        info!("exported profiles to {}", target.display());
        Ok(target)
    }

    /// Replace the whole set with the definition found in `file`.
    pub fn import(&mut self, file: &Path) -> Result<(), ProfileError> {
        let json = fs::read_to_string(file).map_err(|e| ProfileError::from_io(file, e))?;
        let set = ProfileSet::parse(&json)?;
        write_set(&self.path, &set)?;
        self.locale = set.resolve_locale(&self.locale);
        self.set = set;
        info!("imported profiles from {}", file.display());
        Ok(())
    }

    pub fn restore_defaults(&mut self) -> Result<(), ProfileError> {
        let set = ProfileSet::defaults()?;
        match fs::remove_file(&self.path) {
            Ok(()) => (),
            Err(err) if err.kind() == io::ErrorKind::NotFound => (),
            Err(err) => {
                warn!("unable to remove customized profiles {}: {}", self.path.display(), err)
            },
        }
        self.locale = set.resolve_locale(&self.locale);
        self.set = set;
        Ok(())
    }

    /// Add (or overwrite) a customized preset in the current locale.
    pub fn add_preset(
        &mut self,
        profile: &str,
        extension: &str,
        preset: &str,
        params: &str,
    ) -> Result<(), ProfileError> {
        if profile.trim().is_empty() || preset.trim().is_empty() || params.trim().is_empty() {
            let message = "profile, preset and parameters must not be empty";
            return Err(ProfileError::Format(String::from(message)));
        }
        let mut set = self.set.clone();
        let profiles = set.0.entry(self.locale.clone()).or_default();
        let target = match profiles.iter().position(|p| p.name == profile) {
            Some(i) => &mut profiles[i],
            None => {
                if extension.trim_start_matches('.').is_empty() {
                    let message = format!("new profile {profile:?} needs an extension");
                    return Err(ProfileError::Format(message));
                }
                profiles.push(Profile {
                    name: String::from(profile),
                    extension: String::from(extension.trim_start_matches('.')),
                    presets: vec![],
                });
                let last = profiles.len() - 1;
                &mut profiles[last]
            }
        };
        match target.presets.iter_mut().find(|p| p.name == preset) {
            Some(existing) => existing.params = String::from(params),
            None => target.presets.push(Preset {
                name: String::from(preset),
                params: String::from(params),
            }),
        }
        set.validate()?;
        write_set(&self.path, &set)?;
        self.set = set;
        Ok(())
    }
}

fn write_set(path: &Path, set: &ProfileSet) -> Result<(), ProfileError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ProfileError::from_io(parent, e))?;
        }
    }
    let json = serde_json::to_string_pretty(set).map_err(|e| ProfileError::Format(e.to_string()))?;
    fs::write(path, json).map_err(|e| ProfileError::from_io(path, e))
}
