use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{resolve_model_dir, Timeouts, DEFAULT_USER_AGENT};

const CONFIG_FILE: &str = "config.json";
pub const ENV_MODELS_ROOT: &str = "MODEL_CENTER_ROOT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub models_root: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models_root: None,
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            write_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs.max(1)),
            read: Duration::from_secs(self.read_timeout_secs.max(1)),
            write: Duration::from_secs(self.write_timeout_secs.max(1)),
        }
    }

    /// Environment override, then the configured root, then the platform data dir.
    pub fn resolve_models_root(&self) -> Result<PathBuf> {
        if let Some(root) = std::env::var_os(ENV_MODELS_ROOT).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(root));
        }
        match &self.models_root {
            Some(root) => Ok(root.clone()),
            None => resolve_model_dir(),
        }
    }
}

pub struct SettingsManager {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsManager {
    pub fn new() -> Result<Self> {
        Self::at(resolve_config_path()?)
    }

    pub fn at(path: PathBuf) -> Result<Self> {
        let settings = load_settings(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn read(&self) -> Settings {
        self.inner.read().clone()
    }

    pub fn update<F>(&self, apply: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.inner.write();
        let mut next = guard.clone();
        apply(&mut next);
        if next != *guard {
            persist_settings(&self.path, &next)?;
            *guard = next;
        }
        Ok(guard.clone())
    }
}

fn resolve_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("demo", "Nexa", "ClinicalTranscription")
        .context("missing project directories")?;
    let dir = project_dirs.config_dir();
    fs::create_dir_all(dir).context("creating config directory failed")?;
    Ok(dir.join(CONFIG_FILE))
}

fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
    serde_json::from_slice(&bytes).context("config json could not be parsed")
}

fn persist_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {parent:?}"))?;
    }
    let serialized =
        serde_json::to_vec_pretty(settings).context("serialize settings to json failed")?;
    fs::write(path, serialized).with_context(|| format!("write settings to {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SettingsManager::at(tmp.path().join("config.json")).unwrap();
        assert_eq!(manager.read(), Settings::default());
        assert_eq!(manager.read().timeouts().read, Duration::from_secs(60));
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, br#"{ "readTimeoutSecs": 5, "modelsRoot": "/data/m" }"#).unwrap();

        let settings = SettingsManager::at(path).unwrap().read();

        assert_eq!(settings.read_timeout_secs, 5);
        assert_eq!(settings.connect_timeout_secs, 30);
        assert_eq!(settings.models_root, Some(PathBuf::from("/data/m")));
    }

    #[test]
    fn malformed_document_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(SettingsManager::at(path).is_err());
    }

    #[test]
    fn update_persists_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let manager = SettingsManager::at(path.clone()).unwrap();

        manager
            .update(|settings| settings.connect_timeout_secs = 10)
            .unwrap();

        assert!(path.exists());
        assert_eq!(SettingsManager::at(path).unwrap().read().connect_timeout_secs, 10);
    }

    #[test]
    fn zero_timeouts_are_clamped() {
        let settings = Settings {
            read_timeout_secs: 0,
            ..Settings::default()
        };
        assert_eq!(settings.timeouts().read, Duration::from_secs(1));
    }
}
