use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Serialize;

use super::catalog::{ModelFile, ModelSpec};

const MODELS_DIR: &str = "nexa_models";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InstallStatus {
    Installed,
    Partial,
    Missing,
}

impl InstallStatus {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            InstallStatus::Installed => "installed",
            InstallStatus::Partial => "partial",
            InstallStatus::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub file_name: String,
    pub exists: bool,
    pub bytes: u64,
    pub meets_min_bytes: bool,
}

/// Maps specs onto the models root and derives install state from disk.
///
/// Nothing here is cached: every query stats the filesystem again, so it is
/// safe to poll and always reflects what a download actually left behind.
#[derive(Debug, Clone)]
pub struct ModelManager {
    root: PathBuf,
}

impl ModelManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.root).context("create model directory")?;
        Ok(())
    }

    #[must_use]
    pub fn install_dir(&self, spec: &ModelSpec) -> PathBuf {
        self.root.join(spec.install_rel_path.trim_start_matches('/'))
    }

    pub fn ensure_install_dir(&self, spec: &ModelSpec) -> std::io::Result<PathBuf> {
        let dir = self.install_dir(spec);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[must_use]
    pub fn file_path(&self, spec: &ModelSpec, file: &ModelFile) -> PathBuf {
        self.install_dir(spec).join(&file.file_name)
    }

    #[must_use]
    pub fn partial_path(&self, spec: &ModelSpec, file: &ModelFile) -> PathBuf {
        self.install_dir(spec).join(file.partial_name())
    }

    /// True when the finalized file exists and passes its threshold.
    #[must_use]
    pub fn file_satisfied(&self, spec: &ModelSpec, file: &ModelFile) -> bool {
        regular_file_len(&self.file_path(spec, file))
            .map(|bytes| file.meets_min_bytes(bytes))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_installed(&self, spec: &ModelSpec) -> bool {
        self.install_dir(spec).is_dir()
            && spec.files.iter().all(|file| self.file_satisfied(spec, file))
    }

    #[must_use]
    pub fn status(&self, spec: &ModelSpec) -> InstallStatus {
        if self.is_installed(spec) {
            return InstallStatus::Installed;
        }

        if !self.install_dir(spec).is_dir() {
            return InstallStatus::Missing;
        }

        let has_any = spec.files.iter().any(|file| {
            regular_file_len(&self.file_path(spec, file)).is_some()
                || regular_file_len(&self.partial_path(spec, file)).is_some()
        });

        if has_any {
            InstallStatus::Partial
        } else {
            InstallStatus::Missing
        }
    }

    #[must_use]
    pub fn file_statuses(&self, spec: &ModelSpec) -> Vec<FileStatus> {
        spec.files
            .iter()
            .map(|file| {
                let len = regular_file_len(&self.file_path(spec, file));
                let bytes = len.unwrap_or(0);
                FileStatus {
                    file_name: file.file_name.clone(),
                    exists: len.is_some(),
                    bytes,
                    meets_min_bytes: len.is_some() && file.meets_min_bytes(bytes),
                }
            })
            .collect()
    }
}

pub(crate) fn regular_file_len(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

/// `<data dir>/nexa_models` for this application, created if absent.
pub fn resolve_model_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("demo", "Nexa", "ClinicalTranscription")
        .context("missing project directories")?;
    let dir = project_dirs.data_dir().join(MODELS_DIR);
    fs::create_dir_all(&dir).context("create models dir")?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::ModelKind;

    fn two_file_spec() -> ModelSpec {
        ModelSpec {
            id: "asr".into(),
            display_name: "ASR".into(),
            kind: ModelKind::Asr,
            install_rel_path: "asr-model".into(),
            files: vec![
                ModelFile::new("a.nexa", vec![]).with_min_bytes(10),
                ModelFile::new("b.nexa", vec![]),
            ],
        }
    }

    fn write(path: PathBuf, len: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![7u8; len]).unwrap();
    }

    #[test]
    fn install_dir_is_rooted_under_models_root() {
        let manager = ModelManager::new("/data/models");
        let mut spec = two_file_spec();
        assert_eq!(manager.install_dir(&spec), PathBuf::from("/data/models/asr-model"));
        spec.install_rel_path = "/asr-model".into();
        assert_eq!(manager.install_dir(&spec), PathBuf::from("/data/models/asr-model"));
        assert_eq!(
            manager.partial_path(&spec, &spec.files[0]),
            PathBuf::from("/data/models/asr-model/a.nexa.partial")
        );
    }

    #[test]
    fn missing_without_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path());
        let spec = two_file_spec();
        assert_eq!(manager.status(&spec), InstallStatus::Missing);
        assert!(!manager.install_dir(&spec).exists());
    }

    #[test]
    fn missing_with_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path());
        let spec = two_file_spec();
        manager.ensure_install_dir(&spec).unwrap();
        fs::write(manager.install_dir(&spec).join("unrelated.txt"), b"x").unwrap();
        assert_eq!(manager.status(&spec), InstallStatus::Missing);
    }

    #[test]
    fn partial_marker_alone_counts_as_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path());
        let spec = two_file_spec();
        write(manager.partial_path(&spec, &spec.files[1]), 3);
        assert_eq!(manager.status(&spec), InstallStatus::Partial);
        assert!(manager.file_statuses(&spec).iter().all(|status| !status.exists));
    }

    #[test]
    fn directory_named_like_a_file_is_not_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path());
        let spec = two_file_spec();
        fs::create_dir_all(manager.file_path(&spec, &spec.files[0])).unwrap();
        fs::create_dir_all(manager.partial_path(&spec, &spec.files[1])).unwrap();

        assert_eq!(manager.status(&spec), InstallStatus::Missing);
        assert!(manager.file_statuses(&spec).iter().all(|status| !status.exists));
    }

    #[test]
    fn undersized_file_keeps_spec_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path());
        let spec = two_file_spec();
        write(manager.file_path(&spec, &spec.files[0]), 9);
        write(manager.file_path(&spec, &spec.files[1]), 1);
        assert!(!manager.is_installed(&spec));
        assert_eq!(manager.status(&spec), InstallStatus::Partial);

        let statuses = manager.file_statuses(&spec);
        assert_eq!(
            statuses[0],
            FileStatus {
                file_name: "a.nexa".into(),
                exists: true,
                bytes: 9,
                meets_min_bytes: false,
            }
        );
        assert!(statuses[1].meets_min_bytes);
    }

    #[test]
    fn installed_when_every_file_meets_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path());
        let spec = two_file_spec();
        write(manager.file_path(&spec, &spec.files[0]), 10);
        write(manager.file_path(&spec, &spec.files[1]), 0);
        assert!(manager.is_installed(&spec));
        assert_eq!(manager.status(&spec), InstallStatus::Installed);
        assert!(manager
            .file_statuses(&spec)
            .iter()
            .all(|status| status.meets_min_bytes));
    }

    #[test]
    fn directory_with_file_name_does_not_count() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path());
        let spec = two_file_spec();
        fs::create_dir_all(manager.file_path(&spec, &spec.files[1])).unwrap();
        write(manager.file_path(&spec, &spec.files[0]), 10);
        assert!(!manager.is_installed(&spec));
        assert!(!manager.file_statuses(&spec)[1].exists);
    }

    #[test]
    fn queries_do_not_create_anything() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("models");
        let manager = ModelManager::new(&root);
        let spec = two_file_spec();
        let _ = manager.status(&spec);
        let _ = manager.file_statuses(&spec);
        let _ = manager.is_installed(&spec);
        assert!(!root.exists());
        manager.ensure_directory().unwrap();
        assert!(root.is_dir());
    }
}
