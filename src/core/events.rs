use serde::Serialize;

use crate::error::{DownloadError, FailureKind};
use crate::models::{
    DownloadEvent, FileStatus, InstallStatus, ModelKind, ModelManager, ModelSpec,
};

const MIB: u64 = 1024 * 1024;

/// UI-facing state of one catalog entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRowState {
    pub spec_id: String,
    pub display_name: String,
    pub kind: ModelKind,
    pub status: InstallStatus,
    pub is_downloading: bool,
    pub expanded: bool,
    pub file_statuses: Vec<FileStatus>,
    pub current_file_name: Option<String>,
    pub current_file_pct: Option<u8>,
    pub overall_pct: Option<u8>,
    pub progress_text: Option<String>,
    pub error_text: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelCenterState {
    pub rows: Vec<ModelRowState>,
    pub overall_busy: bool,
}

impl ModelCenterState {
    pub fn row(&self, spec_id: &str) -> Option<&ModelRowState> {
        self.rows.iter().find(|row| row.spec_id == spec_id)
    }

    pub(crate) fn row_mut(&mut self, spec_id: &str) -> Option<&mut ModelRowState> {
        self.rows.iter_mut().find(|row| row.spec_id == spec_id)
    }
}

impl ModelRowState {
    pub fn from_disk(spec: &ModelSpec, manager: &ModelManager) -> Self {
        Self {
            spec_id: spec.id.clone(),
            display_name: spec.display_name.clone(),
            kind: spec.kind,
            status: manager.status(spec),
            is_downloading: false,
            expanded: false,
            file_statuses: manager.file_statuses(spec),
            current_file_name: None,
            current_file_pct: None,
            overall_pct: None,
            progress_text: None,
            error_text: None,
            failure_kind: None,
        }
    }

    pub(crate) fn sync_with_disk(&mut self, spec: &ModelSpec, manager: &ModelManager) {
        self.status = manager.status(spec);
        self.file_statuses = manager.file_statuses(spec);
    }

    pub(crate) fn begin(&mut self, text: &str) {
        self.is_downloading = true;
        self.overall_pct = None;
        self.progress_text = Some(text.to_string());
        self.error_text = None;
        self.failure_kind = None;
    }

    pub(crate) fn apply(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::FileProgress {
                file_name,
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let pct = progress_percent(*bytes_downloaded, *total_bytes);
                self.current_file_name = Some(file_name.clone());
                self.current_file_pct = pct;
                self.progress_text = Some(progress_text(file_name, *bytes_downloaded, pct));
            }
            DownloadEvent::SourceFailed { file_name, .. } => {
                self.current_file_pct = None;
                self.progress_text = Some(format!("Retrying {file_name} from another source"));
            }
            DownloadEvent::FileCompleted { file_name, .. } => {
                self.progress_text = Some(format!("Downloaded {file_name}"));
            }
        }
    }

    /// The downloader's success is only trusted if the disk agrees.
    pub(crate) fn finish_download(&mut self, spec: &ModelSpec, manager: &ModelManager) {
        self.clear_transfer();
        self.sync_with_disk(spec, manager);
        if self.status == InstallStatus::Installed {
            self.overall_pct = Some(100);
            self.progress_text = Some("Installed".into());
            self.error_text = None;
            self.failure_kind = None;
        } else {
            let failing = self
                .file_statuses
                .iter()
                .filter(|file| !file.meets_min_bytes)
                .count();
            self.error_text = Some(format!(
                "Download finished but {failing} file(s) failed verification"
            ));
            self.failure_kind = Some(FailureKind::Integrity);
        }
    }

    pub(crate) fn fail(&mut self, spec: &ModelSpec, manager: &ModelManager, error: &DownloadError) {
        self.clear_transfer();
        self.sync_with_disk(spec, manager);
        self.error_text = Some(error.to_string());
        self.failure_kind = Some(error.kind());
    }

    pub(crate) fn finish_delete(&mut self, spec: &ModelSpec, manager: &ModelManager) {
        self.clear_transfer();
        self.sync_with_disk(spec, manager);
        self.error_text = None;
        self.failure_kind = None;
    }

    /// For a transfer whose task went away without reporting back.
    pub(crate) fn interrupt(&mut self, spec: &ModelSpec, manager: &ModelManager) {
        self.clear_transfer();
        self.sync_with_disk(spec, manager);
        self.error_text = Some("Download interrupted".into());
        self.failure_kind = Some(FailureKind::Cancelled);
    }

    fn clear_transfer(&mut self) {
        self.is_downloading = false;
        self.current_file_name = None;
        self.current_file_pct = None;
        self.overall_pct = None;
        self.progress_text = None;
    }
}

/// Percent of a file, only when its total size is known.
#[must_use]
pub fn progress_percent(downloaded: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|total| *total > 0)?;
    let pct = (downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    Some(pct as u8)
}

#[must_use]
pub fn progress_text(file_name: &str, downloaded: u64, pct: Option<u8>) -> String {
    match pct {
        Some(pct) => format!("Downloading {file_name} ({pct}%)"),
        None => format!("Downloading {file_name} ({}MB)", downloaded / MIB),
    }
}
