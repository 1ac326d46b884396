//! Download and install manager for on-device clinical note models.
//!
//! [`models`] knows the catalog, inspects what is on disk and fetches files
//! with resume and mirror fallback. [`core`] wraps that in a single-slot
//! session that publishes per-model UI state.

pub mod core;
pub mod error;
pub mod models;

pub use crate::core::{DownloadSession, ModelCenterState, ModelRowState, Settings, SettingsManager};
pub use error::{DownloadError, FailureKind, TransportError};
pub use models::{Catalog, InstallStatus, ModelDownloader, ModelManager, ModelSpec};
