mod catalog;
mod download;
mod manager;
mod metadata;
mod transport;

pub use catalog::{
    Catalog, ModelFile, ModelKind, ModelSpec, ASR_PARAKEET, LLM_LIQUID_STARTER, LLM_QWEN_UPGRADE,
};
pub use download::{CancelFlag, DownloadEvent, ModelDownloader};
pub use manager::{resolve_model_dir, FileStatus, InstallStatus, ModelManager};
pub use metadata::sha256_file;
pub use transport::{
    HttpTransport, RemoteBody, RemoteResponse, Timeouts, Transport, DEFAULT_USER_AGENT,
};

#[cfg(test)]
pub(crate) use transport::testing;
