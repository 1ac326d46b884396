use std::io;

use serde::Serialize;
use thiserror::Error;

/// Failures raised by an HTTP transport before or while streaming a body.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("timed out after {secs}s while {phase}")]
    Timeout { phase: &'static str, secs: u64 },

    #[error("response body failed: {0}")]
    Body(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Network,
    Integrity,
    Storage,
    Cancelled,
}

impl FailureKind {
    #[must_use]
    pub fn hint(self) -> &'static str {
        match self {
            FailureKind::Network => "Check your connection and try again.",
            FailureKind::Integrity => "The server sent an incomplete file. Try again later.",
            FailureKind::Storage => "Check available storage space.",
            FailureKind::Cancelled => "Start the download again to resume.",
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("{file}: {url}: {source}")]
    Transport {
        file: String,
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("HTTP {status} downloading {file}")]
    Http { file: String, status: u16 },

    #[error("Downloaded {file} is too small ({actual} bytes, expected at least {min})")]
    TooSmall { file: String, actual: u64, min: u64 },

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("No download sources configured for {0}")]
    NoSources(String),

    #[error("Failed to finalize {file}: {source}")]
    Finalize {
        file: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(crate) fn storage(context: impl Into<String>, source: io::Error) -> Self {
        DownloadError::Storage {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::Transport { .. } | DownloadError::Http { .. } => FailureKind::Network,
            DownloadError::TooSmall { .. }
            | DownloadError::ChecksumMismatch { .. }
            | DownloadError::NoSources(_) => FailureKind::Integrity,
            DownloadError::Finalize { .. } | DownloadError::Storage { .. } => FailureKind::Storage,
            DownloadError::Cancelled => FailureKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_failure_is_a_storage_problem() {
        let err = DownloadError::Finalize {
            file: "a.gguf".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.kind(), FailureKind::Storage);
        assert!(err.to_string().starts_with("Failed to finalize a.gguf"));
    }

    #[test]
    fn exhausted_sources_are_a_network_problem() {
        let err = DownloadError::Http {
            file: "a.gguf".into(),
            status: 503,
        };
        assert_eq!(err.kind(), FailureKind::Network);
        assert_eq!(err.to_string(), "HTTP 503 downloading a.gguf");
        assert_ne!(err.kind().hint(), FailureKind::Cancelled.hint());
    }

    #[test]
    fn undersized_file_is_an_integrity_problem() {
        let err = DownloadError::TooSmall {
            file: "a.gguf".into(),
            actual: 12,
            min: 100,
        };
        assert_eq!(err.kind(), FailureKind::Integrity);
    }
}
