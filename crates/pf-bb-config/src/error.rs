//! pf_bb_config errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BbDevError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// FFT table download failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Archive entry that could escape the extraction directory
    #[error("refusing to extract {0}: links are not allowed in FFT archives")]
    UnsafeArchiveEntry(String),

    #[error("no .bin lookup table found in {0}")]
    NoFftTable(PathBuf),

    #[error("pf_bb_config socket {path}: {source}")]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out {0}")]
    Timeout(String),
}

impl BbDevError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BbDevError::Io {
            path: path.into(),
            source,
        }
    }
}
