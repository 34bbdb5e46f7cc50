//! Typed failures for the fetch and selection paths.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while talking to the remote video host.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("expected exactly one config_url in page, found {found}")]
    PatternMismatch { found: usize },
    #[error("invalid player config: {0}")]
    InvalidConfig(#[from] serde_json::Error),
    #[error("player config for clip {clip} lists no progressive streams")]
    NoStreams { clip: u64 },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Transient network trouble is worth another attempt; anything derived
    /// from the response content is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::PatternMismatch { .. }
            | FetchError::InvalidConfig(_)
            | FetchError::NoStreams { .. }
            | FetchError::Io(_) => false,
        }
    }
}

/// Reasons a preroll could not be produced. None of these are fatal to
/// playback; the selector logs them and returns no intro.
#[derive(Debug, Error)]
pub enum PrerollError {
    #[error("invalid genre configuration: genre '{name}' has no local source")]
    InvalidGenreConfig { name: String },
    #[error("no preroll candidates under {}", .0.display())]
    NoCandidates(PathBuf),
    #[error("no preroll found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("no local, genre or remote preroll source is configured")]
    NoSource,
    #[error("remote fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("preroll cache error: {0}")]
    Cache(#[source] std::io::Error),
    #[error("catalog error: {0:#}")]
    Catalog(anyhow::Error),
}
