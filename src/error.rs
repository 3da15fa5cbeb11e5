use std::path::PathBuf;

/// Startup configuration problems. These are fatal: there is no work the
/// streamer can do without an endpoint or a catalog.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no stream URL: set LOFI_YOUTUBE_URL or write one to {}", .0.display())]
    MissingStreamUrl(PathBuf),

    #[error("no playable audio in {}", .0.display())]
    EmptyCatalog(PathBuf),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Failures around the external pipeline process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pipeline process: {0}")]
    Signal(#[source] std::io::Error),

    #[error("failed to wait on pipeline process: {0}")]
    Wait(#[source] std::io::Error),
}
