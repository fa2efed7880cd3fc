use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Errors raised while importing a scenario.
///
/// Scope follows the variant: `Config` and `ScenarioNotFound` abort the whole
/// invocation, `Scan` aborts one scenario, `Copy` is recorded per file and
/// never stops a batch. `Persistence` rides along with the scenario result.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("config error in {path:?}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("unknown scenario '{name}', known scenarios: {known}")]
    ScenarioNotFound { name: String, known: String },

    #[error("cannot scan {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {path:?}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: CopyError,
    },

    #[error("failed to persist watermark for '{scenario}': {source}")]
    Persistence {
        scenario: String,
        #[source]
        source: StoreError,
    },

    #[error("watermark store: {0}")]
    Store(#[from] StoreError),
}

impl ImportError {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ImportError::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("bad timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}
