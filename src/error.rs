use std::{io, path::PathBuf};

use thiserror::Error;

use crate::profile::ProfileId;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("store file {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("no profile with id {0}")]
    UnknownProfile(ProfileId),
}

#[derive(Error, Debug)]
#[error("failed to start `{}`: {source}", .argv.join(" "))]
pub struct SpawnError {
    pub argv: Vec<String>,
    #[source]
    pub source: io::Error,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("no profile with id {0}")]
    UnknownProfile(ProfileId),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
