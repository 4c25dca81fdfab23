use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DicomaticError {
    #[error("missing config file dicomatic.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to write config file at {0}")]
    ConfigWrite(PathBuf),

    #[error("invalid TLS mode: {0}")]
    InvalidTlsMode(String),

    #[error("DICOM server endpoint is incomplete: missing {0}")]
    IncompleteEndpoint(String),

    #[error("failed to invoke query command: {0}")]
    QueryInvocation(String),

    #[error("download failed for {subject} (UID={uid}): {message}")]
    DownloadFailed {
        subject: String,
        uid: String,
        message: String,
    },

    #[error("failed to stage credentials: {0}")]
    Credentials(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
