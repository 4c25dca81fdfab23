use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::DicomaticError;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The credentials file handed to the download container: either an existing
/// secrets file, or a temp file that is removed when dropped.
pub enum StagedCredentials {
    Secrets(PathBuf),
    Temp(NamedTempFile),
}

impl StagedCredentials {
    pub fn path(&self) -> &Path {
        match self {
            StagedCredentials::Secrets(path) => path,
            StagedCredentials::Temp(file) => file.path(),
        }
    }
}

/// Candidate secrets-file locations, tried in order: the project-local
/// `.secrets/uwo_credentials`, then the same layout in the home directory.
pub fn default_secrets_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(".secrets").join("uwo_credentials")];
    if let Some(dirs) = BaseDirs::new() {
        paths.push(dirs.home_dir().join(".secrets").join("uwo_credentials"));
    }
    paths
}

/// Reads a two-line username/password file. Returns `None` when the file is
/// missing, empty, or incomplete.
pub fn load_secrets_file(path: &Path) -> Option<Credentials> {
    if !path.is_file() {
        return None;
    }
    let content = fs::read_to_string(path).ok()?;
    let mut lines = content.lines().map(|line| line.trim());
    let username = lines.next()?.to_string();
    let password = lines.next()?.to_string();
    if username.is_empty() || password.is_empty() {
        debug!(path = %path.display(), "secrets file is incomplete");
        return None;
    }
    Some(Credentials { username, password })
}

/// Finds the first usable secrets file among the default locations.
pub fn find_secrets() -> Option<(PathBuf, Credentials)> {
    for path in default_secrets_paths() {
        if let Some(credentials) = load_secrets_file(&path) {
            debug!(path = %path.display(), "using credentials from secrets file");
            return Some((path, credentials));
        }
    }
    None
}

/// Writes credentials to a temp file for the read-only container mount.
pub fn stage_temp(credentials: &Credentials) -> Result<StagedCredentials, DicomaticError> {
    let mut file = tempfile::Builder::new()
        .prefix("dicom_creds_")
        .tempfile()
        .map_err(|err| DicomaticError::Credentials(err.to_string()))?;
    writeln!(file, "{}", credentials.username)
        .and_then(|_| writeln!(file, "{}", credentials.password))
        .map_err(|err| DicomaticError::Credentials(err.to_string()))?;
    file.flush()
        .map_err(|err| DicomaticError::Credentials(err.to_string()))?;
    Ok(StagedCredentials::Temp(file))
}
