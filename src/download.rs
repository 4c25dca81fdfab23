use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8Path;
use tracing::{info, warn};

use crate::error::DicomaticError;

const CONTAINER_CREDENTIALS_PATH: &str = "/mysecrets/uwo_credentials";
const ARCHIVE_EXTENSIONS: &[&str] = &[".zip", ".tar", ".tar.gz", ".tgz"];

/// Argument vector for `docker`, running the cfmm2tar download for one study
/// with the credentials file mounted read-only and the output directory
/// mounted read-write.
pub fn cfmm2tar_args(container: &str, credentials_file: &Path, out_dir: &Utf8Path, uid: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{CONTAINER_CREDENTIALS_PATH}:ro", credentials_file.display()),
        "-v".to_string(),
        format!("{out_dir}:/data"),
        container.to_string(),
        "-c".to_string(),
        CONTAINER_CREDENTIALS_PATH.to_string(),
        "-u".to_string(),
        uid.to_string(),
        "/data".to_string(),
    ]
}

/// All-or-nothing download of one study into its output directory. Success
/// is exit code zero; any failure aborts only that study.
pub trait DownloadClient: Send + Sync {
    fn download_study(&self, uid: &str, out_dir: &Utf8Path) -> Result<(), DicomaticError>;
}

pub struct DockerCfmm2tar {
    container: String,
    credentials_file: PathBuf,
}

impl DockerCfmm2tar {
    pub fn new(container: String, credentials_file: PathBuf) -> Self {
        Self {
            container,
            credentials_file,
        }
    }
}

impl DownloadClient for DockerCfmm2tar {
    fn download_study(&self, uid: &str, out_dir: &Utf8Path) -> Result<(), DicomaticError> {
        fs::create_dir_all(out_dir.as_std_path())
            .map_err(|err| DicomaticError::Filesystem(err.to_string()))?;

        let args = cfmm2tar_args(&self.container, &self.credentials_file, out_dir, uid);
        info!(uid, %out_dir, "running cfmm2tar download");

        let output = Command::new("docker").args(&args).output().map_err(|err| {
            DicomaticError::DownloadFailed {
                subject: String::new(),
                uid: uid.to_string(),
                message: err.to_string(),
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DicomaticError::DownloadFailed {
                subject: String::new(),
                uid: uid.to_string(),
                message: if stderr.is_empty() {
                    format!("exit status {}", output.status)
                } else {
                    stderr
                },
            });
        }
        Ok(())
    }
}

/// True when the output directory already holds a downloaded archive, used
/// to skip re-downloads in the reconcile flow.
pub fn has_existing_archives(out_dir: &Utf8Path) -> bool {
    let Ok(entries) = fs::read_dir(out_dir.as_std_path()) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        ARCHIVE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    })
}

/// Removes leftover `*.attached.tar` / `*.uid` files cfmm2tar leaves behind.
/// Removal failures are warnings, not errors.
pub fn cleanup_attached_files(out_dir: &Utf8Path) {
    let Ok(entries) = fs::read_dir(out_dir.as_std_path()) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".attached.tar") && !name.ends_with(".uid") {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => info!(file = %entry.path().display(), "removed leftover file"),
            Err(err) => warn!(file = %entry.path().display(), %err, "could not remove leftover file"),
        }
    }
}
