use std::process::Command;

use tracing::{debug, warn};

use crate::domain::TlsMode;
use crate::error::DicomaticError;

/// Match criterion for a study-level query. `AllStudies` omits the `-m`
/// filter entirely (used by the reconcile flow).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMatch {
    AllStudies,
    StudyDescription(String),
    PatientName(String),
}

/// Everything needed to drive the containerized findscu invocation.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub container: String,
    pub bind: String,
    pub server: String,
    pub port: String,
    pub tls: TlsMode,
    pub username: String,
    pub password: String,
    pub query_tags: Vec<String>,
}

/// Argument vector for `docker`, running findscu at study level with one
/// `-r` per requested attribute and an optional match criterion.
pub fn findscu_args(settings: &QuerySettings, query: &QueryMatch) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--entrypoint".to_string(),
        "/opt/dcm4che/bin/findscu".to_string(),
        settings.container.clone(),
        "--bind".to_string(),
        settings.bind.clone(),
        "--connect".to_string(),
        format!("{}:{}", settings.server, settings.port),
        settings.tls.flag(),
        "--user".to_string(),
        settings.username.clone(),
        "--user-pass".to_string(),
        settings.password.clone(),
        "-L".to_string(),
        "STUDY".to_string(),
    ];

    for tag in &settings.query_tags {
        args.push("-r".to_string());
        args.push(tag.clone());
    }

    match query {
        QueryMatch::AllStudies => {}
        QueryMatch::StudyDescription(description) => {
            args.push("-m".to_string());
            args.push(format!("StudyDescription={description}"));
        }
        QueryMatch::PatientName(name) => {
            args.push("-m".to_string());
            args.push(format!("PatientName={name}"));
        }
    }

    args
}

/// Runs a study query and returns the raw text output. `Ok(None)` means the
/// query produced nothing usable (non-zero exit or empty output) and is
/// reported as "no records", never as a parse failure.
pub trait QueryClient: Send + Sync {
    fn find_studies(&self, query: &QueryMatch) -> Result<Option<String>, DicomaticError>;
}

#[derive(Clone)]
pub struct DockerFindscu {
    settings: QuerySettings,
}

impl DockerFindscu {
    pub fn new(settings: QuerySettings) -> Self {
        Self { settings }
    }
}

impl QueryClient for DockerFindscu {
    fn find_studies(&self, query: &QueryMatch) -> Result<Option<String>, DicomaticError> {
        let args = findscu_args(&self.settings, query);
        debug!(container = %self.settings.container, "running findscu query");

        let output = Command::new("docker")
            .args(&args)
            .output()
            .map_err(|err| DicomaticError::QueryInvocation(err.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(stderr, "findscu exited with non-zero status");
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(stdout))
    }
}
