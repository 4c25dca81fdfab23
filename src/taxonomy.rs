use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::StudyRecord;
use crate::error::DicomaticError;
use crate::identity::{resolve_subject, resolve_trailing};
use crate::session::mapped_session;

/// Read-once snapshot of the local `sub-*` / `ses-*` folder layout. Entries
/// not matching the prefixes are ignored; concurrent changes after the scan
/// are not observed.
#[derive(Debug, Clone)]
pub struct LocalTaxonomy {
    root: Utf8PathBuf,
    subjects: BTreeMap<String, BTreeSet<String>>,
}

impl LocalTaxonomy {
    pub fn scan(root: &Utf8Path) -> Result<Self, DicomaticError> {
        let mut subjects = BTreeMap::new();
        if !root.as_std_path().is_dir() {
            return Ok(Self {
                root: root.to_path_buf(),
                subjects,
            });
        }

        let entries = fs::read_dir(root.as_std_path())
            .map_err(|err| DicomaticError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| DicomaticError::Filesystem(err.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("sub-") || !entry.path().is_dir() {
                continue;
            }

            let mut sessions = BTreeSet::new();
            if let Ok(session_entries) = fs::read_dir(entry.path()) {
                for session_entry in session_entries.flatten() {
                    let session_name = session_entry.file_name().to_string_lossy().to_string();
                    if session_name.starts_with("ses-") && session_entry.path().is_dir() {
                        sessions.insert(session_name);
                    }
                }
            }
            subjects.insert(name, sessions);
        }

        Ok(Self {
            root: root.to_path_buf(),
            subjects,
        })
    }

    pub fn from_entries(root: Utf8PathBuf, subjects: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { root, subjects }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(|name| name.as_str())
    }

    pub fn sessions_of(&self, subject: &str) -> Option<&BTreeSet<String>> {
        self.subjects.get(subject)
    }

    pub fn contains(&self, subject: &str, session: &str) -> bool {
        self.subjects
            .get(subject)
            .map(|sessions| sessions.contains(session))
            .unwrap_or(false)
    }
}

/// Reconciles query results against the local folder snapshot. Records whose
/// subject is not a taxonomy key are dropped; session assignment tries the
/// session map first, then the lowercased/trimmed trailing descriptor as a
/// literal candidate. Records whose session is not present under their
/// subject are dropped. Survivors are annotated with labels and an output
/// directory. Output preserves input order.
pub fn match_records(
    studies: Vec<StudyRecord>,
    taxonomy: &LocalTaxonomy,
    session_map: Option<&BTreeMap<String, String>>,
) -> Vec<StudyRecord> {
    let mut matched = Vec::new();
    for mut study in studies {
        let name = study.patient_name().to_string();
        let Some(sub_label) = resolve_subject(&name) else {
            continue;
        };
        let Some(known_sessions) = taxonomy.sessions_of(&sub_label) else {
            continue;
        };

        let trailing = resolve_trailing(&name);
        let ses_label = match mapped_session(trailing.as_deref(), session_map) {
            Some(label) => label,
            None => {
                let literal = trailing
                    .as_deref()
                    .map(|value| value.trim().to_lowercase())
                    .unwrap_or_default();
                if literal.is_empty() || !known_sessions.contains(&literal) {
                    continue;
                }
                literal
            }
        };

        if !known_sessions.contains(&ses_label) {
            continue;
        }

        study.out_dir = Some(taxonomy.root().join(&sub_label).join(&ses_label));
        study.sub_label = Some(sub_label);
        study.ses_label = Some(ses_label);
        matched.push(study);
    }
    matched
}
