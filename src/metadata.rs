use std::collections::HashMap;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::label_number;

static AGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());

/// Demographic entry per subject in the metadata side-file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub age: Option<u32>,
    pub sex: String,
}

/// Extracts the numeric part of a DICOM age string such as `065Y`.
pub fn parse_age(age: &str) -> Option<u32> {
    let captures = AGE_RE.captures(age)?;
    captures[1].parse().ok()
}

/// Accumulator for `dicom_metadata.json`, read-merged-rewritten around each
/// successful download. Not atomic; assumes a single run at a time. I/O
/// failures are warnings and the in-memory view keeps being used.
#[derive(Debug)]
pub struct MetadataStore {
    path: Utf8PathBuf,
    entries: HashMap<String, SubjectMetadata>,
}

impl MetadataStore {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            entries: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self, sub_label: &str) -> Option<&SubjectMetadata> {
        self.entries.get(sub_label)
    }

    /// Merges the on-disk file into memory (file entries win), applies the
    /// new record, and rewrites the whole file ordered by ascending numeric
    /// subject index, non-numeric labels last.
    pub fn record(&mut self, sub_label: &str, age: Option<u32>, sex: &str) {
        self.merge_existing();
        self.entries.insert(
            sub_label.to_string(),
            SubjectMetadata {
                age,
                sex: sex.to_string(),
            },
        );
        self.save();
    }

    fn merge_existing(&mut self) {
        if !self.path.as_std_path().is_file() {
            return;
        }
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %self.path, %err, "could not read metadata file");
                return;
            }
        };
        match serde_json::from_str::<HashMap<String, SubjectMetadata>>(&content) {
            Ok(existing) => self.entries.extend(existing),
            Err(err) => warn!(path = %self.path, %err, "could not parse metadata file"),
        }
    }

    fn save(&self) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent.as_std_path()) {
                warn!(path = %self.path, %err, "could not create metadata directory");
                return;
            }
        }

        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort_by_key(|label| (label_number(label), label.as_str().to_string()));

        let mut ordered = serde_json::Map::new();
        for key in keys {
            match serde_json::to_value(&self.entries[key]) {
                Ok(value) => {
                    ordered.insert(key.clone(), value);
                }
                Err(err) => warn!(subject = %key, %err, "could not serialize metadata entry"),
            }
        }

        match serde_json::to_string_pretty(&ordered) {
            Ok(content) => {
                if let Err(err) = fs::write(self.path.as_std_path(), content) {
                    warn!(path = %self.path, %err, "could not write metadata file");
                }
            }
            Err(err) => warn!(path = %self.path, %err, "could not serialize metadata"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_string_parsing() {
        assert_eq!(parse_age("065Y"), Some(65));
        assert_eq!(parse_age("7"), Some(7));
        assert_eq!(parse_age(""), None);
        assert_eq!(parse_age("unknown"), None);
    }
}
