use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::DicomaticError;

/// TLS flavor handed to findscu as a `--tls-*` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    Aes,
    Ssl,
    None,
}

impl TlsMode {
    pub fn flag(&self) -> String {
        format!("--tls-{self}")
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Aes => write!(f, "aes"),
            TlsMode::Ssl => write!(f, "ssl"),
            TlsMode::None => write!(f, "none"),
        }
    }
}

impl FromStr for TlsMode {
    type Err = DicomaticError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "aes" => Ok(TlsMode::Aes),
            "ssl" => Ok(TlsMode::Ssl),
            "none" => Ok(TlsMode::None),
            _ => Err(DicomaticError::InvalidTlsMode(value.to_string())),
        }
    }
}

/// One study as assembled from the query tool's text output.
///
/// `fields` holds one entry per TagSpec field name; a field that never
/// appeared and a field that appeared with an empty bracket value both
/// surface as `None`/empty downstream. The derived labels are filled in by
/// the session assigner and taxonomy matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyRecord {
    pub fields: BTreeMap<String, Option<String>>,
    pub sub_label: Option<String>,
    pub ses_label: Option<String>,
    pub out_dir: Option<Utf8PathBuf>,
}

pub const FIELD_STUDY_UID: &str = "study_uid";
pub const FIELD_PATIENT_NAME: &str = "patient_name";
pub const FIELD_STUDY_DATE: &str = "study_date";
pub const FIELD_PATIENT_SEX: &str = "patient_sex";
pub const FIELD_PATIENT_AGE: &str = "patient_age";

impl StudyRecord {
    pub fn empty<'a>(field_names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            fields: field_names
                .into_iter()
                .map(|name| (name.to_string(), None))
                .collect(),
            sub_label: None,
            ses_label: None,
            out_dir: None,
        }
    }

    pub fn set(&mut self, field: &str, value: String) {
        self.fields.insert(field.to_string(), Some(value));
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|value| value.as_deref())
            .filter(|value| !value.is_empty())
    }

    pub fn study_uid(&self) -> Option<&str> {
        self.get(FIELD_STUDY_UID)
    }

    pub fn patient_name(&self) -> &str {
        self.get(FIELD_PATIENT_NAME).unwrap_or("")
    }

    pub fn study_date(&self) -> &str {
        self.get(FIELD_STUDY_DATE).unwrap_or("")
    }

    /// Sort key for date-ascending ordering. Non-numeric or empty dates sort
    /// earliest rather than being rejected.
    pub fn date_key(&self) -> u64 {
        let date = self.study_date();
        if !date.is_empty() && date.chars().all(|ch| ch.is_ascii_digit()) {
            date.parse().unwrap_or(0)
        } else {
            0
        }
    }
}

/// Sentinel pushing non-numeric labels after every real subject/session.
pub const LABEL_SORT_SENTINEL: u64 = 999_999_999;

/// Numeric sort key for `sub-XXX` / `ses-YY` labels.
pub fn label_number(label: &str) -> u64 {
    let digits: String = label.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.is_empty() {
        return LABEL_SORT_SENTINEL;
    }
    digits.parse().unwrap_or(LABEL_SORT_SENTINEL)
}
