use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::TlsMode;
use crate::error::DicomaticError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub dicom: DicomSection,
    #[serde(default)]
    pub session_map: BTreeMap<String, String>,
    pub query_tags: Vec<String>,
    pub tag_map: BTreeMap<String, TagEntry>,
    #[serde(default)]
    pub study_params: StudyParams,
    #[serde(default)]
    pub create_dicom_metadata: bool,
    #[serde(default)]
    pub remove_attached_tar: bool,
    #[serde(default)]
    pub persist_server_settings: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DicomSection {
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsMode>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StudyParams {
    #[serde(default)]
    pub study_description: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
}

/// One TagSpec entry: maps a DICOM attribute name to the `(gggg,eeee)` tag,
/// its value representation, and the record field it populates.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagEntry {
    pub group_elem: String,
    pub vr: String,
    pub field: String,
}

fn default_container() -> String {
    "cfmm2tar".to_string()
}

fn default_bind() -> String {
    "DEFAULT".to_string()
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Config, DicomaticError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("dicomatic.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(DicomaticError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| DicomaticError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DicomaticError::ConfigParse(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// TagSpec invariants: `(group_elem, vr)` pairs and field names must be
    /// unique, since both are used as lookup keys.
    pub fn validate(config: &Config) -> Result<(), DicomaticError> {
        let mut pairs = HashSet::new();
        let mut fields = HashSet::new();
        for entry in config.tag_map.values() {
            if !pairs.insert((entry.group_elem.as_str(), entry.vr.as_str())) {
                return Err(DicomaticError::ConfigParse(format!(
                    "duplicate tag pair {} {} in tag_map",
                    entry.group_elem, entry.vr
                )));
            }
            if !fields.insert(entry.field.as_str()) {
                return Err(DicomaticError::ConfigParse(format!(
                    "duplicate field name {} in tag_map",
                    entry.field
                )));
            }
        }
        Ok(())
    }

    /// Persists interactively-entered server settings back to the config
    /// file. Only called after a successful query.
    pub fn save(config: &Config, path: Option<&str>) -> Result<(), DicomaticError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("dicomatic.json"),
        };
        let content = serde_json::to_string_pretty(config)
            .map_err(|err| DicomaticError::ConfigParse(err.to_string()))?;
        fs::write(&config_path, content)
            .map_err(|_| DicomaticError::ConfigWrite(config_path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "dicom": {
                "server": "CFMM@dicom.example.ca",
                "port": "11112",
                "tls": "aes",
                "username": "alice",
                "password": "secret"
            },
            "query_tags": ["PatientName", "StudyInstanceUID"],
            "tag_map": {
                "PatientName": {"group_elem": "(0010,0010)", "vr": "PN", "field": "patient_name"},
                "StudyInstanceUID": {"group_elem": "(0020,000D)", "vr": "UI", "field": "study_uid"}
            },
            "session_map": {"baseline": "01"}
        }"#
    }

    #[test]
    fn parse_config_defaults() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        ConfigLoader::validate(&config).unwrap();
        assert_eq!(config.dicom.container, "cfmm2tar");
        assert_eq!(config.dicom.bind, "DEFAULT");
        assert_eq!(config.dicom.tls, Some(TlsMode::Aes));
        assert!(!config.create_dicom_metadata);
        assert_eq!(config.session_map.get("baseline").unwrap(), "01");
    }

    #[test]
    fn duplicate_field_rejected() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        config.tag_map.insert(
            "PatientID".to_string(),
            TagEntry {
                group_elem: "(0010,0020)".to_string(),
                vr: "LO".to_string(),
                field: "patient_name".to_string(),
            },
        );
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert_matches!(err, DicomaticError::ConfigParse(_));
    }
}
