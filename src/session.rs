use std::collections::BTreeMap;

use crate::domain::StudyRecord;
use crate::identity::{resolve_subject, resolve_trailing};

/// Looks up the trailing descriptor in the session map (case-insensitive,
/// trimmed). Mapped values gain a `ses-` prefix only when missing one.
pub fn mapped_session(
    trailing: Option<&str>,
    session_map: Option<&BTreeMap<String, String>>,
) -> Option<String> {
    let trailing = trailing?;
    let session_map = session_map?;
    let key = trailing.trim().to_lowercase();
    let mapped = session_map.get(&key)?;
    if mapped.is_empty() {
        return None;
    }
    if mapped.starts_with("ses-") {
        Some(mapped.clone())
    } else {
        Some(format!("ses-{mapped}"))
    }
}

/// Groups records by resolved subject label, stamping `sub_label` on each.
/// Names with no digit group fall into `sub-unknown`.
pub fn group_by_subject(studies: Vec<StudyRecord>) -> BTreeMap<String, Vec<StudyRecord>> {
    let mut grouped: BTreeMap<String, Vec<StudyRecord>> = BTreeMap::new();
    for mut study in studies {
        let sub_label =
            resolve_subject(study.patient_name()).unwrap_or_else(|| "sub-unknown".to_string());
        study.sub_label = Some(sub_label.clone());
        grouped.entry(sub_label).or_default().push(study);
    }
    grouped
}

/// Assigns a session label to every record of one subject, in ascending date
/// order. Session-map hits never consume a counter value; the sequential
/// counter only advances for records that fell through to it.
pub fn assign_sessions(
    group: &mut Vec<StudyRecord>,
    session_map: Option<&BTreeMap<String, String>>,
) {
    group.sort_by_key(|study| study.date_key());
    let mut counter = 1u32;
    for study in group.iter_mut() {
        let trailing = resolve_trailing(study.patient_name());
        let label = match mapped_session(trailing.as_deref(), session_map) {
            Some(label) => label,
            None => {
                let label = format!("ses-{counter:02}");
                counter += 1;
                label
            }
        };
        study.ses_label = Some(label);
    }
}

/// Groups, assigns sessions per subject, and returns the records flattened
/// in overall date-ascending order for presentation.
pub fn group_and_assign(
    studies: Vec<StudyRecord>,
    session_map: Option<&BTreeMap<String, String>>,
) -> Vec<StudyRecord> {
    let mut grouped = group_by_subject(studies);
    let mut flat = Vec::new();
    for group in grouped.values_mut() {
        assign_sessions(group, session_map);
        flat.append(group);
    }
    flat.sort_by_key(|study| study.date_key());
    flat
}
