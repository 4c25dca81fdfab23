use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::domain::{StudyRecord, label_number};

/// Matched studies keyed by subject label, then session label. Iteration is
/// in ascending numeric label order, non-numeric labels last.
#[derive(Debug, Clone, Default)]
pub struct SubjectSessionIndex {
    map: BTreeMap<String, BTreeMap<String, StudyRecord>>,
}

impl SubjectSessionIndex {
    /// Records without both labels cannot be indexed and are dropped.
    pub fn from_records(records: Vec<StudyRecord>) -> Self {
        let mut map: BTreeMap<String, BTreeMap<String, StudyRecord>> = BTreeMap::new();
        for record in records {
            let (Some(sub), Some(ses)) = (record.sub_label.clone(), record.ses_label.clone())
            else {
                continue;
            };
            map.entry(sub).or_default().insert(ses, record);
        }
        Self { map }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.map.keys().cloned().collect();
        subjects.sort_by_key(|label| label_number(label));
        subjects
    }

    pub fn sessions_of(&self, subject: &str) -> Vec<String> {
        let Some(sessions) = self.map.get(subject) else {
            return Vec::new();
        };
        let mut labels: Vec<String> = sessions.keys().cloned().collect();
        labels.sort_by_key(|label| label_number(label));
        labels
    }

    pub fn get(&self, subject: &str, session: &str) -> Option<&StudyRecord> {
        self.map.get(subject)?.get(session)
    }

    pub fn contains_subject(&self, subject: &str) -> bool {
        self.map.contains_key(subject)
    }

    fn session_label_set(&self) -> BTreeSet<String> {
        self.map
            .values()
            .flat_map(|sessions| sessions.keys().cloned())
            .collect()
    }

    /// Every record in subject-then-session numeric order.
    pub fn all_records(&self) -> Vec<StudyRecord> {
        let mut records = Vec::new();
        for subject in self.subjects() {
            for session in self.sessions_of(&subject) {
                if let Some(record) = self.get(&subject, &session) {
                    records.push(record.clone());
                }
            }
        }
        records
    }
}

/// Outcome of interpreting a user token line against the index. The four
/// combination rules of the reconcile flow, plus the nothing-recognized
/// outcome (a user-facing result, not an error).
#[derive(Debug, Clone)]
pub enum Selection {
    /// Empty token line: every (subject, session) pair.
    Everything(Vec<StudyRecord>),
    /// Only session labels recognized: those sessions, for every subject
    /// that has them.
    SessionsOnly(Vec<StudyRecord>),
    /// Only subject labels recognized: all sessions of each. The CLI may
    /// layer a per-subject narrowing prompt on top.
    SubjectsOnly {
        subjects: Vec<String>,
        records: Vec<StudyRecord>,
    },
    /// Both kinds recognized: the Cartesian-product intersection.
    Exact(Vec<StudyRecord>),
    /// No token recognized at all.
    Nothing,
}

impl Selection {
    pub fn records(&self) -> &[StudyRecord] {
        match self {
            Selection::Everything(records)
            | Selection::SessionsOnly(records)
            | Selection::Exact(records) => records,
            Selection::SubjectsOnly { records, .. } => records,
            Selection::Nothing => &[],
        }
    }
}

pub fn filter_tokens(index: &SubjectSessionIndex, tokens: &[String]) -> Selection {
    if tokens.is_empty() {
        return Selection::Everything(index.all_records());
    }

    let session_labels = index.session_label_set();
    let recognized_subjects: Vec<String> = tokens
        .iter()
        .filter(|token| index.contains_subject(token))
        .cloned()
        .collect();
    let recognized_sessions: Vec<String> = tokens
        .iter()
        .filter(|token| session_labels.contains(token.as_str()))
        .cloned()
        .collect();

    match (recognized_subjects.is_empty(), recognized_sessions.is_empty()) {
        (true, true) => Selection::Nothing,
        (true, false) => {
            let mut records = Vec::new();
            for subject in index.subjects() {
                for session in index.sessions_of(&subject) {
                    if recognized_sessions.contains(&session) {
                        if let Some(record) = index.get(&subject, &session) {
                            records.push(record.clone());
                        }
                    }
                }
            }
            Selection::SessionsOnly(records)
        }
        (false, true) => {
            let mut subjects: Vec<String> = recognized_subjects;
            subjects.sort_by_key(|label| label_number(label));
            subjects.dedup();
            let mut records = Vec::new();
            for subject in &subjects {
                for session in index.sessions_of(subject) {
                    if let Some(record) = index.get(subject, &session) {
                        records.push(record.clone());
                    }
                }
            }
            Selection::SubjectsOnly { subjects, records }
        }
        (false, false) => {
            let mut subjects: Vec<String> = recognized_subjects;
            subjects.sort_by_key(|label| label_number(label));
            subjects.dedup();
            let mut records = Vec::new();
            for subject in &subjects {
                for session in &recognized_sessions {
                    match index.get(subject, session) {
                        Some(record) => records.push(record.clone()),
                        None => {
                            warn!(subject, session, "session not found for subject, skipping")
                        }
                    }
                }
            }
            Selection::Exact(records)
        }
    }
}

/// Numbered-list selection used by the description/patient query flows:
/// tokens are 1-based list indices, exact patient names, or exact study
/// UIDs. Unmatched tokens are reported back as warnings and skipped.
pub fn select_from_list(
    studies: &[StudyRecord],
    tokens: &[String],
) -> (Vec<StudyRecord>, Vec<String>) {
    let mut name_map: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut uid_map: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, study) in studies.iter().enumerate() {
        name_map.entry(study.patient_name()).or_default().push(idx);
        if let Some(uid) = study.study_uid() {
            uid_map.insert(uid, idx);
        }
    }

    let mut matched: BTreeSet<usize> = BTreeSet::new();
    let mut warnings = Vec::new();
    for token in tokens {
        if let Ok(number) = token.parse::<usize>() {
            if (1..=studies.len()).contains(&number) {
                matched.insert(number - 1);
            } else {
                warnings.push(format!("no study with index {number}, skipping"));
            }
            continue;
        }

        if let Some(indices) = name_map.get(token.as_str()) {
            matched.extend(indices.iter().copied());
            continue;
        }

        if let Some(idx) = uid_map.get(token.as_str()) {
            matched.insert(*idx);
            continue;
        }

        warnings.push(format!("no match for '{token}', skipping"));
    }

    let selected = matched.into_iter().map(|idx| studies[idx].clone()).collect();
    (selected, warnings)
}
