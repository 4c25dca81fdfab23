use crate::domain::{FIELD_STUDY_UID, StudyRecord};
use crate::selection::SubjectSessionIndex;

/// Numbered plain-text listing of query results, the way they are presented
/// for index-based selection.
pub fn print_studies(studies: &[StudyRecord], show_mapping: bool) {
    for (idx, study) in studies.iter().enumerate() {
        println!("--- Study #{} ---", idx + 1);
        println!("  Study Date:        {}", study.get("study_date").unwrap_or(""));
        println!("  Patient Name:      {}", study.patient_name());
        println!("  Patient ID:        {}", study.get("patient_id").unwrap_or(""));
        println!(
            "  Study Description: {}",
            study.get("study_description").unwrap_or("")
        );
        println!("  Patient Sex:       {}", study.get("patient_sex").unwrap_or(""));
        println!("  Patient Age:       {}", study.get("patient_age").unwrap_or(""));
        println!("  StudyInstanceUID:  {}", study.get(FIELD_STUDY_UID).unwrap_or(""));
        if show_mapping {
            println!("  Subject:           {}", study.sub_label.as_deref().unwrap_or("-"));
            println!("  Session:           {}", study.ses_label.as_deref().unwrap_or("-"));
        }
        println!();
    }
}

/// Subject/session overview of the reconcile flow, ordered numerically.
pub fn print_taxonomy_overview(index: &SubjectSessionIndex) {
    for subject in index.subjects() {
        println!("--- Subject: {subject} ---");
        println!("Sessions:");
        for session in index.sessions_of(&subject) {
            if let Some(record) = index.get(&subject, &session) {
                let out_dir = record
                    .out_dir
                    .as_ref()
                    .map(|dir| dir.to_string())
                    .unwrap_or_else(|| session.clone());
                println!("  - {out_dir}");
            }
        }
        println!();
    }
}
