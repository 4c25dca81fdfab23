use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::domain::{FIELD_PATIENT_AGE, FIELD_PATIENT_SEX, StudyRecord};
use crate::download::{DownloadClient, cleanup_attached_files, has_existing_archives};
use crate::error::DicomaticError;
use crate::metadata::{MetadataStore, parse_age};
use crate::parser::{TagDictionary, parse_studies};
use crate::query::{QueryClient, QueryMatch};
use crate::session::group_and_assign;
use crate::taxonomy::{LocalTaxonomy, match_records};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub cleanup_attached: bool,
    pub skip_existing_archives: bool,
    pub collect_metadata: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct App<Q: QueryClient, D: DownloadClient> {
    query: Q,
    download: D,
    tags: TagDictionary,
    session_map: BTreeMap<String, String>,
}

impl<Q: QueryClient, D: DownloadClient> App<Q, D> {
    pub fn new(
        query: Q,
        download: D,
        tags: TagDictionary,
        session_map: BTreeMap<String, String>,
    ) -> Self {
        Self {
            query,
            download,
            tags,
            session_map,
        }
    }

    /// Runs one study query and parses the output into records sorted by
    /// date ascending. A failed or empty query is "no records", not an
    /// error.
    pub fn query_studies(&self, query: &QueryMatch) -> Result<Vec<StudyRecord>, DicomaticError> {
        let Some(output) = self.query.find_studies(query)? else {
            return Ok(Vec::new());
        };
        let mut studies = parse_studies(&output, &self.tags);
        studies.sort_by_key(|study| study.date_key());
        Ok(studies)
    }

    /// Groups by subject and assigns session labels, returning records in
    /// overall date order.
    pub fn assign_sessions(&self, studies: Vec<StudyRecord>) -> Vec<StudyRecord> {
        group_and_assign(studies, Some(&self.session_map))
    }

    /// Enumerates every study on the server and keeps only those matching
    /// the local subject/session folders.
    pub fn reconcile_local(
        &self,
        taxonomy: &LocalTaxonomy,
    ) -> Result<Vec<StudyRecord>, DicomaticError> {
        let studies = self.query_studies(&QueryMatch::AllStudies)?;
        let mut matched = match_records(studies, taxonomy, Some(&self.session_map));
        matched.sort_by_key(|study| study.date_key());
        Ok(matched)
    }

    /// Downloads the given studies strictly sequentially, in order. A failed
    /// download aborts only that study; the run continues.
    pub fn download_all(
        &self,
        studies: &[StudyRecord],
        options: &DownloadOptions,
        metadata: &mut MetadataStore,
    ) -> DownloadSummary {
        let mut summary = DownloadSummary::default();

        for study in studies {
            let sub_label = study.sub_label.as_deref().unwrap_or("sub-unknown");
            let ses_label = study.ses_label.as_deref().unwrap_or("-");

            let Some(uid) = study.study_uid() else {
                warn!(subject = sub_label, "study has no StudyInstanceUID, skipping");
                summary.failed += 1;
                continue;
            };
            let Some(out_dir) = study.out_dir.as_deref() else {
                warn!(subject = sub_label, uid, "study has no output directory, skipping");
                summary.failed += 1;
                continue;
            };

            if options.skip_existing_archives && has_existing_archives(out_dir) {
                warn!(
                    subject = sub_label,
                    session = ses_label,
                    %out_dir,
                    "existing archives found, skipping"
                );
                summary.skipped += 1;
                continue;
            }

            info!(subject = sub_label, session = ses_label, uid, "downloading study");
            if let Err(err) = self.download.download_study(uid, out_dir) {
                warn!(subject = sub_label, uid, %err, "download failed, continuing");
                summary.failed += 1;
                continue;
            }

            if options.cleanup_attached {
                cleanup_attached_files(out_dir);
            }

            if options.collect_metadata {
                let age = study.get(FIELD_PATIENT_AGE).and_then(parse_age);
                let sex = study.get(FIELD_PATIENT_SEX).unwrap_or("");
                metadata.record(sub_label, age, sex);
            }

            summary.completed += 1;
        }

        summary
    }
}
