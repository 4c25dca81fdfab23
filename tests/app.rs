use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use dicomatic::app::{App, DownloadOptions};
use dicomatic::config::TagEntry;
use dicomatic::domain::{FIELD_PATIENT_NAME, StudyRecord};
use dicomatic::download::DownloadClient;
use dicomatic::error::DicomaticError;
use dicomatic::metadata::MetadataStore;
use dicomatic::parser::TagDictionary;
use dicomatic::query::{QueryClient, QueryMatch};
use dicomatic::taxonomy::LocalTaxonomy;

struct MockQuery {
    output: Option<String>,
}

impl QueryClient for MockQuery {
    fn find_studies(&self, _query: &QueryMatch) -> Result<Option<String>, DicomaticError> {
        Ok(self.output.clone())
    }
}

#[derive(Default)]
struct MockDownload {
    fail_uids: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl DownloadClient for MockDownload {
    fn download_study(&self, uid: &str, _out_dir: &Utf8Path) -> Result<(), DicomaticError> {
        self.calls.lock().unwrap().push(uid.to_string());
        if self.fail_uids.contains(uid) {
            return Err(DicomaticError::DownloadFailed {
                subject: "sub-001".to_string(),
                uid: uid.to_string(),
                message: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

fn tags() -> TagDictionary {
    let tag_map: BTreeMap<String, TagEntry> = [
        ("PatientName", "(0010,0010)", "PN", "patient_name"),
        ("StudyDate", "(0008,0020)", "DA", "study_date"),
        ("PatientSex", "(0010,0040)", "CS", "patient_sex"),
        ("PatientAge", "(0010,1010)", "AS", "patient_age"),
        ("StudyInstanceUID", "(0020,000D)", "UI", "study_uid"),
    ]
    .into_iter()
    .map(|(attr, group_elem, vr, field)| {
        (
            attr.to_string(),
            TagEntry {
                group_elem: group_elem.to_string(),
                vr: vr.to_string(),
                field: field.to_string(),
            },
        )
    })
    .collect();
    TagDictionary::new(&tag_map)
}

fn app(output: Option<&str>, download: MockDownload) -> App<MockQuery, MockDownload> {
    let session_map: BTreeMap<String, String> =
        [("baseline".to_string(), "01".to_string())].into_iter().collect();
    App::new(
        MockQuery {
            output: output.map(str::to_string),
        },
        download,
        tags(),
        session_map,
    )
}

fn task(uid: &str, sub: &str, out_dir: &Utf8Path) -> StudyRecord {
    let mut record = StudyRecord::empty([
        FIELD_PATIENT_NAME,
        "study_uid",
        "patient_sex",
        "patient_age",
    ]);
    record.set("study_uid", uid.to_string());
    record.set("patient_sex", "F".to_string());
    record.set("patient_age", "065Y".to_string());
    record.sub_label = Some(sub.to_string());
    record.ses_label = Some("ses-01".to_string());
    record.out_dir = Some(out_dir.to_path_buf());
    record
}

fn options(collect_metadata: bool, skip_existing: bool) -> DownloadOptions {
    DownloadOptions {
        cleanup_attached: false,
        skip_existing_archives: skip_existing,
        collect_metadata,
    }
}

#[test]
fn query_results_are_sorted_by_date() {
    let output = "\
(0008,0020) DA [20230901]
(0010,0010) PN [2023_09_01_002_baseline]
(0020,000D) UI [1.2]
I: status=ff00H
(0008,0020) DA [20230822]
(0010,0010) PN [2023_08_22_001_baseline]
(0020,000D) UI [1.1]
I: status=0H
";
    let app = app(Some(output), MockDownload::default());
    let studies = app.query_studies(&QueryMatch::AllStudies).unwrap();
    assert_eq!(studies.len(), 2);
    assert_eq!(studies[0].study_uid(), Some("1.1"));
    assert_eq!(studies[1].study_uid(), Some("1.2"));
}

#[test]
fn failed_query_means_no_records() {
    let app = app(None, MockDownload::default());
    let studies = app
        .query_studies(&QueryMatch::StudyDescription("x".to_string()))
        .unwrap();
    assert!(studies.is_empty());
}

#[test]
fn reconcile_keeps_only_taxonomy_matches() {
    let output = "\
(0010,0010) PN [2023_08_22_001_baseline]
(0020,000D) UI [1.1]
I: status=ff00H
(0010,0010) PN [2023_08_23_099_baseline]
(0020,000D) UI [1.99]
I: status=0H
";
    let subjects: BTreeMap<String, BTreeSet<String>> = [(
        "sub-001".to_string(),
        ["ses-01".to_string()].into_iter().collect(),
    )]
    .into_iter()
    .collect();
    let taxonomy = LocalTaxonomy::from_entries(Utf8PathBuf::from("/data/bids"), subjects);

    let app = app(Some(output), MockDownload::default());
    let matched = app.reconcile_local(&taxonomy).unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].study_uid(), Some("1.1"));
    assert_eq!(
        matched[0].out_dir.as_ref().unwrap(),
        &Utf8PathBuf::from("/data/bids/sub-001/ses-01")
    );
}

#[test]
fn download_continues_after_per_study_failure() {
    let temp = tempfile::tempdir().unwrap();
    let out_dir = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    fs::create_dir_all(out_dir.as_std_path()).unwrap();

    let download = MockDownload {
        fail_uids: ["1.2".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let app = app(None, download);

    let studies = vec![
        task("1.1", "sub-001", &out_dir),
        task("1.2", "sub-002", &out_dir),
        task("1.3", "sub-003", &out_dir),
    ];
    let mut metadata = MetadataStore::new(out_dir.join("dicom_metadata.json"));
    let summary = app.download_all(&studies, &options(false, false), &mut metadata);

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
}

#[test]
fn existing_archives_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let out_dir = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    fs::create_dir_all(out_dir.as_std_path()).unwrap();
    fs::write(out_dir.join("previous.tar").as_std_path(), b"tar").unwrap();

    let app = app(None, MockDownload::default());
    let studies = vec![task("1.1", "sub-001", &out_dir)];
    let mut metadata = MetadataStore::new(out_dir.join("dicom_metadata.json"));
    let summary = app.download_all(&studies, &options(false, true), &mut metadata);

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 0);
}

#[test]
fn study_without_output_directory_fails_softly() {
    let app = app(None, MockDownload::default());
    let mut study = task("1.1", "sub-001", Utf8Path::new("/tmp"));
    study.out_dir = None;
    let mut metadata = MetadataStore::new(Utf8PathBuf::from("/tmp/dicom_metadata.json"));
    let summary = app.download_all(&[study], &options(false, false), &mut metadata);
    assert_eq!(summary.failed, 1);
}

#[test]
fn metadata_side_file_is_subject_ordered() {
    let temp = tempfile::tempdir().unwrap();
    let out_dir = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    fs::create_dir_all(out_dir.as_std_path()).unwrap();
    let metadata_path = out_dir.join("dicom_metadata.json");

    let app = app(None, MockDownload::default());
    let studies = vec![
        task("1.10", "sub-010", &out_dir),
        task("1.2", "sub-2", &out_dir),
    ];
    let mut metadata = MetadataStore::new(metadata_path.clone());
    let summary = app.download_all(&studies, &options(true, false), &mut metadata);
    assert_eq!(summary.completed, 2);

    let content = fs::read_to_string(metadata_path.as_std_path()).unwrap();
    let pos_2 = content.find("\"sub-2\"").unwrap();
    let pos_10 = content.find("\"sub-010\"").unwrap();
    assert!(pos_2 < pos_10, "sub-2 must come before sub-010");

    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(value["sub-010"]["age"], 65);
    assert_eq!(value["sub-2"]["sex"], "F");
}
