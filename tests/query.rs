use std::path::Path;

use camino::Utf8Path;

use dicomatic::domain::TlsMode;
use dicomatic::download::cfmm2tar_args;
use dicomatic::query::{QueryMatch, QuerySettings, findscu_args};

fn settings() -> QuerySettings {
    QuerySettings {
        container: "cfmm2tar".to_string(),
        bind: "DEFAULT".to_string(),
        server: "CFMM@dicom.example.ca".to_string(),
        port: "11112".to_string(),
        tls: TlsMode::Aes,
        username: "alice".to_string(),
        password: "secret".to_string(),
        query_tags: vec!["PatientName".to_string(), "StudyInstanceUID".to_string()],
    }
}

#[test]
fn base_query_args() {
    let args = findscu_args(&settings(), &QueryMatch::AllStudies);
    assert_eq!(
        args,
        [
            "run",
            "--rm",
            "--entrypoint",
            "/opt/dcm4che/bin/findscu",
            "cfmm2tar",
            "--bind",
            "DEFAULT",
            "--connect",
            "CFMM@dicom.example.ca:11112",
            "--tls-aes",
            "--user",
            "alice",
            "--user-pass",
            "secret",
            "-L",
            "STUDY",
            "-r",
            "PatientName",
            "-r",
            "StudyInstanceUID",
        ]
    );
}

#[test]
fn description_match_appends_criterion() {
    let args = findscu_args(
        &settings(),
        &QueryMatch::StudyDescription("Khan^Project".to_string()),
    );
    assert_eq!(args[args.len() - 2], "-m");
    assert_eq!(args[args.len() - 1], "StudyDescription=Khan^Project");
}

#[test]
fn patient_match_appends_criterion() {
    let args = findscu_args(
        &settings(),
        &QueryMatch::PatientName("2023_08_22_001_baseline".to_string()),
    );
    assert_eq!(args[args.len() - 1], "PatientName=2023_08_22_001_baseline");
}

#[test]
fn all_studies_omits_criterion() {
    let args = findscu_args(&settings(), &QueryMatch::AllStudies);
    assert!(!args.contains(&"-m".to_string()));
}

#[test]
fn download_args_mount_credentials_and_output() {
    let args = cfmm2tar_args(
        "cfmm2tar",
        Path::new("/tmp/dicom_creds_x"),
        Utf8Path::new("/data/bids/sub-001/ses-01"),
        "1.2.840.1",
    );
    assert_eq!(
        args,
        [
            "run",
            "--rm",
            "-v",
            "/tmp/dicom_creds_x:/mysecrets/uwo_credentials:ro",
            "-v",
            "/data/bids/sub-001/ses-01:/data",
            "cfmm2tar",
            "-c",
            "/mysecrets/uwo_credentials",
            "-u",
            "1.2.840.1",
            "/data",
        ]
    );
}
