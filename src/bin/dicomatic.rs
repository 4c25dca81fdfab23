use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use dicomatic::app::{App, DownloadOptions};
use dicomatic::config::{Config, ConfigLoader};
use dicomatic::credentials::{self, Credentials, StagedCredentials};
use dicomatic::domain::TlsMode;
use dicomatic::download::{DockerCfmm2tar, DownloadClient};
use dicomatic::error::DicomaticError;
use dicomatic::metadata::MetadataStore;
use dicomatic::output::{print_studies, print_taxonomy_overview};
use dicomatic::parser::TagDictionary;
use dicomatic::query::{DockerFindscu, QueryClient, QueryMatch, QuerySettings};
use dicomatic::selection::{Selection, SubjectSessionIndex, filter_tokens, select_from_list};
use dicomatic::taxonomy::LocalTaxonomy;

#[derive(Parser)]
#[command(name = "dicomatic")]
#[command(about = "DICOM query & download tool (findscu/cfmm2tar front-end)")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search by StudyDescription and pick studies to download")]
    Description(DescriptionArgs),
    #[command(about = "Search by PatientName and download all matches")]
    Patient(PatientArgs),
    #[command(about = "Match studies against local sub-*/ses-* folders")]
    Reconcile(ReconcileArgs),
}

#[derive(Args, Clone)]
struct DescriptionArgs {
    description: Option<String>,
}

#[derive(Args, Clone)]
struct PatientArgs {
    name: Option<String>,
}

#[derive(Args, Clone)]
struct ReconcileArgs {
    #[arg(long)]
    bids_root: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<DicomaticError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DicomaticError) -> u8 {
    match error {
        DicomaticError::MissingConfig
        | DicomaticError::ConfigRead(_)
        | DicomaticError::ConfigParse(_)
        | DicomaticError::InvalidTlsMode(_)
        | DicomaticError::IncompleteEndpoint(_) => 2,
        DicomaticError::QueryInvocation(_) | DicomaticError::DownloadFailed { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;

    let command = match cli.command {
        Some(command) => command,
        None => prompt_menu().into_diagnostic()?,
    };

    // Credentials: secrets file, then config values, then prompts.
    let (staged, credentials) = resolve_credentials(&config).into_diagnostic()?;

    let changed_server_settings = prompt_for_server_info(&mut config).into_diagnostic()?;
    let settings = query_settings(&config, &credentials)?;

    let query = DockerFindscu::new(settings);
    let download = DockerCfmm2tar::new(
        config.dicom.container.clone(),
        staged.path().to_path_buf(),
    );
    let tags = TagDictionary::new(&config.tag_map);
    let app = App::new(query, download, tags, config.session_map.clone());

    let session_context = SessionContext {
        config: &config,
        config_path: cli.config.as_deref(),
        changed_server_settings,
    };

    match command {
        Commands::Description(args) => run_description(args, &app, &session_context),
        Commands::Patient(args) => run_patient(args, &app, &session_context),
        Commands::Reconcile(args) => run_reconcile(args, &app, &session_context),
    }?;

    // Keeps a temp credentials file alive until every download has run.
    drop(staged);
    Ok(())
}

struct SessionContext<'a> {
    config: &'a Config,
    config_path: Option<&'a str>,
    changed_server_settings: bool,
}

impl SessionContext<'_> {
    /// Offers to persist interactively-entered server settings, only after a
    /// successful query and only when the config opts in.
    fn maybe_save_server_settings(&self, query_was_successful: bool) {
        if !self.changed_server_settings || !self.config.persist_server_settings {
            return;
        }
        if !query_was_successful {
            println!("Query was not successful; server settings will not be saved.");
            return;
        }
        if prompt_yes_no("Save new server/port/tls to config? (y/n): ").unwrap_or(false) {
            match ConfigLoader::save(self.config, self.config_path) {
                Ok(()) => println!("New server settings have been saved."),
                Err(err) => warn!(%err, "could not save server settings"),
            }
        }
    }

    fn download_options(&self, skip_existing_archives: bool, cleanup: bool) -> DownloadOptions {
        DownloadOptions {
            cleanup_attached: cleanup,
            skip_existing_archives,
            collect_metadata: self.config.create_dicom_metadata,
        }
    }

    fn metadata_store(&self) -> MetadataStore {
        MetadataStore::new(
            Utf8PathBuf::from("sourcedata")
                .join("dicom")
                .join("dicom_metadata.json"),
        )
    }
}

fn resolve_credentials(
    config: &Config,
) -> io::Result<(StagedCredentials, Credentials)> {
    if let Some((path, credentials)) = credentials::find_secrets() {
        return Ok((StagedCredentials::Secrets(path), credentials));
    }

    let username = match config.dicom.username.as_deref().filter(|v| !v.is_empty()) {
        Some(username) => username.to_string(),
        None => prompt_line("Enter DICOM username: ")?,
    };
    let password = match config.dicom.password.as_deref().filter(|v| !v.is_empty()) {
        Some(password) => password.to_string(),
        None => prompt_password("Enter DICOM password: ")?,
    };

    let credentials = Credentials { username, password };
    let staged = credentials::stage_temp(&credentials)
        .map_err(|err| io::Error::other(err.to_string()))?;
    Ok((staged, credentials))
}

fn prompt_for_server_info(config: &mut Config) -> io::Result<bool> {
    let mut changed = false;
    if config.dicom.server.as_deref().unwrap_or("").is_empty() {
        config.dicom.server = Some(prompt_line("Enter DICOM server (host or AET@host): ")?);
        changed = true;
    }
    if config.dicom.port.as_deref().unwrap_or("").is_empty() {
        config.dicom.port = Some(prompt_line("Enter DICOM port: ")?);
        changed = true;
    }
    if config.dicom.tls.is_none() {
        loop {
            let answer = prompt_line("Enter DICOM TLS method (aes, ssl, or none): ")?;
            match answer.parse::<TlsMode>() {
                Ok(mode) => {
                    config.dicom.tls = Some(mode);
                    break;
                }
                Err(_) => println!("Please enter 'aes', 'ssl', or 'none'."),
            }
        }
        changed = true;
    }
    Ok(changed)
}

fn query_settings(
    config: &Config,
    credentials: &Credentials,
) -> Result<QuerySettings, DicomaticError> {
    let server = config
        .dicom
        .server
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DicomaticError::IncompleteEndpoint("server".to_string()))?;
    let port = config
        .dicom
        .port
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DicomaticError::IncompleteEndpoint("port".to_string()))?;
    let tls = config
        .dicom
        .tls
        .ok_or_else(|| DicomaticError::IncompleteEndpoint("tls".to_string()))?;

    Ok(QuerySettings {
        container: config.dicom.container.clone(),
        bind: config.dicom.bind.clone(),
        server,
        port,
        tls,
        username: credentials.username.clone(),
        password: credentials.password.clone(),
        query_tags: config.query_tags.clone(),
    })
}

fn run_description<Q: QueryClient, D: DownloadClient>(
    args: DescriptionArgs,
    app: &App<Q, D>,
    context: &SessionContext<'_>,
) -> miette::Result<()> {
    let description = match args
        .description
        .or_else(|| context.config.study_params.study_description.clone())
        .filter(|v| !v.trim().is_empty())
    {
        Some(description) => description,
        None => {
            let entered = prompt_line("Enter StudyDescription to search for: ").into_diagnostic()?;
            if entered.is_empty() {
                println!("No StudyDescription provided. Exiting.");
                context.maybe_save_server_settings(false);
                return Ok(());
            }
            entered
        }
    };

    let studies = app.query_studies(&QueryMatch::StudyDescription(description.clone()))?;
    if studies.is_empty() {
        println!("No studies found with StudyDescription='{description}'.");
        context.maybe_save_server_settings(false);
        return Ok(());
    }

    println!("\nFound {} studies with description '{description}':", studies.len());
    print_studies(&studies, false);

    if !prompt_yes_no("Would you like to download these studies now? (y/n): ").into_diagnostic()? {
        println!("No downloads selected. Exiting.");
        context.maybe_save_server_settings(true);
        return Ok(());
    }

    println!("Select studies by number, exact patient name, or StudyInstanceUID (space separated).");
    let line = prompt_line("> ").into_diagnostic()?;
    let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if tokens.is_empty() {
        println!("No studies selected. Exiting.");
        context.maybe_save_server_settings(true);
        return Ok(());
    }

    let (selected, warnings) = select_from_list(&studies, &tokens);
    for warning in &warnings {
        warn!("{warning}");
    }
    if selected.is_empty() {
        println!("No valid matches found. Exiting.");
        context.maybe_save_server_settings(true);
        return Ok(());
    }

    download_to_tar_dir(app, selected, context)?;
    context.maybe_save_server_settings(true);
    Ok(())
}

fn run_patient<Q: QueryClient, D: DownloadClient>(
    args: PatientArgs,
    app: &App<Q, D>,
    context: &SessionContext<'_>,
) -> miette::Result<()> {
    let name = match args
        .name
        .or_else(|| context.config.study_params.patient_name.clone())
        .filter(|v| !v.trim().is_empty())
    {
        Some(name) => name,
        None => {
            let entered = prompt_line("Enter PatientName to search for: ").into_diagnostic()?;
            if entered.is_empty() {
                println!("No PatientName provided. Exiting.");
                context.maybe_save_server_settings(false);
                return Ok(());
            }
            entered
        }
    };

    let studies = app.query_studies(&QueryMatch::PatientName(name.clone()))?;
    if studies.is_empty() {
        println!("No studies found for PatientName='{name}'.");
        context.maybe_save_server_settings(false);
        return Ok(());
    }

    println!("\nFound {} studies for PatientName '{name}':", studies.len());
    print_studies(&studies, false);

    if !prompt_yes_no("Download ALL these studies now? (y/n): ").into_diagnostic()? {
        println!("No downloads selected. Exiting.");
        context.maybe_save_server_settings(true);
        return Ok(());
    }

    download_to_tar_dir(app, studies, context)?;
    context.maybe_save_server_settings(true);
    Ok(())
}

/// Shared tail of the description/patient flows: assign sessions, aim every
/// study at sourcedata/tar, download sequentially.
fn download_to_tar_dir<Q: QueryClient, D: DownloadClient>(
    app: &App<Q, D>,
    studies: Vec<dicomatic::domain::StudyRecord>,
    context: &SessionContext<'_>,
) -> miette::Result<()> {
    let tar_dir = Utf8PathBuf::from("sourcedata").join("tar");
    fs::create_dir_all(tar_dir.as_std_path()).into_diagnostic()?;

    let mut studies = app.assign_sessions(studies);
    for study in &mut studies {
        study.out_dir = Some(tar_dir.clone());
    }

    let mut metadata = context.metadata_store();
    let summary = app.download_all(&studies, &context.download_options(false, false), &mut metadata);
    println!(
        "\nAll downloads finished: {} completed, {} skipped, {} failed.",
        summary.completed, summary.skipped, summary.failed
    );
    Ok(())
}

fn run_reconcile<Q: QueryClient, D: DownloadClient>(
    args: ReconcileArgs,
    app: &App<Q, D>,
    context: &SessionContext<'_>,
) -> miette::Result<()> {
    let bids_root = args
        .bids_root
        .unwrap_or_else(|| Utf8PathBuf::from("sourcedata").join("dicom"));
    println!("Searching for sub-* folders in: {bids_root}");

    let taxonomy = LocalTaxonomy::scan(&bids_root)?;
    if taxonomy.is_empty() {
        println!("No sub-* folders found in {bids_root}. Exiting.");
        context.maybe_save_server_settings(false);
        return Ok(());
    }

    let matched = app.reconcile_local(&taxonomy)?;
    if matched.is_empty() {
        println!("No studies matching local subjects/sessions.");
        context.maybe_save_server_settings(false);
        return Ok(());
    }

    println!("\nFound {} studies matching local subjects/sessions.", matched.len());
    print_studies(&matched, true);

    let index = SubjectSessionIndex::from_records(matched);
    println!("\nThe following subjects and sessions are available:\n");
    print_taxonomy_overview(&index);

    println!("Please specify how to filter studies to download:");
    println!(" - Only session labels (e.g. 'ses-01 ses-02'): those sessions for every subject.");
    println!(" - Only subject labels (e.g. 'sub-001 sub-002'): follow-up session prompt per subject.");
    println!(" - Both (e.g. 'sub-001 ses-01'): only those exact subject-session matches.");
    println!(" - Press Enter to download all available subjects and sessions.\n");
    let line = prompt_line("> ").into_diagnostic()?;
    let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();

    let options = context.download_options(true, context.config.remove_attached_tar);
    let mut metadata = context.metadata_store();

    let tasks = match filter_tokens(&index, &tokens) {
        Selection::Everything(records)
        | Selection::SessionsOnly(records)
        | Selection::Exact(records) => records,
        Selection::SubjectsOnly { subjects, .. } => {
            narrow_subject_sessions(&index, &subjects).into_diagnostic()?
        }
        Selection::Nothing => {
            println!("No recognized subjects or sessions found. Exiting.");
            context.maybe_save_server_settings(true);
            return Ok(());
        }
    };

    let summary = app.download_all(&tasks, &options, &mut metadata);
    println!(
        "\nAll downloads finished: {} completed, {} skipped, {} failed.",
        summary.completed, summary.skipped, summary.failed
    );
    context.maybe_save_server_settings(true);
    Ok(())
}

/// Subjects-only follow-up: one session prompt per subject, Enter meaning
/// all of that subject's sessions.
fn narrow_subject_sessions(
    index: &SubjectSessionIndex,
    subjects: &[String],
) -> io::Result<Vec<dicomatic::domain::StudyRecord>> {
    let mut chosen: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for subject in subjects {
        println!("Enter sessions to download for {subject} (space-separated), or press Enter for all:");
        let line = prompt_line("> ")?;
        chosen.insert(
            subject,
            line.split_whitespace().map(str::to_string).collect(),
        );
    }

    let mut tasks = Vec::new();
    for subject in subjects {
        let requested = &chosen[subject.as_str()];
        let sessions = if requested.is_empty() {
            index.sessions_of(subject)
        } else {
            requested.clone()
        };
        for session in sessions {
            match index.get(subject, &session) {
                Some(record) => tasks.push(record.clone()),
                None => println!("  Session {session} not found for {subject}. Skipping."),
            }
        }
    }
    Ok(tasks)
}

fn prompt_menu() -> io::Result<Commands> {
    println!("\n[==== DICOMATIC - DICOM Query & Download ====]");
    loop {
        println!("\nWhich query+download mode do you want?");
        println!(" 1) By StudyDescription (list multiple studies)");
        println!(" 2) By PatientName (search for a specific participant)");
        println!(" 3) By local subjects in sourcedata/dicom\n");
        let choice = prompt_line("Enter 1, 2, or 3.\n> ")?;
        match choice.as_str() {
            "1" => return Ok(Commands::Description(DescriptionArgs { description: None })),
            "2" => return Ok(Commands::Patient(PatientArgs { name: None })),
            "3" => return Ok(Commands::Reconcile(ReconcileArgs { bids_root: None })),
            _ => println!("Invalid choice. Please enter '1', '2', or '3'."),
        }
    }
}

fn prompt_line(message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_yes_no(question: &str) -> io::Result<bool> {
    loop {
        let answer = prompt_line(question)?.to_lowercase();
        match answer.as_str() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            _ => println!("Please enter 'y' or 'n'."),
        }
    }
}

/// Hidden password input: raw mode, no echo.
fn prompt_password(message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;

    enable_raw_mode()?;
    let mut password = String::new();
    let result = loop {
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Enter => break Ok(password.clone()),
                KeyCode::Backspace => {
                    password.pop();
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    break Err(io::Error::other("interrupted"));
                }
                KeyCode::Char(ch) => password.push(ch),
                _ => {}
            },
            _ => {}
        }
    };
    disable_raw_mode()?;
    println!();
    result
}
