use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use dojo_portal_api::{PortalApi, RosterEntry};
use dojo_portal_client::{CommandOcr, HttpRemote, OfflineRemote, Portal, PortalRemote};
use dojo_portal_core::{
    AttendancePenalty, BlobStore, CertificateFile, NoTextRecognition, ReadinessEntry, Stripe, Stripes,
    TextRecognizer,
};
use dojo_portal_store_sqlite::SqliteStore;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "dojo")]
#[command(about = "Student portal and studio admin CLI")]
struct Cli {
    /// Student-side state: session, ledger, certificates, readiness.
    #[arg(long, env = "DOJO_PORTAL_LOCAL_DB", default_value = "./dojo_portal_local.sqlite3")]
    local_db: PathBuf,

    /// Studio API base URL. Without it the portal runs offline.
    #[arg(long, env = "DOJO_PORTAL_API")]
    api: Option<String>,

    /// Program that prints the text found in an image given its path.
    #[arg(long, env = "DOJO_PORTAL_OCR_COMMAND")]
    ocr_command: Option<PathBuf>,

    /// Roster export used to check credentials when running offline.
    #[arg(long, env = "DOJO_PORTAL_ROSTER")]
    roster: Option<PathBuf>,

    /// Studio database used by the admin and db commands.
    #[arg(long, env = "DOJO_PORTAL_DB", default_value = "./dojo_portal.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Login(LoginArgs),
    Logout,
    Status,
    Sync,
    Upload(UploadArgs),
    Download(DownloadArgs),
    Readiness {
        #[command(subcommand)]
        command: ReadinessCommand,
    },
    TestRequest(TestRequestArgs),
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[arg(long)]
    student_id: String,
    #[arg(long)]
    birth_date: String,
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// Belt slug, e.g. `high-yellow`.
    #[arg(long)]
    belt: String,
    #[arg(long)]
    file: PathBuf,
    /// Overrides the MIME type inferred from the file extension.
    #[arg(long)]
    mime: Option<String>,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    #[arg(long)]
    belt: String,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum ReadinessCommand {
    Show(ReadinessShowArgs),
    Set(ReadinessSetArgs),
}

#[derive(Debug, Args)]
struct ReadinessShowArgs {
    /// Target belt slug. Defaults to the unlocked belt.
    #[arg(long)]
    belt: Option<String>,
    /// Attendance veto reported by the kiosk.
    #[arg(long)]
    penalty: Option<String>,
}

#[derive(Debug, Args)]
struct ReadinessSetArgs {
    #[arg(long)]
    belt: String,
    #[arg(long, default_value_t = 0)]
    offered: u32,
    #[arg(long, default_value_t = 0)]
    attended: u32,
    /// Earned stripe; repeat for each one.
    #[arg(long = "stripe", value_parser = parse_stripe)]
    stripes: Vec<Stripe>,
}

#[derive(Debug, Args)]
struct TestRequestArgs {
    /// Preferred test date, YYYY-MM-DD.
    #[arg(long)]
    date: String,
    #[arg(long)]
    message: Option<String>,
    #[arg(long)]
    penalty: Option<String>,
}

#[derive(Debug, Subcommand)]
enum AdminCommand {
    RosterImport(RosterImportArgs),
    Activity(ActivityArgs),
}

#[derive(Debug, Args)]
struct RosterImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct ActivityArgs {
    #[arg(long)]
    limit: Option<i64>,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

fn parse_stripe(value: &str) -> Result<Stripe, String> {
    Stripe::parse(value)
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert("contract_version".to_string(), Value::String(CLI_CONTRACT_VERSION.to_string()));
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn read_roster(path: &Path) -> Result<Vec<RosterEntry>> {
    let body = fs::read_to_string(path).with_context(|| format!("failed to read roster {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("roster {} is not a JSON array of students", path.display()))
}

fn open_portal(cli: &Cli) -> Result<Portal> {
    let store = SqliteStore::open_migrated(&cli.local_db)?;
    let blobs: Box<dyn BlobStore> = Box::new(SqliteStore::open_migrated(&cli.local_db)?);
    let recognizer: Box<dyn TextRecognizer> = match &cli.ocr_command {
        Some(program) => Box::new(CommandOcr::new(program.clone())),
        None => Box::new(NoTextRecognition),
    };
    let remote: Box<dyn PortalRemote> = match (&cli.api, &cli.roster) {
        (Some(api), _) => Box::new(HttpRemote::new(api)),
        (None, Some(roster)) => Box::new(OfflineRemote::with_roster(read_roster(roster)?)),
        (None, None) => Box::new(OfflineRemote::new()),
    };
    tracing::debug!(local_db = %cli.local_db.display(), online = remote.is_available(), "portal opened");
    Ok(Portal::open(Box::new(store), Some(blobs), recognizer, remote)?)
}

/// Open the portal and resume the persisted session, failing when there is none.
fn signed_in_portal(cli: &Cli) -> Result<Portal> {
    let mut portal = open_portal(cli)?;
    if portal.restore_session()?.is_none() {
        return Err(anyhow!("Please sign in first."));
    }
    Ok(portal)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Login(args) => run_login(&cli, args),
        Command::Logout => run_logout(&cli),
        Command::Status => run_status(&cli),
        Command::Sync => run_sync(&cli),
        Command::Upload(args) => run_upload(&cli, args),
        Command::Download(args) => run_download(&cli, args),
        Command::Readiness { command } => run_readiness(&cli, command),
        Command::TestRequest(args) => run_test_request(&cli, args),
        Command::Admin { command } => run_admin(&cli.db, command),
        Command::Db { command } => run_db(&cli.db, command),
    }
}

fn run_login(cli: &Cli, args: &LoginArgs) -> Result<()> {
    let mut portal = open_portal(cli)?;
    let outcome = portal.login(&args.student_id, &args.birth_date)?;
    emit_json(serde_json::json!({
        "login": outcome,
        "view": portal.view()
    }))
}

fn run_logout(cli: &Cli) -> Result<()> {
    let mut portal = open_portal(cli)?;
    let status = portal.logout()?;
    emit_json(serde_json::json!({ "status": status }))
}

fn run_status(cli: &Cli) -> Result<()> {
    let portal = signed_in_portal(cli)?;
    emit_json(serde_json::json!({ "view": portal.view() }))
}

fn run_sync(cli: &Cli) -> Result<()> {
    let mut portal = signed_in_portal(cli)?;
    let status = portal.sync_progress(false)?;
    emit_json(serde_json::json!({
        "status": status,
        "view": portal.view()
    }))
}

fn run_upload(cli: &Cli, args: &UploadArgs) -> Result<()> {
    let bytes = fs::read(&args.file).with_context(|| format!("failed to read {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("certificate path has no file name: {}", args.file.display()))?;
    let file = CertificateFile::new(file_name, args.mime.as_deref(), bytes);

    let mut portal = signed_in_portal(cli)?;
    let outcome = portal.upload_certificate(&args.belt, &file)?;
    emit_json(serde_json::json!({
        "upload": outcome,
        "view": portal.view()
    }))
}

fn run_download(cli: &Cli, args: &DownloadArgs) -> Result<()> {
    let portal = signed_in_portal(cli)?;
    let (file_name, bytes) = portal.download_certificate(&args.belt)?;
    fs::write(&args.out, &bytes).with_context(|| format!("failed to write {}", args.out.display()))?;
    emit_json(serde_json::json!({
        "belt_slug": args.belt,
        "file_name": file_name,
        "out": args.out,
        "bytes": bytes.len()
    }))
}

fn run_readiness(cli: &Cli, command: &ReadinessCommand) -> Result<()> {
    let mut portal = signed_in_portal(cli)?;
    match command {
        ReadinessCommand::Show(args) => {
            portal.set_attendance_penalty(args.penalty.clone().map(|message| AttendancePenalty { message }))?;
            let report = portal.readiness(args.belt.as_deref())?;
            emit_json(serde_json::to_value(&report).context("failed to serialize readiness report")?)
        }
        ReadinessCommand::Set(args) => {
            let mut stripes = Stripes::default();
            for stripe in &args.stripes {
                stripes.set(*stripe, true);
            }
            let entry = ReadinessEntry {
                classes_offered: args.offered,
                classes_attended: args.attended,
                stripes,
                updated_at: None,
            };
            let report = portal.save_readiness(&args.belt, entry)?;
            emit_json(serde_json::to_value(&report).context("failed to serialize readiness report")?)
        }
    }
}

fn run_test_request(cli: &Cli, args: &TestRequestArgs) -> Result<()> {
    let mut portal = signed_in_portal(cli)?;
    portal.set_attendance_penalty(args.penalty.clone().map(|message| AttendancePenalty { message }))?;
    let mut application = portal.open_test_form()?;
    application.preferred_test_date = args.date.clone();
    application.message = args.message.clone();
    let status = portal.submit_test_request(&application)?;
    emit_json(serde_json::json!({
        "application": application,
        "status": status,
        "test_request": portal.test_request_state()
    }))
}

fn run_admin(db: &Path, command: &AdminCommand) -> Result<()> {
    let api = PortalApi::new(db.to_path_buf());
    match command {
        AdminCommand::RosterImport(args) => {
            let roster = read_roster(&args.input)?;
            let summary = api.import_roster(&roster)?;
            emit_json(serde_json::to_value(&summary).context("failed to serialize import summary")?)
        }
        AdminCommand::Activity(args) => {
            let activity = api.admin_activity(&[], args.limit)?;
            emit_json(serde_json::to_value(&activity).context("failed to serialize admin activity")?)
        }
    }
}

fn run_db(db: &Path, command: &DbCommand) -> Result<()> {
    let mut store = SqliteStore::open(db)?;
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = PortalApi::new(db.to_path_buf()).migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::Backup(args) => {
            store.migrate()?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::Restore(args) => {
            store.restore_database(&args.input)?;
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "restored_from": args.input,
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}
