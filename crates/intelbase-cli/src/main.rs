use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use intelbase_api::{PlatformApi, PlatformConfig};
use intelbase_core::NewIncident;
use serde_json::Value;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ib")]
#[command(about = "Intelligence platform operational store CLI")]
struct Cli {
    /// SQLite database file backing the platform store.
    #[arg(long, default_value = "./intelligence_platform.sqlite3")]
    db: PathBuf,

    /// Directory holding the CSV sources and the legacy credential file.
    #[arg(long, default_value = "./DATA")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full demo pipeline: schema, CSV loads, user migration,
    /// verification.
    Pipeline,
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Bulk-load one CSV source into one table.
    Load(LoadArgs),
    /// Migrate the legacy credential file into the users table.
    MigrateUsers(MigrateUsersArgs),
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Incident {
        #[command(subcommand)]
        command: IncidentCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Create the platform tables if missing.
    EnsureSchema,
    /// Report per-table row counts and the stored accounts.
    Counts,
}

#[derive(Debug, Args)]
struct LoadArgs {
    #[arg(long)]
    source: PathBuf,
    #[arg(long)]
    table: String,
}

#[derive(Debug, Args)]
struct MigrateUsersArgs {
    /// Credential file; defaults to users.txt inside the data directory.
    #[arg(long)]
    source: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Register(RegisterArgs),
    Login(LoginArgs),
    List,
}

#[derive(Debug, Args)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    role: Option<String>,
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
}

#[derive(Debug, Subcommand)]
enum IncidentCommand {
    Add(AddIncidentArgs),
    SetStatus(SetStatusArgs),
    Delete(DeleteArgs),
    List,
    Stats {
        #[command(subcommand)]
        command: StatsCommand,
    },
}

#[derive(Debug, Args)]
struct AddIncidentArgs {
    #[arg(long)]
    date: String,
    #[arg(long)]
    incident_type: String,
    #[arg(long)]
    severity: String,
    #[arg(long, default_value = "open")]
    status: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    reported_by: Option<String>,
}

#[derive(Debug, Args)]
struct SetStatusArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    status: String,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Subcommand)]
enum StatsCommand {
    /// Incident counts grouped by type, descending by count.
    ByType,
    /// High severity incident counts grouped by status.
    HighSeverity,
    /// Incident types with strictly more than the threshold.
    Frequent(FrequentArgs),
}

#[derive(Debug, Args)]
struct FrequentArgs {
    #[arg(long, default_value_t = 5)]
    threshold: i64,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&with_contract_version(value))?
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = PlatformApi::new(PlatformConfig::from_data_dir(&cli.db, &cli.data_dir));

    match cli.command {
        Command::Pipeline => run_pipeline(&api),
        Command::Db { command } => run_db(command, &api),
        Command::Load(args) => run_load(&args, &api),
        Command::MigrateUsers(args) => run_migrate_users(args, &api),
        Command::User { command } => run_user(command, &api),
        Command::Incident { command } => run_incident(command, &api),
    }
}

fn run_pipeline(api: &PlatformApi) -> Result<()> {
    let report = api.run_pipeline()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize pipeline report")?)
}

fn run_db(command: DbCommand, api: &PlatformApi) -> Result<()> {
    match command {
        DbCommand::EnsureSchema => {
            api.ensure_schema()?;
            emit_json(serde_json::json!({ "status": "ok" }))
        }
        DbCommand::Counts => {
            let report = api.verify()?;
            emit_json(
                serde_json::to_value(&report).context("failed to serialize count report")?,
            )
        }
    }
}

fn run_load(args: &LoadArgs, api: &PlatformApi) -> Result<()> {
    let report = api.load_table(&args.source, &args.table)?;
    emit_json(serde_json::to_value(&report).context("failed to serialize load report")?)
}

fn run_migrate_users(args: MigrateUsersArgs, api: &PlatformApi) -> Result<()> {
    let source = args
        .source
        .unwrap_or_else(|| api.config().legacy_users_file.clone());
    let report = api.migrate_users(&source)?;
    emit_json(serde_json::to_value(&report).context("failed to serialize migration report")?)
}

fn run_user(command: UserCommand, api: &PlatformApi) -> Result<()> {
    match command {
        UserCommand::Register(args) => {
            let outcome = api.register(&args.username, &args.password, args.role.as_deref())?;
            emit_json(serde_json::to_value(&outcome).context("failed to serialize outcome")?)
        }
        UserCommand::Login(args) => {
            let outcome = api.login(&args.username, &args.password)?;
            emit_json(serde_json::to_value(&outcome).context("failed to serialize outcome")?)
        }
        UserCommand::List => emit_json(serde_json::json!({ "users": api.list_users()? })),
    }
}

fn run_incident(command: IncidentCommand, api: &PlatformApi) -> Result<()> {
    match command {
        IncidentCommand::Add(args) => {
            let incident = NewIncident {
                date: args.date,
                incident_type: args.incident_type,
                severity: args.severity,
                status: args.status,
                description: args.description,
                reported_by: args.reported_by,
            };
            let id = api.insert_incident(&incident)?;
            emit_json(serde_json::json!({ "id": id }))
        }
        IncidentCommand::SetStatus(args) => {
            let affected = api.update_incident_status(args.id, &args.status)?;
            emit_json(serde_json::json!({ "id": args.id, "affected": affected }))
        }
        IncidentCommand::Delete(args) => {
            let affected = api.delete_incident(args.id)?;
            emit_json(serde_json::json!({ "id": args.id, "affected": affected }))
        }
        IncidentCommand::List => {
            emit_json(serde_json::json!({ "incidents": api.list_incidents()? }))
        }
        IncidentCommand::Stats { command } => run_stats(command, api),
    }
}

fn run_stats(command: StatsCommand, api: &PlatformApi) -> Result<()> {
    match command {
        StatsCommand::ByType => {
            emit_json(serde_json::json!({ "counts": api.incident_counts_by_type()? }))
        }
        StatsCommand::HighSeverity => {
            emit_json(serde_json::json!({ "counts": api.high_severity_counts_by_status()? }))
        }
        StatsCommand::Frequent(args) => emit_json(serde_json::json!({
            "threshold": args.threshold,
            "counts": api.incident_types_above(args.threshold)?,
        })),
    }
}
