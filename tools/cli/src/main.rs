//! Inkpad CLI - Command line interface for the local note store.
//!
//! This tool manages the schema, edits notes, and syncs a store with a
//! shared folder.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use inkpad_app::{build_store, default_config_path, migration_manager, AppConfig, Inkpad};
use inkpad_common::{Record, RecordId};
use inkpad_storage::{create_default_registry, LocalStore, RecordStore};
use inkpad_sync::{Resolution, StoreRemote, SyncConflict, SyncReport};

#[derive(Parser)]
#[command(name = "inkpad")]
#[command(about = "Inkpad - Local-first note store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: platform data dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use a local store in this directory instead of the configured one.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },

    /// Inspect or change the schema version.
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Create a note.
    New {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        body: String,

        /// Tag to attach; repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List notes.
    List,

    /// Show one note.
    Show {
        id: String,
    },

    /// Edit a note.
    Edit {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        body: Option<String>,

        /// Replace the tags; repeatable.
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,
    },

    /// Delete a note.
    Delete {
        id: String,
    },

    /// Sync with a shared folder.
    Sync {
        /// Folder shared between devices.
        #[arg(short, long)]
        folder: PathBuf,

        /// Resolve new conflicts automatically: "local" or "remote".
        #[arg(long)]
        prefer: Option<String>,
    },

    /// List unresolved conflicts.
    Conflicts,

    /// Resolve a conflict and publish the result.
    Resolve {
        id: String,

        /// Side to keep: "local" or "remote".
        #[arg(short, long)]
        keep: String,

        /// Folder to publish a local win to.
        #[arg(short, long)]
        folder: PathBuf,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply pending migrations.
    Run,
    /// Show applied and pending migrations.
    Status,
    /// Roll back one migration.
    Rollback { version: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    if let Commands::Init { force } = cli.command {
        return cmd_init(&config_path, cli.data_dir.as_deref(), force);
    }

    let config = load_config(&config_path, cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::Migrate { action } => match action {
            MigrateAction::Run => cmd_migrate(config).await,
            MigrateAction::Status => cmd_migrate_status(&config).await,
            MigrateAction::Rollback { version } => cmd_rollback(&config, version).await,
        },

        Commands::New { title, body, tags } => cmd_new(config, &title, &body, &tags).await,

        Commands::List => cmd_list(config).await,

        Commands::Show { id } => cmd_show(config, &id).await,

        Commands::Edit {
            id,
            title,
            body,
            tags,
        } => cmd_edit(config, &id, title, body, tags).await,

        Commands::Delete { id } => cmd_delete(config, &id).await,

        Commands::Sync { folder, prefer } => cmd_sync(config, &folder, prefer.as_deref()).await,

        Commands::Conflicts => cmd_conflicts(config).await,

        Commands::Resolve { id, keep, folder } => cmd_resolve(config, &id, &keep, &folder).await,
    }
}

fn load_config(path: &Path, data_dir: Option<&Path>) -> Result<AppConfig> {
    let mut config = AppConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(dir) = data_dir {
        config.storage = AppConfig::local(dir).storage;
    }
    // Each invocation is its own session; keep conflicts between them.
    config.sync.queue_conflicts = true;
    Ok(config)
}

async fn open(config: AppConfig) -> Result<Inkpad> {
    Inkpad::open(config).await.context("Failed to open store")
}

fn parse_id(id: &str) -> Result<RecordId> {
    RecordId::new(id).context("Invalid note id")
}

fn parse_resolution(side: &str) -> Result<Resolution> {
    side.parse::<Resolution>().context("Invalid side")
}

fn shared_folder(folder: &Path) -> Result<Arc<StoreRemote>> {
    let store = LocalStore::new(folder)
        .with_context(|| format!("Failed to open shared folder {}", folder.display()))?;
    Ok(Arc::new(StoreRemote::new(RecordStore::new(Arc::new(store)))))
}

/// Write a default config file.
fn cmd_init(path: &Path, data_dir: Option<&Path>, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    let config = match data_dir {
        Some(dir) => AppConfig::local(dir),
        None => AppConfig::default(),
    };
    config
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Config written to {}", path.display());
    Ok(())
}

/// Apply pending migrations.
async fn cmd_migrate(config: AppConfig) -> Result<()> {
    let app = open(config).await?;
    let status = app.migrations()?.status().await?;
    println!("Schema at version {}", status.current_version);
    Ok(())
}

/// Show migration status without applying anything.
async fn cmd_migrate_status(config: &AppConfig) -> Result<()> {
    let store = build_store(&config.storage, &create_default_registry()?)?;
    let status = migration_manager(store)?.status().await?;

    println!("Current version: {}", status.current_version);
    println!("Applied: {:?}", status.applied_versions);
    match status.last_migrated_at {
        Some(at) => println!("Last migrated: {}", at.to_rfc3339()),
        None => println!("Last migrated: never"),
    }
    if status.pending.is_empty() {
        println!("No pending migrations.");
    } else {
        println!("Pending:");
        for migration in status.pending {
            println!(
                "  {:>3}  {}  {}",
                migration.version, migration.name, migration.description
            );
        }
    }
    Ok(())
}

/// Roll back one migration.
async fn cmd_rollback(config: &AppConfig, version: u32) -> Result<()> {
    let store = build_store(&config.storage, &create_default_registry()?)?;
    let mut manager = migration_manager(store)?;
    manager
        .rollback(version)
        .await
        .with_context(|| format!("Failed to roll back migration {}", version))?;

    let status = manager.status().await?;
    println!(
        "Rolled back {}; schema now at version {}",
        version, status.current_version
    );
    Ok(())
}

/// Create a note.
async fn cmd_new(config: AppConfig, title: &str, body: &str, tags: &[String]) -> Result<()> {
    let app = open(config).await?;
    let record = Record::new(title, body).with_tags(tags);
    app.records()
        .save_record(&record)
        .await
        .context("Failed to save note")?;

    info!("Created note {}", record.id());
    println!("{}", record.id());
    Ok(())
}

/// List notes.
async fn cmd_list(config: AppConfig) -> Result<()> {
    let app = open(config).await?;
    let records = app.records().list_records().await?;

    if records.is_empty() {
        println!("No notes.");
        return Ok(());
    }
    for record in records {
        let tags = if record.tags().is_empty() {
            String::new()
        } else {
            format!(" [{}]", record.tags().join(", "))
        };
        println!("{}  {}{}", record.id(), record.title(), tags);
    }
    Ok(())
}

/// Show one note as JSON.
async fn cmd_show(config: AppConfig, id: &str) -> Result<()> {
    let app = open(config).await?;
    let record = app.records().require_record(&parse_id(id)?).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Edit a note.
async fn cmd_edit(
    config: AppConfig,
    id: &str,
    title: Option<String>,
    body: Option<String>,
    tags: Option<Vec<String>>,
) -> Result<()> {
    let app = open(config).await?;
    let record = edit_note(&app, &parse_id(id)?, title, body, tags).await?;
    println!("Updated {}", record.id());
    Ok(())
}

async fn edit_note(
    app: &Inkpad,
    id: &RecordId,
    title: Option<String>,
    body: Option<String>,
    tags: Option<Vec<String>>,
) -> Result<Record> {
    ensure_not_conflicted(app, id).await?;
    let mut record = app.records().require_record(id).await?;

    if let Some(title) = title {
        record.set_title(title);
    }
    if let Some(body) = body {
        record.set_body(body);
    }
    if let Some(tags) = tags {
        record.set_tags(tags);
    }
    app.records()
        .save_record(&record)
        .await
        .context("Failed to save note")?;
    Ok(record)
}

/// Delete a note.
async fn cmd_delete(config: AppConfig, id: &str) -> Result<()> {
    let app = open(config).await?;
    let id = parse_id(id)?;
    ensure_not_conflicted(&app, &id).await?;
    app.records().delete_record(&id).await?;
    println!("Deleted {}", id);
    Ok(())
}

/// Local changes to a conflicted note would be dropped by `resolve`.
async fn ensure_not_conflicted(app: &Inkpad, id: &RecordId) -> Result<()> {
    if app.engine().has_conflict(id).await {
        anyhow::bail!(
            "Note {} has an unresolved sync conflict; run `inkpad resolve` first",
            id
        );
    }
    Ok(())
}

/// Sync with a shared folder.
async fn cmd_sync(config: AppConfig, folder: &Path, prefer: Option<&str>) -> Result<()> {
    let app = open(config).await?;
    let session = app.session(shared_folder(folder)?);

    let report = match prefer {
        Some(side) => {
            let side = parse_resolution(side)?;
            let resolver = move |_: &SyncConflict| side;
            session.run_with(&resolver).await
        }
        None => session.run().await,
    }
    .context("Sync failed")?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("Sync finished in {:?}", report.duration);
    println!("  adopted:    {}", report.adopted);
    println!("  pulled:     {}", report.pulled);
    println!("  pushed:     {}", report.pushed);
    println!("  equivalent: {}", report.equivalent);
    if report.resolved > 0 {
        println!("  resolved:   {}", report.resolved);
    }
    if report.deleted_locally > 0 {
        println!("  skipped:    {} (deleted here)", report.deleted_locally);
    }
    for id in &report.conflicts {
        println!("  conflict:   {}", id);
    }
    for (id, error) in &report.failed {
        println!("  failed:     {} ({})", id, error);
    }
}

/// List unresolved conflicts.
async fn cmd_conflicts(config: AppConfig) -> Result<()> {
    let app = open(config).await?;
    let conflicts = app.engine().pending_conflicts().await;

    if conflicts.is_empty() {
        println!("No conflicts.");
        return Ok(());
    }
    for conflict in conflicts {
        println!("{}  detected {}", conflict.id(), conflict.detected_at.to_rfc3339());
        println!(
            "  local:  {} ({})",
            conflict.local_record.title(),
            conflict.local_record.updated_at().to_rfc3339()
        );
        println!(
            "  remote: {} ({})",
            conflict.remote_record.title(),
            conflict.remote_record.updated_at().to_rfc3339()
        );
    }
    Ok(())
}

/// Resolve a conflict and publish the result.
async fn cmd_resolve(config: AppConfig, id: &str, keep: &str, folder: &Path) -> Result<()> {
    let resolution = parse_resolution(keep)?;
    let app = open(config).await?;
    let id = parse_id(id)?;

    let resolved = app
        .engine()
        .resolve(&id, resolution)
        .await
        .context("Failed to resolve conflict")?;
    app.session(shared_folder(folder)?)
        .push_resolution(&resolved)
        .await
        .context("Failed to publish resolution")?;

    println!("Resolved {} keeping {}", id, keep);
    Ok(())
}
