use std::path::PathBuf;
use std::sync::Arc;

use crate::demo::{run_demo, DemoArgs};
use crate::infra::{open_store, BcryptCredentialVerifier};
use crate::server;
use clap::{Args, Parser, Subcommand};
use registrar::accounts::AccountService;
use registrar::catalog::{CatalogImporter, CatalogService};
use registrar::config::{AppConfig, DatabaseLocation};
use registrar::error::AppError;
use registrar::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "Registrar",
    about = "Run the academic registrar service and its maintenance tasks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Manage user accounts
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },
    /// Maintain catalog reference data
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    /// Walk through catalog setup, a student submission, and registrar approval in memory
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum AccountsCommand {
    /// Create the first administrator if none exists yet
    BootstrapAdmin(BootstrapAdminArgs),
}

#[derive(Subcommand, Debug)]
enum CatalogCommand {
    /// Load programs and subjects from CSV files
    Import(CatalogImportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the database file (`:memory:` for a throwaway store)
    #[arg(long)]
    pub(crate) database: Option<String>,
}

#[derive(Args, Debug)]
struct BootstrapAdminArgs {
    #[arg(long, default_value = "admin")]
    username: String,
    #[arg(long)]
    password: String,
    /// Override the database file
    #[arg(long)]
    database: Option<String>,
}

#[derive(Args, Debug)]
struct CatalogImportArgs {
    /// CSV with `code,name` columns
    #[arg(long)]
    programs: Option<PathBuf>,
    /// CSV with `code,title,units,program_code,year_level,semester,prerequisite_code`
    #[arg(long)]
    subjects: Option<PathBuf>,
    /// Administrator account used for the import
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    /// Override the database file
    #[arg(long)]
    database: Option<String>,
}

pub(crate) fn load_config(database: Option<&str>) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(database) = database {
        config.storage.database = DatabaseLocation::parse(database);
    }
    Ok(config)
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Accounts {
            command: AccountsCommand::BootstrapAdmin(args),
        } => bootstrap_admin(args),
        Command::Catalog {
            command: CatalogCommand::Import(args),
        } => import_catalog(args),
        Command::Demo(args) => run_demo(args),
    }
}

fn bootstrap_admin(args: BootstrapAdminArgs) -> Result<(), AppError> {
    let config = load_config(args.database.as_deref())?;
    telemetry::init(&config.telemetry)?;

    let store = Arc::new(open_store(&config.storage.database)?);
    let accounts = AccountService::new(store, Arc::new(BcryptCredentialVerifier::default()));

    match accounts.bootstrap_admin(&args.username, &args.password)? {
        Some(user) => println!("Created administrator '{}' (id {})", user.username, user.id),
        None => println!("An administrator already exists; nothing to do"),
    }
    Ok(())
}

fn import_catalog(args: CatalogImportArgs) -> Result<(), AppError> {
    let config = load_config(args.database.as_deref())?;
    telemetry::init(&config.telemetry)?;

    let store = Arc::new(open_store(&config.storage.database)?);
    let accounts = AccountService::new(
        store.clone(),
        Arc::new(BcryptCredentialVerifier::default()),
    );
    let admin = accounts.authenticate(&args.username, &args.password)?;
    let catalog = CatalogService::new(store);

    if let Some(path) = args.programs {
        let programs = CatalogImporter::programs_from_path(&catalog, Some(&admin), &path)?;
        println!("Imported {} programs from {}", programs.len(), path.display());
    }
    if let Some(path) = args.subjects {
        let subjects = CatalogImporter::subjects_from_path(&catalog, Some(&admin), &path)?;
        println!("Imported {} subjects from {}", subjects.len(), path.display());
    }
    Ok(())
}
