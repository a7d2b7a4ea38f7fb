use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use genolab::config::ConfigLoader;
use genolab::domain::{NewTechnician, password_digest};
use genolab::error::LabError;
use genolab::output::JsonOutput;
use genolab::store::{RecordStore, SqliteStore};

#[derive(Parser)]
#[command(name = "genolab")]
#[command(about = "Clinical genomics lab backend: marker uploads matched against a disease catalog")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP server")]
    Serve,
    #[command(about = "Manage the disease catalog")]
    Catalog(CatalogArgs),
    #[command(about = "Inspect stored analyses")]
    Analyses(AnalysesArgs),
    #[command(about = "Manage lab technicians")]
    Technician(TechnicianArgs),
}

#[derive(Args)]
struct CatalogArgs {
    #[command(subcommand)]
    command: CatalogCommand,
}

#[derive(Subcommand)]
enum CatalogCommand {
    #[command(about = "Add a disease with its associated genes")]
    Add(DiseaseArgs),
    #[command(about = "List catalog entries")]
    List,
}

#[derive(Args)]
struct DiseaseArgs {
    #[arg(long)]
    name: String,

    #[arg(long, default_value = "")]
    description: String,

    /// Comma-separated gene symbols, e.g. "BRCA1, BRCA2".
    #[arg(long)]
    genes: String,
}

#[derive(Args)]
struct AnalysesArgs {
    #[command(subcommand)]
    command: AnalysesCommand,
}

#[derive(Subcommand)]
enum AnalysesCommand {
    #[command(about = "List stored analyses")]
    List,
}

#[derive(Args)]
struct TechnicianArgs {
    #[command(subcommand)]
    command: TechnicianCommand,
}

#[derive(Subcommand)]
enum TechnicianCommand {
    #[command(about = "Register a lab technician")]
    Add(NewTechnicianArgs),
}

#[derive(Args)]
struct NewTechnicianArgs {
    #[arg(long)]
    nombre: String,

    #[arg(long)]
    apellido: String,

    #[arg(long)]
    email: String,

    #[arg(long)]
    password: String,

    #[arg(long)]
    telefono: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(lab) = report.downcast_ref::<LabError>() {
            return ExitCode::from(map_exit_code(lab));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LabError) -> u8 {
    match error {
        LabError::ConfigRead(_) | LabError::ConfigParse(_) | LabError::ConfigEnv { .. } => 2,
        LabError::MissingField(_) | LabError::DuplicateEmail(_) => 2,
        LabError::Store(_) | LabError::Server(_) => 3,
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
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .into_diagnostic()?;
            runtime.block_on(genolab::http::serve(config))?;
            Ok(())
        }
        Commands::Catalog(args) => {
            let store = SqliteStore::open(&config.database)?;
            match args.command {
                CatalogCommand::Add(disease) => {
                    let genes = disease.genes.trim();
                    if genes.split(',').all(|gene| gene.trim().is_empty()) {
                        return Err(LabError::MissingField("genes").into());
                    }
                    let entry = store.add_disease(disease.name.trim(), &disease.description, genes)?;
                    info!(id = entry.id, name = %entry.name, "catalog entry added");
                    JsonOutput::print_disease(&entry).into_diagnostic()
                }
                CatalogCommand::List => {
                    JsonOutput::print_catalog(&store.list_disease_catalog()?).into_diagnostic()
                }
            }
        }
        Commands::Analyses(args) => {
            let store = SqliteStore::open(&config.database)?;
            match args.command {
                AnalysesCommand::List => {
                    JsonOutput::print_analyses(&store.list_analyses()?).into_diagnostic()
                }
            }
        }
        Commands::Technician(args) => {
            let store = SqliteStore::open(&config.database)?;
            match args.command {
                TechnicianCommand::Add(new) => {
                    let technician = store.create_lab_technician(NewTechnician {
                        password_hash: password_digest(&new.email, &new.password),
                        first_name: new.nombre,
                        last_name: new.apellido,
                        email: new.email.trim().to_string(),
                        phone: new.telefono,
                    })?;
                    info!(id = %technician.id, "lab technician registered");
                    JsonOutput::print_technician(&technician).into_diagnostic()
                }
            }
        }
    }
}
