use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use aspectra::catalog::{Catalog, Species};
use aspectra::config::Settings;
use aspectra::construct::Session;
use aspectra::Result;

#[derive(Parser)]
#[command(name = "aspectra")]
#[command(about = "Aspectra catalog store", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./aspectra.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema if it is missing
    Init,
    /// List stored catalog ids
    List,
    /// Print a stored catalog and its hierarchies
    Show {
        id: Uuid,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a stored catalog
    Delete { id: Uuid },
    /// Drop every table
    Drop,
}

#[derive(Serialize)]
struct HierarchySummary {
    name: String,
    kind: String,
    version: i64,
}

#[derive(Serialize)]
struct CatalogSummary {
    id: Uuid,
    species: Species,
    upstream: Option<Uuid>,
    uri: Option<String>,
    version: i64,
    hierarchies: Vec<HierarchySummary>,
    aspect_defs: Vec<String>,
}

impl From<&Catalog> for CatalogSummary {
    fn from(catalog: &Catalog) -> Self {
        Self {
            id: catalog.id(),
            species: catalog.species(),
            upstream: catalog.upstream(),
            uri: catalog.uri().map(|u| u.to_string()),
            version: catalog.version(),
            hierarchies: catalog
                .hierarchies()
                .map(|h| HierarchySummary {
                    name: h.name().to_owned(),
                    kind: h.hierarchy_type().to_string(),
                    version: h.version(),
                })
                .collect(),
            aspect_defs: catalog.aspect_defs().map(|d| d.to_string()).collect(),
        }
    }
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let mut persistor = settings.open_persistor()?;
    match cli.command {
        Command::Init => {
            persistor.bootstrap()?;
            println!("schema ready");
        }
        Command::List => {
            for id in persistor.list_catalogs()? {
                println!("{}", id);
            }
        }
        Command::Show { id, json } => {
            let catalog = persistor.load_catalog(&Session::new(), id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&CatalogSummary::from(&catalog))?);
                return Ok(());
            }
            println!("{}", catalog);
            for hierarchy in catalog.hierarchies() {
                println!(
                    "  {} ({}, v{})",
                    hierarchy.name(),
                    hierarchy.hierarchy_type(),
                    hierarchy.version()
                );
            }
            for def in catalog.aspect_defs() {
                println!("  {}", def);
            }
        }
        Command::Delete { id } => {
            persistor.delete_catalog(id)?;
            println!("deleted {}", id);
        }
        Command::Drop => {
            persistor.drop_all()?;
            println!("dropped all tables");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();
    match run(cli, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
