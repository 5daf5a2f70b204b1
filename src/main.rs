use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use graph_harness::build::BuildService;
use graph_harness::config;
use graph_harness::graph_store::Neo4jHttpStore;
use graph_harness::models::BuildRequest;
use graph_harness::server;
use graph_harness::staging;
use graph_harness::vector_store::QdrantHttpStore;

#[derive(Parser)]
#[command(name = "kg", about = "Knowledge-graph build pipeline", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, default_value = "config/kg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a build to completion and print the run summary.
    Build {
        /// Build mode: incremental or full.
        #[arg(long, default_value = "incremental")]
        mode: String,
        /// Restrict the run to one stage: parse, enrich, or populate.
        #[arg(long)]
        stage: Option<String>,
        /// Diff base for incremental file selection; defaults to the
        /// recorded last-build revision.
        #[arg(long)]
        base_commit: Option<String>,
    },
    /// Start the HTTP control endpoint.
    Serve,
    /// Wipe the staging area and the last-build revision marker.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            mode,
            stage,
            base_commit,
        } => {
            let service = build_service(config)?;
            let request = BuildRequest {
                mode,
                stage,
                base_commit,
                ..Default::default()
            };
            let summary = service.run_blocking(request).await?;

            for stage in &summary.stages {
                println!(
                    "{}: {} entities, {} relationships ({} ms)",
                    stage.stage, stage.entities, stage.relationships, stage.duration_ms
                );
            }
            match summary.error {
                Some(error) => bail!("build {} failed: {}", summary.id, error),
                None => println!("Build {} completed.", summary.id),
            }
        }
        Commands::Serve => {
            let service = build_service(config)?;
            server::serve(Arc::new(service)).await?;
        }
        Commands::Reset => {
            staging::reset(&config.staging.path)?;
            println!("Staging area reset.");
        }
    }

    Ok(())
}

fn build_service(config: config::Config) -> Result<BuildService> {
    let graph = Arc::new(Neo4jHttpStore::new(&config.graph)?);
    let vector = Arc::new(QdrantHttpStore::new(&config.vector)?);
    Ok(BuildService::new(config, graph, vector))
}
