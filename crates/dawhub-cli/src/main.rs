//! DAWHub CLI: manage projects and ingest files against the configured
//! metadata and storage backends.
//!
//! Configuration comes from the environment (see `Config::from_env`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use dawhub_cli::{error_report, print_json, upload_name};
use dawhub_core::models::{NewProject, ProjectUpdate, DEFAULT_PROJECT_VERSION};
use dawhub_core::Config;
use dawhub_services::{init_tracing, IngestRequest, IngestionCoordinator, PendingFile};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dawhub", about = "DAW project storage CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Create a project, optionally with its main file
    CreateProject {
        /// Owner UUID
        #[arg(long)]
        owner: Uuid,
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = DEFAULT_PROJECT_VERSION)]
        version: String,
        #[arg(long)]
        public: bool,
        /// DAW project file to attach as the main file
        #[arg(long)]
        main: Option<PathBuf>,
    },
    /// Show a project, or all projects of an owner
    Show {
        project: Option<Uuid>,
        #[arg(long, conflicts_with = "project")]
        owner: Option<Uuid>,
    },
    /// Update project metadata
    UpdateProject {
        project: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        public: Option<bool>,
    },
    /// Ingest files into a project; several samples are ingested as one batch
    Ingest {
        project: Uuid,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Ingest the file as the project's main file
        #[arg(long)]
        main: bool,
    },
    /// Download a stored file
    Fetch {
        path: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print a time-limited download URL
    Url { path: String },
    /// Remove one file from a project
    Remove { project: Uuid, file_id: Uuid },
    /// Delete a project and all of its files
    DeleteProject { project: Uuid },
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize tracing: {}", e);
    }

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("{}", error_report(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;

    if let Commands::Migrate = command {
        let pool = dawhub_db::connect(&config.database).await?;
        dawhub_db::run_migrations(&pool).await?;
        return print_json(&serde_json::json!({ "migrated": true }));
    }

    let coordinator = IngestionCoordinator::from_config(&config).await?;

    match command {
        Commands::Migrate => {}
        Commands::CreateProject {
            owner,
            name,
            description,
            version,
            public,
            main,
        } => {
            let mut project = NewProject::new(owner, name)
                .with_description(description)
                .public(public);
            project.version = version;

            match main {
                Some(path) => {
                    let filename = upload_name(&path)?;
                    let (file, size) = open(&path).await?;
                    let (project, _) = coordinator
                        .create_project_with_main_file(project, &filename, file, Some(size))
                        .await?;
                    print_json(&project)?;
                }
                None => print_json(&coordinator.create_project(project).await?)?,
            }
        }
        Commands::Show { project, owner } => match (project, owner) {
            (Some(id), _) => print_json(&coordinator.find_project(id).await?)?,
            (None, Some(owner)) => print_json(&coordinator.projects_of(owner).await?)?,
            (None, None) => anyhow::bail!("pass a project id or --owner"),
        },
        Commands::UpdateProject {
            project,
            name,
            description,
            version,
            public,
        } => {
            let update = ProjectUpdate {
                name,
                description,
                version,
                is_public: public,
            };
            print_json(&coordinator.update_project(project, update).await?)?;
        }
        Commands::Ingest {
            project,
            files,
            main,
        } => {
            if main {
                let [path] = files.as_slice() else {
                    anyhow::bail!("--main takes exactly one file");
                };
                let filename = upload_name(path)?;
                let (file, size) = open(path).await?;
                let request =
                    IngestRequest::main(project, filename, file).with_declared_size(size);
                print_json(&coordinator.ingest(request).await?)?;
            } else if let [path] = files.as_slice() {
                let filename = upload_name(path)?;
                let (file, size) = open(path).await?;
                let request =
                    IngestRequest::sample(project, filename, file).with_declared_size(size);
                print_json(&coordinator.ingest(request).await?)?;
            } else {
                let mut pending = Vec::with_capacity(files.len());
                for path in &files {
                    let filename = upload_name(path)?;
                    let (file, size) = open(path).await?;
                    pending.push(PendingFile::new(filename, file).with_declared_size(size));
                }
                print_json(&coordinator.ingest_samples(project, pending).await?)?;
            }
        }
        Commands::Fetch { path, out } => {
            let (mut stream, metadata) = coordinator.fetch(&path).await?;
            let mut file = tokio::fs::File::create(&out)
                .await
                .with_context(|| format!("Failed to create {}", out.display()))?;
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            print_json(&metadata)?;
        }
        Commands::Url { path } => {
            let url = coordinator.presigned_url(&path).await?;
            print_json(&serde_json::json!({ "url": url }))?;
        }
        Commands::Remove { project, file_id } => {
            coordinator.remove(project, file_id).await?;
            print_json(&serde_json::json!({ "removed": file_id }))?;
        }
        Commands::DeleteProject { project } => {
            coordinator.delete_project(project).await?;
            print_json(&serde_json::json!({ "deleted": project }))?;
        }
    }

    Ok(())
}

async fn open(path: &std::path::Path) -> anyhow::Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}
