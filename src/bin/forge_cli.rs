use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use resume_forge::{
    config,
    context::{ServiceContext, ServiceParts, ServiceSettings},
    logging,
    processing::{RetrievalQuery, RetrievalRequest},
    profile::{InMemoryProfileSource, Profile},
    refinement::RefinementRequest,
    store::Namespace,
};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "forge-cli",
    about = "Operate the resume pipeline without the HTTP server"
)]
struct Cli {
    /// JSON file mapping user ids to profile documents; replaces the profile service.
    #[arg(long, global = true)]
    profile_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild a namespace, or one section when --section is given.
    Index(IndexArgs),
    /// Search a user's live chunks.
    Retrieve(RetrieveArgs),
    /// Generate and refine a resume for a job description.
    Refine(RefineArgs),
}

#[derive(Args)]
struct IndexArgs {
    user_id: String,
    #[arg(long, default_value = "profile")]
    namespace: Namespace,
    /// Section to re-index from --text instead of the profile.
    #[arg(long, requires = "text")]
    section: Option<String>,
    #[arg(long)]
    text: Option<String>,
}

#[derive(Args)]
struct RetrieveArgs {
    user_id: String,
    query: String,
    #[arg(long, default_value = "profile")]
    namespace: Namespace,
    #[arg(long)]
    top_k: Option<usize>,
    /// Restrict to a section; repeatable.
    #[arg(long = "section")]
    sections: Vec<String>,
}

#[derive(Args)]
struct RefineArgs {
    user_id: String,
    /// Job description text.
    #[arg(long, conflicts_with = "job_file")]
    job: Option<String>,
    /// File holding the job description.
    #[arg(long)]
    job_file: Option<PathBuf>,
    #[arg(long)]
    target_score: Option<f64>,
    #[arg(long)]
    max_refinements: Option<u32>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::init_config().context("Failed to load configuration")?;

    let mut parts = ServiceParts::from_config(config)
        .await
        .context("Failed to initialize services")?;
    if let Some(path) = &cli.profile_file {
        parts.profiles = Arc::new(load_profiles(path)?);
    }
    let context = ServiceContext::from_parts(parts, ServiceSettings::from_config(config));

    match cli.command {
        Command::Index(args) => match (args.section, args.text) {
            (Some(section), Some(text)) => print_json(
                &context
                    .indexing
                    .reindex_section(&args.user_id, &section, &text)
                    .await?,
            ),
            (None, _) => print_json(
                &context
                    .indexing
                    .reindex_namespace(&args.user_id, args.namespace)
                    .await?,
            ),
            (Some(_), None) => bail!("--section requires --text"),
        },
        Command::Retrieve(args) => {
            let outcome = context
                .retriever
                .retrieve(RetrievalRequest {
                    user_id: args.user_id,
                    namespace: args.namespace,
                    query: RetrievalQuery::Text(args.query),
                    top_k: args.top_k,
                    section_ids: args.sections,
                })
                .await?;
            print_json(&outcome)
        }
        Command::Refine(args) => {
            let job_description = match (args.job, args.job_file) {
                (Some(text), _) => text,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("one of --job or --job-file is required"),
            };
            let outcome = context
                .refinement
                .run(RefinementRequest {
                    user_id: args.user_id,
                    job_description,
                    target_score: args.target_score,
                    max_refinements: args.max_refinements,
                    keep_partial_on_failure: true,
                })
                .await?;
            eprintln!("{} after {} attempt(s)", outcome.status, outcome.history.len());
            print_json(&outcome)
        }
    }
}

fn load_profiles(path: &Path) -> Result<InMemoryProfileSource> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile file {}", path.display()))?;
    let documents: HashMap<String, Profile> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid profile file {}", path.display()))?;
    let source = InMemoryProfileSource::new();
    for (user_id, profile) in documents {
        source.insert(user_id, profile);
    }
    Ok(source)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
