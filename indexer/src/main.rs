use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use similarity_core::builder::{ModelBuilder, TextDirSink};
use similarity_core::cache::AnalysisCache;
use similarity_core::config::Settings;
use similarity_core::persist::{load_model, save_all, ModelPaths};
use similarity_core::repository::{Model, SearchRequest};
use similarity_core::source::{discover, select_training};
use similarity_core::validation::validate;
use tracing_subscriber::{fmt, EnvFilter};

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, validate and query TF-IDF similarity models", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./similarity.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a model from staged JSON/JSONL documents
    Build {
        /// Staged document file or directory
        #[arg(long)]
        input: PathBuf,
        /// Output model directory
        #[arg(long)]
        output: PathBuf,
        /// Fraction of the staged documents used for training
        #[arg(long)]
        train_fraction: Option<f64>,
        /// Reduced dimensionality (0 keeps sparse vectors)
        #[arg(long)]
        n_components: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        /// Reuse token sequences from a previous build's analysis cache
        #[arg(long, default_value_t = false)]
        reuse_analysis: bool,
        /// Write each document's cleaned text to <output>/texts
        #[arg(long, default_value_t = false)]
        write_texts: bool,
        /// Documents to validate against the freshly built model
        #[arg(long)]
        validation_input: Option<PathBuf>,
    },
    /// Check that documents retrieve themselves from a built model
    Validate {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 3)]
        k: usize,
    },
    /// Run a single query against a built model
    Query {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        text: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        k: Option<usize>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Build { input, output, train_fraction, n_components, workers, reuse_analysis, write_texts, validation_input } => {
            if let Some(f) = train_fraction { settings.model.train_fraction = f; }
            if let Some(n) = n_components { settings.model.n_components = n; }
            if let Some(w) = workers { settings.model.workers = w; }
            settings.validate()?;
            let model = build_model(&settings, &input, &output, reuse_analysis, write_texts)?;
            if let Some(dir) = validation_input {
                let report = validate(&model, &discover(&dir)?, 3)?;
                println!("{}/{} validation documents found themselves in the top 3", report.ok, report.total);
            }
            Ok(())
        }
        Commands::Validate { model, input, k } => {
            let model = load_model(&ModelPaths::new(&model)).context("loading model")?;
            let docs = discover(&input)?;
            let report = validate(&model, &docs, k)?;
            println!("{}/{} documents found themselves in the top {k}", report.ok, report.total);
            Ok(())
        }
        Commands::Query { model, text, description, k } => {
            let model = load_model(&ModelPaths::new(&model)).context("loading model")?;
            let mut request = SearchRequest::new(text);
            request.description = description;
            request.k = k;
            let hits = model.search(&request, &settings.search)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
    }
}

fn build_model(settings: &Settings, input: &Path, output: &Path, reuse_analysis: bool, write_texts: bool) -> Result<Model> {
    let paths = ModelPaths::new(output);
    let staged = discover(input)?;
    if staged.is_empty() {
        bail!("no staged documents under {}", input.display());
    }
    let (training, unused) = select_training(staged, settings.model.train_fraction, settings.model.seed);
    tracing::info!(training = training.len(), unused = unused.len(), "training set selected");

    let mut cache = if reuse_analysis { AnalysisCache::load(&paths.analysis_cache())? } else { AnalysisCache::new() };
    let mut builder = ModelBuilder::new(settings.model.clone());
    if write_texts {
        builder = builder.with_artifact_sink(Arc::new(TextDirSink::create(paths.texts_dir())?));
    }
    let out = builder.build(&training, &mut cache)?;
    cache.save_if_changed(&paths.analysis_cache())?;
    let meta = save_all(&paths, &out.model)?;
    tracing::info!(
        documents = meta.num_docs,
        terms = meta.num_terms,
        skipped = out.report.skipped,
        explained_variance = ?out.report.explained_variance,
        output = %output.display(),
        "model build complete"
    );
    Ok(out.model)
}
