use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use portrait_core::{DetectedFace, Gallery, QualityScorer};
use portrait_engine::{evaluate, Corpus, ModelBundle, Pipeline, Trainer};
use portrait_meta::{FeatureSchema, MetadataEncoder};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "portrait", about = "Portrait face identification and attribute correction CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train attribute models and bias tables from a labelled corpus
    Train {
        /// Corpus JSON file or directory of JSON files
        corpus: PathBuf,
        /// Where to write the bundle (default: PORTRAIT_BUNDLE_PATH)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Number of trees per forest
        #[arg(long, default_value_t = 100)]
        estimators: usize,
    },
    /// Evaluate the current bundle against a labelled corpus
    Evaluate {
        corpus: PathBuf,
    },
    /// Show corpus statistics
    Stats {
        corpus: PathBuf,
    },
    /// Print the feature vector for a metadata JSON file
    Encode {
        metadata: PathBuf,
    },
    /// Score the quality of detected faces in an image
    Score {
        image: PathBuf,
        /// Detector output: JSON array of faces
        #[arg(short, long)]
        faces: PathBuf,
    },
    /// Enroll the largest detected face under a name
    Enroll {
        #[arg(short, long)]
        name: String,
        image: PathBuf,
        #[arg(short, long)]
        faces: PathBuf,
        /// Capture metadata JSON
        #[arg(short, long)]
        metadata: Option<PathBuf>,
    },
    /// Identify detected faces and correct their attributes
    Recognize {
        image: PathBuf,
        #[arg(short, long)]
        faces: PathBuf,
        #[arg(short, long)]
        metadata: Option<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Train { corpus, out, estimators } => {
            let corpus = Corpus::load(&corpus).context("failed to load corpus")?;
            let mut trainer = Trainer::new(encoder(&config)?);
            trainer.forest.n_estimators = estimators;
            trainer.validation_split = config.validation_split;

            let outcome = trainer.run(&corpus).context("training failed")?;
            let out = out.unwrap_or_else(|| config.bundle_path.clone());
            outcome
                .bundle
                .save(&out)
                .with_context(|| format!("failed to save bundle to {}", out.display()))?;

            print_json(&serde_json::json!({
                "bundle": out,
                "training": outcome.training,
                "validation": outcome.validation,
            }))?;
        }
        Commands::Evaluate { corpus } => {
            let encoder = encoder(&config)?;
            let bundle = ModelBundle::load(&config.bundle_path, encoder.schema())
                .with_context(|| format!("failed to load bundle {}", config.bundle_path.display()))?;
            let corpus = Corpus::load(&corpus).context("failed to load corpus")?;
            print_json(&evaluate(&bundle, &corpus, &encoder))?;
        }
        Commands::Stats { corpus } => {
            let corpus = Corpus::load(&corpus).context("failed to load corpus")?;
            print_json(&corpus.stats())?;
        }
        Commands::Encode { metadata } => {
            let raw = read_json(&metadata)?;
            print_json(&encoder(&config)?.encode(&raw))?;
        }
        Commands::Score { image, faces } => {
            let img = image::open(&image)
                .with_context(|| format!("failed to open image {}", image.display()))?;
            let faces = read_faces(&faces)?;
            let scorer = QualityScorer::default();
            let scores: Vec<_> = faces
                .iter()
                .map(|f| scorer.score_image(&img, &f.bbox, f.landmarks()))
                .collect();
            print_json(&scores)?;
        }
        Commands::Enroll { name, image, faces, metadata } => {
            let pipeline = pipeline(&config)?;
            let img = image::open(&image)
                .with_context(|| format!("failed to open image {}", image.display()))?;
            let faces = read_faces(&faces)?;
            let metadata = metadata.as_deref().map(read_json).transpose()?;
            let mut gallery = load_gallery(&config.gallery_path)?;

            let source = image.file_name().map(|n| n.to_string_lossy().into_owned());
            let outcome = pipeline
                .enroll(&mut gallery, &name, &img, &faces, metadata.as_ref(), source.as_deref())
                .with_context(|| format!("failed to enroll {name}"))?;
            gallery
                .save(&config.gallery_path)
                .with_context(|| format!("failed to save gallery {}", config.gallery_path.display()))?;

            println!(
                "Enrolled {name} (face {}, quality {:.3}, {} embeddings)",
                outcome.face_index,
                outcome.quality.value,
                gallery.embedding_count(&name)
            );
        }
        Commands::Recognize { image, faces, metadata } => {
            let pipeline = pipeline(&config)?;
            let img = image::open(&image)
                .with_context(|| format!("failed to open image {}", image.display()))?;
            let faces = read_faces(&faces)?;
            let metadata = read_metadata(metadata.as_deref())?;
            let gallery = load_gallery(&config.gallery_path)?;
            print_json(&pipeline.recognize(&gallery, &img, &faces, &metadata))?;
        }
        Commands::List => {
            let gallery = load_gallery(&config.gallery_path)?;
            if gallery.is_empty() {
                println!("No identities enrolled");
            }
            for name in gallery.names() {
                println!(
                    "{name}\t{} embeddings\t{} snapshots",
                    gallery.embedding_count(name),
                    gallery.person_metadata(name).len()
                );
            }
        }
        Commands::Remove { name } => {
            let mut gallery = load_gallery(&config.gallery_path)?;
            if !gallery.remove(&name) {
                anyhow::bail!("no identity named {name}");
            }
            gallery
                .save(&config.gallery_path)
                .with_context(|| format!("failed to save gallery {}", config.gallery_path.display()))?;
            println!("Removed {name}");
        }
    }

    Ok(())
}

fn encoder(config: &Config) -> Result<MetadataEncoder> {
    let schema = match &config.schema_path {
        Some(path) => FeatureSchema::load(path)
            .with_context(|| format!("failed to load schema {}", path.display()))?,
        None => FeatureSchema::builtin().clone(),
    };
    Ok(MetadataEncoder::new(schema))
}

/// Build the pipeline; a missing bundle file means no models, a corrupt one is an error.
fn pipeline(config: &Config) -> Result<Pipeline> {
    let encoder = encoder(config)?;
    if !config.bundle_path.exists() {
        tracing::info!(path = %config.bundle_path.display(), "no model bundle, attributes pass through");
        return Ok(Pipeline::without_models(encoder, config.pipeline()));
    }
    let bundle = ModelBundle::load(&config.bundle_path, encoder.schema())
        .with_context(|| format!("failed to load bundle {}", config.bundle_path.display()))?;
    Ok(Pipeline::new(encoder, bundle, config.pipeline()))
}

fn load_gallery(path: &Path) -> Result<Gallery> {
    if !path.exists() {
        return Ok(Gallery::new());
    }
    Gallery::load(path).with_context(|| format!("failed to load gallery {}", path.display()))
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn read_metadata(path: Option<&Path>) -> Result<Value> {
    match path {
        Some(p) => read_json(p),
        None => Ok(Value::Object(Default::default())),
    }
}

fn read_faces(path: &Path) -> Result<Vec<DetectedFace>> {
    let value = read_json(path)?;
    serde_json::from_value(value).with_context(|| format!("invalid face list in {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
