use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chart_pipeline::{Class, Config, Conversion, Dataset, ModelBundle, Store, Transform, WorkerPool};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "chart-pipeline")]
#[command(about = "Labeled chart image store and dataset builder")]
#[command(version)]
struct Args {
    /// Data root holding the store and datasets
    #[arg(short, long, env = "CHART_PIPELINE_ROOT")]
    root: Option<PathBuf>,

    /// Worker threads for per-image work
    #[arg(short, long, env = "CHART_PIPELINE_WORKERS")]
    workers: Option<usize>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store layout (safe to repeat)
    Init,

    /// Import images from paths or URLs
    Import {
        /// Image paths, or URLs with --urls
        sources: Vec<String>,

        /// Import every image found under this folder
        #[arg(long, conflicts_with = "urls")]
        dir: Option<PathBuf>,

        /// Label given to every imported image
        #[arg(short, long, default_value_t = Class::DEFAULT)]
        label: Class,

        /// Treat sources as URLs
        #[arg(long)]
        urls: bool,

        /// Import into a new independent dataset instead of the store, applying these conversions
        #[arg(long, value_name = "CONVERSION", num_args = 0.., conflicts_with = "dir")]
        into_dataset: Option<Vec<Conversion>>,
    },

    /// Apply conversions to stored images in place
    Convert {
        /// Stored file names (all images when empty)
        files: Vec<String>,

        /// Conversions to apply, e.g. PNG, Grayscale, "Size Scaled"
        #[arg(short, long = "conversion", required = true)]
        conversions: Vec<Conversion>,
    },

    /// Derive a new dataset from stored images
    Derive {
        /// Stored file names (all images when empty)
        files: Vec<String>,

        #[arg(short, long = "conversion")]
        conversions: Vec<Conversion>,
    },

    /// Build the X and Y arrays of a dataset
    Build {
        id: u32,

        /// Transforms to apply, e.g. "Scale Pixels", Flatten
        #[arg(short, long = "transform")]
        transforms: Vec<Transform>,

        /// Bundle labels into graph / not-graph
        #[arg(long)]
        bundled: bool,
    },

    /// Print the process manifest of a dataset
    Process { id: u32 },

    /// Wrap a JSON model file with a dataset's process manifest
    Export {
        id: u32,
        /// JSON file holding the trained model
        model: PathBuf,
        /// Where to write the bundle
        output: PathBuf,
    },

    /// Show the store size and existing datasets
    List,

    /// Delete a dataset
    Delete { id: u32 },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chart_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::resolve(args.config.as_deref(), args.root, args.workers)?;
    info!("Data root: {}, {} workers", config.data_root.display(), config.pool_size);

    let pool = WorkerPool::new(config.pool_size)?;
    // Only init may create a store; everything else needs an existing one
    let mut store = if matches!(args.command, Command::Init) {
        Store::init(&config.data_root, pool)
    } else {
        Store::open(&config.data_root, pool)
    }
    .with_context(|| format!("opening store at {}", config.data_root.display()))?;

    match args.command {
        Command::Init => {}

        Command::Import {
            sources,
            dir,
            label,
            urls,
            into_dataset,
        } => match (dir, into_dataset) {
            (Some(dir), _) => {
                let records = store.import_folder(&dir, label)?;
                println!("Imported {} images", records.len());
            }
            (None, Some(conversions)) => {
                let labels = vec![label; sources.len()];
                let dataset = Dataset::import(&store, &sources, Some(&labels), urls, &conversions)?;
                println!("dataset-{}", dataset.id());
            }
            (None, None) => {
                let labels = vec![label; sources.len()];
                let records = store.import(&sources, Some(&labels), urls)?;
                println!("Imported {} of {} images", records.len(), sources.len());
            }
        },

        Command::Convert { files, conversions } => {
            let files = files_or_all(&store, files)?;
            let count = store.convert_images(&files, &conversions)?;
            println!("Converted {} images", count);
        }

        Command::Derive { files, conversions } => {
            let files = files_or_all(&store, files)?;
            let dataset = Dataset::derive(&store, &files, &conversions)?;
            println!("dataset-{}", dataset.id());
        }

        Command::Build {
            id,
            transforms,
            bundled,
        } => {
            let dataset = Dataset::open(&store, id)?;
            dataset.build_data(&transforms, bundled)?;
            println!("Built {}", dataset.dir().display());
        }

        Command::Process { id } => {
            let manifest = Dataset::open(&store, id)?.process()?;
            println!("{}", manifest.to_json()?);
        }

        Command::Export { id, model, output } => {
            let dataset = Dataset::open(&store, id)?;
            let text = std::fs::read_to_string(&model)
                .with_context(|| format!("reading model {}", model.display()))?;
            let model: serde_json::Value = serde_json::from_str(&text)?;
            ModelBundle::export(&dataset, model, &output)?;
            println!("Wrote {}", output.display());
        }

        Command::List => {
            println!("{} images in the store", store.image_count()?);
            for id in Dataset::list(&store)? {
                let dataset = Dataset::open(&store, id)?;
                println!("dataset-{}: {} images", id, dataset.rows()?.len());
            }
        }

        Command::Delete { id } => {
            Dataset::open(&store, id)?.delete()?;
            println!("Deleted dataset-{}", id);
        }
    }

    Ok(())
}

fn files_or_all(store: &Store, files: Vec<String>) -> Result<Vec<String>> {
    if !files.is_empty() {
        return Ok(files);
    }
    Ok(store.records()?.into_iter().map(|r| r.file).collect())
}
