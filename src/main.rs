use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn, Level};

use domino_vision::detection::pips::validate_pip_counts;
use domino_vision::detection::annotate::tile_label;
use domino_vision::{DetectionConfig, DetectionPipeline, RawImage};

#[derive(Parser)]
#[command(name = "domino-vision")]
#[command(about = "Find dominoes in a photo, count their pips and total the score")]
struct Cli {
    /// Path to input image file
    #[arg(value_name = "IMAGE")]
    image_path: PathBuf,

    /// Where to save the annotated image (PNG)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Run detection on the calling thread instead of the background worker
    #[arg(long)]
    no_worker: bool,

    /// Use the domain-trained model
    #[arg(long, env = "DOMINO_USE_CUSTOM_MODEL")]
    custom_model: bool,

    /// Use the hosted inference API
    #[arg(long, env = "DOMINO_USE_REMOTE_API")]
    remote_api: bool,

    #[arg(long, env = "DOMINO_REMOTE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "DOMINO_REMOTE_MODEL")]
    remote_model: Option<String>,

    #[arg(long, env = "DOMINO_REMOTE_VERSION")]
    remote_version: Option<String>,

    /// General object detector (.rten)
    #[arg(long, env = "DOMINO_MODEL_PATH", value_name = "FILE")]
    model_path: Option<PathBuf>,

    /// Directory holding model.rten and labels.txt
    #[arg(long, env = "DOMINO_CUSTOM_MODEL_DIR", value_name = "DIR")]
    custom_model_dir: Option<PathBuf>,

    /// Longest side after preprocessing (defaults to the backend's bound)
    #[arg(long)]
    max_dimension: Option<u32>,
}

impl Cli {
    fn config(&self) -> DetectionConfig {
        let mut config = DetectionConfig::new()
            .with_custom_model(self.custom_model)
            .with_remote_api(self.remote_api)
            .with_worker(!self.no_worker);

        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.clone());
        }
        if let Some(model) = &self.remote_model {
            config.remote.model_name = model.clone();
        }
        if let Some(version) = &self.remote_version {
            config.remote.model_version = version.clone();
        }
        if let Some(path) = &self.model_path {
            config.general_model_path = path.clone();
        }
        if let Some(dir) = &self.custom_model_dir {
            config.custom_model_dir = dir.clone();
        }
        if let Some(max) = self.max_dimension {
            config = config.with_max_dimension(max);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("Loading image: {:?}", args.image_path);
    let image = RawImage::from_path(&args.image_path)
        .with_context(|| format!("Failed to load image {:?}", args.image_path))?;
    info!("Image loaded: {}x{}", image.width, image.height);

    let pipeline = DetectionPipeline::new(args.config()).context("Failed to build detection pipeline")?;
    pipeline.preload().await.context("Failed to load detection models")?;

    let result = pipeline
        .detect(image)
        .await
        .with_context(|| format!("Detection failed using {}", pipeline.strategy_name()))?;
    pipeline.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("\n=== Domino Detection Results ===");
        println!("Tiles detected: {}", result.tile_count());

        if result.tiles.is_empty() {
            println!("No dominoes detected.");
        } else {
            println!();
            for (i, tile) in result.tiles.iter().enumerate() {
                let bbox = &tile.bounding_box;
                println!(
                    "  Tile {} at ({:.0}, {:.0}) {:.0}x{:.0}: {} - confidence: {:.2}",
                    i + 1,
                    bbox.x,
                    bbox.y,
                    bbox.width,
                    bbox.height,
                    tile_label(tile),
                    tile.confidence
                );
                if args.verbose && !validate_pip_counts(tile) {
                    warn!("Tile {} has an implausible pip count", i + 1);
                }
            }
        }
        println!("\nTotal score: {}", result.total_score);
        println!("Confidence: {:.2}", result.confidence);
    }

    if let Some(output) = &args.output {
        let png = result.annotated_png().context("Failed to encode annotated image")?;
        std::fs::write(output, png)
            .with_context(|| format!("Failed to write annotated image to {:?}", output))?;
        info!("Annotated image saved to {:?}", output);
    }

    Ok(())
}
