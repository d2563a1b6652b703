use std::path::PathBuf;

use clap::{Parser, Subcommand};
use maskfill::backends::{DiffusionFiller, TeleaFiller, YoloSegDetector};
use maskfill::{CachedDetector, ObjectDetector, PipelineConfig, PipelineDriver};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Find, mask and replace objects across a photo set")]
struct Cli {
    /// JSON configuration file; built-in defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    quota: Option<usize>,

    /// Detector class index to look for
    #[arg(long, global = true)]
    class_id: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the images that contain the target class
    Select,
    /// Write a mask artifact next to each image with a qualifying instance
    Segment,
    /// Erase the target class from the selected images
    Remove {
        #[arg(long)]
        radius: Option<u32>,
    },
    /// Paint new content into previously generated masks
    Substitute {
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        negative_prompt: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Print the effective configuration
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &cli.input_dir {
        config.input.dir = dir.clone();
    }
    if let Some(quota) = cli.quota {
        config.selection.quota = quota;
    }
    if let Some(class_id) = cli.class_id {
        config.detection.target_class = class_id;
    }
    match &cli.command {
        Command::Remove { radius: Some(radius) } => config.structural.radius = *radius,
        Command::Substitute {
            prompt,
            negative_prompt,
            seed,
            steps,
        } => {
            let g = &mut config.generative;
            if let Some(prompt) = prompt {
                g.prompt = prompt.clone();
            }
            if negative_prompt.is_some() {
                g.negative_prompt = negative_prompt.clone();
            }
            if let Some(seed) = seed {
                g.seed = *seed;
            }
            if let Some(steps) = steps {
                g.steps = *steps;
            }
        }
        _ => {}
    }

    config.validate()?;
    Ok(config)
}

fn load_detector(config: &PipelineConfig) -> anyhow::Result<Box<dyn ObjectDetector>> {
    let detector = YoloSegDetector::load(&config.detection)?;
    if config.detection.cache_detections {
        Ok(Box::new(CachedDetector::new(detector)))
    } else {
        Ok(Box::new(detector))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let driver = PipelineDriver::new(config.clone());

    let summary = match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Command::Select => {
            let mut detector = load_detector(&config)?;
            let summary = driver.select_summary(&mut detector);
            for path in &summary.selected {
                println!("{}", path.display());
            }
            summary
        }
        Command::Segment => {
            let mut detector = load_detector(&config)?;
            driver.generate_masks(&mut detector)
        }
        Command::Remove { .. } => {
            let mut detector = load_detector(&config)?;
            driver.remove(&mut detector, &mut TeleaFiller)
        }
        Command::Substitute { .. } => {
            let mut filler = DiffusionFiller::load(&config.generative)?;
            driver.substitute(&mut filler)?
        }
    };

    tracing::info!("{summary}");

    Ok(())
}
