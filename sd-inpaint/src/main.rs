use clap::Parser;
use sd_inpaint::{InpaintRequest, StableDiffusionInpaint, WORKING_RESOLUTION};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "test.png")]
    image: String,

    #[arg(long, default_value = "mask.png")]
    mask: String,

    #[arg(long, default_value = "output.png")]
    output: String,

    #[arg(long)]
    prompt: String,

    #[arg(long)]
    negative_prompt: Option<String>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 50)]
    steps: usize,

    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f32,

    /// Local export directory; downloads the default export when omitted
    #[arg(long)]
    model_dir: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Cli::parse();

    let mut model = match &args.model_dir {
        Some(dir) => StableDiffusionInpaint::from_dir(dir)?,
        None => StableDiffusionInpaint::new()?,
    };

    let image =
        image::open(&args.image).map_err(|e| anyhow::anyhow!("Failed to open image: {e}"))?;
    let image = image.resize_exact(
        WORKING_RESOLUTION,
        WORKING_RESOLUTION,
        image::imageops::FilterType::Lanczos3,
    );

    let mask = image::open(&args.mask).map_err(|e| anyhow::anyhow!("Failed to open mask: {e}"))?;
    let mask = mask.resize_exact(
        WORKING_RESOLUTION,
        WORKING_RESOLUTION,
        image::imageops::FilterType::Nearest,
    );

    let request = InpaintRequest {
        prompt: &args.prompt,
        negative_prompt: args.negative_prompt.as_deref(),
        seed: args.seed,
        steps: args.steps,
        guidance_scale: args.guidance_scale,
    };
    let output = model.inference(&image.to_rgb8(), &mask.to_luma8(), &request)?;

    output
        .save(&args.output)
        .map_err(|e| anyhow::anyhow!("Failed to save output image: {e}"))?;

    println!("Successfully processed and saved image to {}", args.output);

    Ok(())
}
