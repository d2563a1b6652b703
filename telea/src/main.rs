use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "test.png")]
    image: String,

    /// Non-zero pixels mark the region to fill
    #[arg(long, default_value = "mask.png")]
    mask: String,

    #[arg(long, default_value = "output.png")]
    output: String,

    #[arg(long, default_value_t = 3)]
    radius: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Cli::parse();

    let image =
        image::open(&args.image).map_err(|e| anyhow::anyhow!("Failed to open image: {e}"))?;
    let mask = image::open(&args.mask).map_err(|e| anyhow::anyhow!("Failed to open mask: {e}"))?;

    let output = telea::inpaint(&image.to_rgb8(), &mask.to_luma8(), args.radius)?;

    output
        .save(&args.output)
        .map_err(|e| anyhow::anyhow!("Failed to save output image: {e}"))?;

    println!("Successfully processed and saved image to {}", args.output);

    Ok(())
}
