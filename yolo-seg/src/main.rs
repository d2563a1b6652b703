use clap::Parser;
use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use yolo_seg::{Instance, YoloSeg};

#[derive(Parser)]
struct Args {
    #[arg(long)]
    image: String,

    /// Local ONNX file; downloads the default export when omitted
    #[arg(long)]
    model: Option<String>,

    #[arg(long, default_value_t = 0.25)]
    confidence_threshold: f32,

    #[arg(long, default_value_t = 0.7)]
    nms_threshold: f32,

    /// Writes the image with boxes and tinted masks
    #[arg(long)]
    overlay: Option<String>,
}

#[derive(Serialize)]
struct Row {
    class_id: usize,
    confidence: f32,
    bbox: [f32; 4],
    mask_pixels: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut model = match &args.model {
        Some(path) => YoloSeg::from_file(path, args.confidence_threshold, args.nms_threshold)?,
        None => YoloSeg::new(args.confidence_threshold, args.nms_threshold)?,
    };

    let image =
        image::open(&args.image).map_err(|e| anyhow::anyhow!("Failed to open image: {e}"))?;
    let instances = model.inference(&image)?;

    let rows = instances
        .iter()
        .map(|i| Row {
            class_id: i.class_id,
            confidence: i.confidence,
            bbox: i.bbox,
            mask_pixels: i.mask.pixels().filter(|p| p[0] > 0).count(),
        })
        .collect::<Vec<_>>();
    println!("{}", serde_json::to_string_pretty(&rows)?);

    if let Some(path) = &args.overlay {
        let overlay = draw_overlay(image.to_rgb8(), &instances);
        overlay
            .save(path)
            .map_err(|e| anyhow::anyhow!("Failed to save overlay: {e}"))?;
        println!("Saved overlay to {path}");
    }

    Ok(())
}

fn draw_overlay(mut canvas: RgbImage, instances: &[Instance]) -> RgbImage {
    let (width, height) = canvas.dimensions();

    for instance in instances {
        let mask = image::imageops::resize(
            &instance.mask,
            width,
            height,
            image::imageops::FilterType::Nearest,
        );
        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            if mask.get_pixel(x, y)[0] > 0 {
                pixel[0] = pixel[0].saturating_add(80);
            }
        }

        let [x1, y1, x2, y2] = instance.bbox;
        let w = (x2 - x1).max(1.0) as u32;
        let h = (y2 - y1).max(1.0) as u32;
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(x1 as i32, y1 as i32).of_size(w, h),
            Rgb([255, 0, 0]),
        );
    }

    canvas
}
