use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use crate::config::PipelineConfig;
use crate::detection::{Detection, ObjectDetector, SourceImage};
use crate::error::PipelineError;
use crate::filler::{ContentFiller, FillMode, check_inputs};
use crate::fusion::FusedMask;

pub const SIDE: u32 = 16;

/// Scripted detector keyed by file name. Records every call.
#[derive(Debug, Default)]
pub struct FakeDetector {
    detections: HashMap<String, Vec<Detection>>,
    failing: HashSet<String>,
    pub calls: Vec<PathBuf>,
}

impl FakeDetector {
    /// A detection without an instance mask.
    pub fn add(&mut self, name: &str, class_id: usize, confidence: f32) {
        self.push(name, class_id, confidence, None);
    }

    /// A detection whose mask covers the square at (`x`, `y`) of side `side`.
    pub fn add_region(
        &mut self,
        name: &str,
        class_id: usize,
        confidence: f32,
        (x, y, side): (u32, u32, u32),
    ) {
        self.push(name, class_id, confidence, Some(square(x, y, side)));
    }

    /// A detection carrying an arbitrary instance mask.
    pub fn push_mask(&mut self, name: &str, class_id: usize, confidence: f32, mask: GrayImage) {
        self.push(name, class_id, confidence, Some(mask));
    }

    pub fn fail_on(&mut self, name: &str) {
        self.failing.insert(name.to_string());
    }

    fn push(&mut self, name: &str, class_id: usize, confidence: f32, mask: Option<GrayImage>) {
        self.detections
            .entry(name.to_string())
            .or_default()
            .push(Detection {
                class_id,
                confidence,
                instance_mask: mask,
            });
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.calls.iter().filter(|p| file_name(p) == name).count()
    }
}

impl ObjectDetector for FakeDetector {
    fn detect(&mut self, image: &SourceImage) -> anyhow::Result<Vec<Detection>> {
        self.calls.push(image.id.clone());
        let name = file_name(&image.id);
        if self.failing.contains(&name) {
            anyhow::bail!("scripted failure for {name}");
        }
        Ok(self.detections.get(&name).cloned().unwrap_or_default())
    }
}

/// Filler that paints the masked pixels white and records what it was given.
#[derive(Debug, Default)]
pub struct RecordingFiller {
    pub resolution: Option<(u32, u32)>,
    pub calls: Vec<((u32, u32), FillMode)>,
}

impl RecordingFiller {
    pub fn at(resolution: (u32, u32)) -> Self {
        Self {
            resolution: Some(resolution),
            calls: Vec::new(),
        }
    }
}

impl ContentFiller for RecordingFiller {
    fn working_resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    fn fill(
        &mut self,
        image: &DynamicImage,
        mask: &FusedMask,
        mode: &FillMode,
    ) -> Result<DynamicImage, PipelineError> {
        check_inputs(image, mask, self.resolution)?;
        self.calls.push((mask.dimensions(), mode.clone()));

        let mut out = image.to_rgb8();
        for (x, y, p) in mask.as_gray().enumerate_pixels() {
            if p.0[0] != 0 {
                out.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        Ok(DynamicImage::ImageRgb8(out))
    }
}

pub fn square(x0: u32, y0: u32, side: u32) -> GrayImage {
    GrayImage::from_fn(SIDE, SIDE, |x, y| {
        let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
        Luma([if inside { 255 } else { 0 }])
    })
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Defaults pointed at `dir` with lossless inputs.
pub fn config_for(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.input.dir = dir.to_path_buf();
    config.input.extension = "png".to_string();
    config
}

/// Writes `origIm{i}.png` for every index in `indices`.
pub fn write_inputs(dir: &Path, indices: impl IntoIterator<Item = usize>) {
    for i in indices {
        let image = RgbImage::from_fn(SIDE, SIDE, |x, y| {
            Rgb([(x * 10) as u8, (y * 10) as u8, (i * 10) as u8])
        });
        image.save(dir.join(name(i))).unwrap();
    }
}

pub fn name(index: usize) -> String {
    format!("origIm{index}.png")
}
