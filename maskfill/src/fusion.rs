use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::detection::{Detection, DetectionRule, ObjectDetector, SourceImage};
use crate::error::{PipelineError, Stage};

const SET: u8 = 255;
const BINARIZE_AT: u8 = 128;

/// Binary region mask. Every pixel is either 0 or 255.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedMask(GrayImage);

impl FusedMask {
    pub fn empty(width: u32, height: u32) -> Self {
        FusedMask(GrayImage::new(width, height))
    }

    /// Binarizes an arbitrary grayscale image; values of 128 and above are set.
    pub fn from_gray(gray: &GrayImage) -> Self {
        let mut out = gray.clone();
        for pixel in out.pixels_mut() {
            pixel.0[0] = if pixel.0[0] >= BINARIZE_AT { SET } else { 0 };
        }
        FusedMask(out)
    }

    /// ORs an instance mask into this one, resizing it first if needed.
    pub fn union_instance(&mut self, instance: &GrayImage) {
        let (width, height) = self.0.dimensions();
        let resized;
        let instance = if instance.dimensions() == (width, height) {
            instance
        } else {
            resized = imageops::resize(instance, width, height, FilterType::Nearest);
            &resized
        };

        for (dst, src) in self.0.pixels_mut().zip(instance.pixels()) {
            if src.0[0] >= BINARIZE_AT {
                dst.0[0] = SET;
            }
        }
    }

    pub fn set_pixel(&mut self, x: u32, y: u32) {
        self.0.put_pixel(x, y, Luma([SET]));
    }

    pub fn is_empty(&self) -> bool {
        self.0.pixels().all(|p| p.0[0] == 0)
    }

    pub fn set_count(&self) -> usize {
        self.0.pixels().filter(|p| p.0[0] != 0).count()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.0
    }

    /// Nearest-neighbour resize, so the result stays binary.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.0.dimensions() == (width, height) {
            return self.clone();
        }
        FusedMask(imageops::resize(&self.0, width, height, FilterType::Nearest))
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }
        let gray = image::open(path)
            .map_err(|source| PipelineError::UnreadableImage {
                path: path.to_path_buf(),
                source,
            })?
            .to_luma8();
        Ok(Self::from_gray(&gray))
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        self.0.save(path).map_err(|source| PipelineError::Persist {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Union of the instance masks of every detection the rule accepts, at
/// `dimensions`. Detections without a mask contribute nothing.
pub fn fuse_detections(
    dimensions: (u32, u32),
    detections: &[Detection],
    rule: &DetectionRule,
) -> FusedMask {
    let mut fused = FusedMask::empty(dimensions.0, dimensions.1);
    for detection in detections.iter().filter(|d| rule.matches(d)) {
        if let Some(mask) = &detection.instance_mask {
            fused.union_instance(mask);
        }
    }
    fused
}

/// Runs the detector on `image` and fuses the qualifying instance masks.
pub fn fuse<D>(
    detector: &mut D,
    image: &SourceImage,
    rule: &DetectionRule,
) -> Result<FusedMask, PipelineError>
where
    D: ObjectDetector + ?Sized,
{
    let detections = detector
        .detect(image)
        .map_err(|e| PipelineError::inference(Stage::Detect, e))?;

    let fused = fuse_detections(image.dimensions(), &detections, rule);
    if fused.is_empty() {
        if detections.iter().all(|d| d.instance_mask.is_none()) {
            tracing::info!("{:?}: no masks available", image.id);
        } else {
            tracing::info!(
                "{:?}: masks available but none met class {} at confidence {}",
                image.id,
                rule.target_class,
                rule.min_confidence
            );
        }
    } else {
        tracing::debug!("{:?}: fused mask covers {} pixels", image.id, fused.set_count());
    }

    Ok(fused)
}
