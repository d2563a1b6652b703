use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, GrayImage};

use crate::error::PipelineError;

/// A decoded input image together with the path it was read from.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub id: PathBuf,
    pub pixels: DynamicImage,
}

impl SourceImage {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }
        let pixels = image::open(path).map_err(|source| PipelineError::UnreadableImage {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            id: path.to_path_buf(),
            pixels,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// One detected object. The instance mask, when present, covers the whole
/// source image but may be at a different resolution.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub instance_mask: Option<GrayImage>,
}

/// Class-and-confidence predicate shared by selection and fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionRule {
    pub target_class: usize,
    pub min_confidence: f32,
}

impl DetectionRule {
    pub fn new(target_class: usize, min_confidence: f32) -> Self {
        Self {
            target_class,
            min_confidence,
        }
    }

    pub fn matches(&self, detection: &Detection) -> bool {
        detection.class_id == self.target_class && detection.confidence >= self.min_confidence
    }
}

pub trait ObjectDetector {
    fn detect(&mut self, image: &SourceImage) -> anyhow::Result<Vec<Detection>>;
}

impl<D: ObjectDetector + ?Sized> ObjectDetector for &mut D {
    fn detect(&mut self, image: &SourceImage) -> anyhow::Result<Vec<Detection>> {
        (**self).detect(image)
    }
}

impl<D: ObjectDetector + ?Sized> ObjectDetector for Box<D> {
    fn detect(&mut self, image: &SourceImage) -> anyhow::Result<Vec<Detection>> {
        (**self).detect(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_id: usize, confidence: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            instance_mask: None,
        }
    }

    #[test]
    fn test_rule_threshold_is_inclusive() {
        let rule = DetectionRule::new(14, 0.8);

        assert!(rule.matches(&detection(14, 0.8)));
        assert!(rule.matches(&detection(14, 0.95)));
        assert!(!rule.matches(&detection(14, 0.79)));
        assert!(!rule.matches(&detection(15, 0.99)));
    }

    #[test]
    fn test_open_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jpg");
        assert!(matches!(
            SourceImage::open(&missing),
            Err(PipelineError::MissingInput(_))
        ));

        let corrupt = dir.path().join("bad.png");
        std::fs::write(&corrupt, b"not an image").unwrap();
        assert!(matches!(
            SourceImage::open(&corrupt),
            Err(PipelineError::UnreadableImage { .. })
        ));
    }
}
