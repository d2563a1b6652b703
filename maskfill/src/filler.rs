use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::error::PipelineError;
use crate::fusion::FusedMask;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerativeParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub seed: u64,
    pub steps: usize,
    pub guidance_scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FillMode {
    /// Propagate surrounding pixels inward.
    Structural { radius: u32 },
    /// Synthesize new content guided by a text prompt.
    Generative(GenerativeParams),
}

impl FillMode {
    pub fn name(&self) -> &'static str {
        match self {
            FillMode::Structural { .. } => "structural",
            FillMode::Generative(_) => "generative",
        }
    }
}

/// Replaces the masked region of an image. Implementations return an image
/// of the same dimensions as the input and leave pixels outside the mask
/// alone where the method allows it.
pub trait ContentFiller {
    /// Fixed input size the filler requires, if any.
    fn working_resolution(&self) -> Option<(u32, u32)> {
        None
    }

    fn fill(
        &mut self,
        image: &DynamicImage,
        mask: &FusedMask,
        mode: &FillMode,
    ) -> Result<DynamicImage, PipelineError>;
}

impl<F: ContentFiller + ?Sized> ContentFiller for &mut F {
    fn working_resolution(&self) -> Option<(u32, u32)> {
        (**self).working_resolution()
    }

    fn fill(
        &mut self,
        image: &DynamicImage,
        mask: &FusedMask,
        mode: &FillMode,
    ) -> Result<DynamicImage, PipelineError> {
        (**self).fill(image, mask, mode)
    }
}

impl<F: ContentFiller + ?Sized> ContentFiller for Box<F> {
    fn working_resolution(&self) -> Option<(u32, u32)> {
        (**self).working_resolution()
    }

    fn fill(
        &mut self,
        image: &DynamicImage,
        mask: &FusedMask,
        mode: &FillMode,
    ) -> Result<DynamicImage, PipelineError> {
        (**self).fill(image, mask, mode)
    }
}

/// Validation every filler runs before touching a model. An empty mask is
/// refused rather than passed through.
pub fn check_inputs(
    image: &DynamicImage,
    mask: &FusedMask,
    working_resolution: Option<(u32, u32)>,
) -> Result<(), PipelineError> {
    if mask.is_empty() {
        return Err(PipelineError::EmptyMask);
    }
    if mask.dimensions() != image.dimensions() {
        return Err(PipelineError::DimensionMismatch {
            subject: "mask",
            expected: image.dimensions(),
            actual: mask.dimensions(),
        });
    }
    if let Some(expected) = working_resolution {
        if image.dimensions() != expected {
            return Err(PipelineError::DimensionMismatch {
                subject: "image",
                expected,
                actual: image.dimensions(),
            });
        }
    }
    Ok(())
}

/// Brings an image and its mask to `resolution`; the mask stays binary.
pub fn resize_for(
    image: &DynamicImage,
    mask: &FusedMask,
    resolution: (u32, u32),
) -> (DynamicImage, FusedMask) {
    let (width, height) = resolution;
    let image = if image.dimensions() == resolution {
        image.clone()
    } else {
        image.resize_exact(width, height, FilterType::Lanczos3)
    };
    (image, mask.resized(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    fn mask_with_pixel(width: u32, height: u32) -> FusedMask {
        let mut mask = FusedMask::empty(width, height);
        mask.set_pixel(0, 0);
        mask
    }

    #[test]
    fn test_empty_mask_fails_closed() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let result = check_inputs(&image, &FusedMask::empty(4, 4), None);

        assert!(matches!(result, Err(PipelineError::EmptyMask)));
    }

    #[test]
    fn test_mask_must_match_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let result = check_inputs(&image, &mask_with_pixel(4, 3), None);

        assert!(matches!(
            result,
            Err(PipelineError::DimensionMismatch { subject: "mask", .. })
        ));
    }

    #[test]
    fn test_working_resolution_enforced() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let mask = mask_with_pixel(4, 4);

        assert!(check_inputs(&image, &mask, Some((4, 4))).is_ok());
        assert!(matches!(
            check_inputs(&image, &mask, Some((8, 8))),
            Err(PipelineError::DimensionMismatch { subject: "image", .. })
        ));
    }

    #[test]
    fn test_resize_for_keeps_mask_binary() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(10, 6));
        let mask = FusedMask::from_gray(&GrayImage::from_fn(10, 6, |x, _| {
            image::Luma([if x < 5 { 255 } else { 0 }])
        }));

        let (image, mask) = resize_for(&image, &mask, (16, 16));

        assert_eq!(image.dimensions(), (16, 16));
        assert_eq!(mask.dimensions(), (16, 16));
        assert!(mask.as_gray().pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        let columns = mask.set_count() / 16;
        assert!((7..=9).contains(&columns));
    }
}
