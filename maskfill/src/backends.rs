use image::DynamicImage;
use sd_inpaint::{InpaintRequest, StableDiffusionInpaint, WORKING_RESOLUTION};
use yolo_seg::YoloSeg;

use crate::config::{DetectionConfig, DetectorModel, DiffusionModel, GenerativeConfig};
use crate::detection::{Detection, ObjectDetector, SourceImage};
use crate::error::{PipelineError, Stage};
use crate::filler::{ContentFiller, FillMode, check_inputs};
use crate::fusion::FusedMask;
use crate::model_files;

/// Instance segmentation backed by the YOLOv8-seg ONNX export.
#[derive(Debug)]
pub struct YoloSegDetector {
    model: YoloSeg,
}

impl YoloSegDetector {
    pub fn load(config: &DetectionConfig) -> anyhow::Result<Self> {
        let floor = config.confidence_floor;
        let iou = config.iou_threshold;
        let model = match &config.model {
            DetectorModel::Hub { repo, file } => YoloSeg::from_hub(repo, file, floor, iou)?,
            DetectorModel::Local { path, sha256 } => {
                if let Some(expected) = sha256 {
                    model_files::verify_file(path, expected)?;
                }
                YoloSeg::from_file(path, floor, iou)?
            }
        };

        Ok(Self {
            model: model.with_input_size(config.input_size),
        })
    }
}

impl ObjectDetector for YoloSegDetector {
    fn detect(&mut self, image: &SourceImage) -> anyhow::Result<Vec<Detection>> {
        let instances = self.model.inference(&image.pixels)?;
        tracing::debug!("{:?}: {} instances", image.id, instances.len());

        Ok(instances
            .into_iter()
            .map(|instance| Detection {
                class_id: instance.class_id,
                confidence: instance.confidence,
                instance_mask: Some(instance.mask),
            })
            .collect())
    }
}

/// Structural fill using Telea's fast-marching inpainting.
#[derive(Debug, Default)]
pub struct TeleaFiller;

impl ContentFiller for TeleaFiller {
    fn fill(
        &mut self,
        image: &DynamicImage,
        mask: &FusedMask,
        mode: &FillMode,
    ) -> Result<DynamicImage, PipelineError> {
        let FillMode::Structural { radius } = mode else {
            return Err(PipelineError::UnsupportedFill(mode.name()));
        };
        check_inputs(image, mask, None)?;

        let filled = telea::inpaint(&image.to_rgb8(), mask.as_gray(), *radius)
            .map_err(|e| PipelineError::inference(Stage::Fill, e))?;
        Ok(DynamicImage::ImageRgb8(filled))
    }
}

/// Generative fill using a Stable Diffusion inpainting export.
#[derive(Debug)]
pub struct DiffusionFiller {
    model: StableDiffusionInpaint,
}

impl DiffusionFiller {
    pub fn load(config: &GenerativeConfig) -> anyhow::Result<Self> {
        if config.resolution != WORKING_RESOLUTION {
            anyhow::bail!(
                "generative.resolution {} is not supported, the model runs at {}",
                config.resolution,
                WORKING_RESOLUTION
            );
        }

        let model = match &config.model {
            DiffusionModel::Hub {
                repo,
                revision,
                tokenizer_repo,
            } => StableDiffusionInpaint::from_hub(repo, revision, tokenizer_repo)?,
            DiffusionModel::Local { dir, checksums } => {
                model_files::verify_checksums(dir, checksums)?;
                StableDiffusionInpaint::from_dir(dir)?
            }
        };

        Ok(Self { model })
    }
}

impl ContentFiller for DiffusionFiller {
    fn working_resolution(&self) -> Option<(u32, u32)> {
        Some((WORKING_RESOLUTION, WORKING_RESOLUTION))
    }

    fn fill(
        &mut self,
        image: &DynamicImage,
        mask: &FusedMask,
        mode: &FillMode,
    ) -> Result<DynamicImage, PipelineError> {
        let FillMode::Generative(params) = mode else {
            return Err(PipelineError::UnsupportedFill(mode.name()));
        };
        check_inputs(image, mask, self.working_resolution())?;

        let request = InpaintRequest {
            prompt: &params.prompt,
            negative_prompt: params.negative_prompt.as_deref(),
            seed: params.seed,
            steps: params.steps,
            guidance_scale: params.guidance_scale,
        };
        let filled = self
            .model
            .inference(&image.to_rgb8(), mask.as_gray(), &request)
            .map_err(|e| PipelineError::inference(Stage::Fill, e))?;
        Ok(DynamicImage::ImageRgb8(filled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filler::GenerativeParams;
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn test_telea_fills_hole_and_keeps_size() {
        let mut rgb = RgbImage::from_pixel(12, 10, Rgb([40, 90, 200]));
        let mut mask = FusedMask::empty(12, 10);
        for y in 4..6 {
            for x in 5..7 {
                rgb.put_pixel(x, y, Rgb([255, 0, 0]));
                mask.set_pixel(x, y);
            }
        }

        let out = TeleaFiller
            .fill(
                &DynamicImage::ImageRgb8(rgb),
                &mask,
                &FillMode::Structural { radius: 3 },
            )
            .unwrap();

        assert_eq!(out.dimensions(), (12, 10));
        let filled = out.to_rgb8().get_pixel(5, 4).0;
        assert!(filled.iter().zip([40u8, 90, 200]).all(|(a, b)| a.abs_diff(b) <= 1));
    }

    #[test]
    fn test_telea_rejects_generative_mode() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let mut mask = FusedMask::empty(4, 4);
        mask.set_pixel(1, 1);
        let mode = FillMode::Generative(GenerativeParams {
            prompt: "a squirrel".to_string(),
            negative_prompt: None,
            seed: 42,
            steps: 1,
            guidance_scale: 7.5,
        });

        assert!(matches!(
            TeleaFiller.fill(&image, &mask, &mode),
            Err(PipelineError::UnsupportedFill("generative"))
        ));
    }

    #[test]
    fn test_telea_refuses_empty_mask() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let result = TeleaFiller.fill(
            &image,
            &FusedMask::empty(4, 4),
            &FillMode::Structural { radius: 3 },
        );

        assert!(matches!(result, Err(PipelineError::EmptyMask)));
    }
}
