mod scheduler;

use std::path::{Path, PathBuf};
use std::thread;

use hf_hub::{Repo, RepoType, api::sync::Api};
use image::{GrayImage, RgbImage};
use ndarray::{Array1, Array2, Array3, Array4, Axis, Ix3, Ix4, concatenate};
use ort::{
    inputs,
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use tokenizers::Tokenizer;

pub use scheduler::DdimScheduler;

pub const DEFAULT_REPO: &str = "runwayml/stable-diffusion-inpainting";
pub const DEFAULT_REVISION: &str = "onnx";
pub const DEFAULT_TOKENIZER_REPO: &str = "openai/clip-vit-large-patch14";

/// Side length of the square the UNet works at.
pub const WORKING_RESOLUTION: u32 = 512;

const LATENT_SCALE: f32 = 0.18215;
const LATENT_DOWNSCALE: u32 = 8;
const MAX_TOKENS: usize = 77;
const END_OF_TEXT: &str = "<|endoftext|>";

#[derive(Debug, Clone)]
pub struct InpaintRequest<'a> {
    pub prompt: &'a str,
    pub negative_prompt: Option<&'a str>,
    pub seed: u64,
    pub steps: usize,
    pub guidance_scale: f32,
}

pub struct StableDiffusionInpaint {
    text_encoder: Session,
    unet: Session,
    vae_encoder: Session,
    vae_decoder: Session,
    tokenizer: Tokenizer,
    end_of_text: u32,
}

impl std::fmt::Debug for StableDiffusionInpaint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StableDiffusionInpaint")
            .field("end_of_text", &self.end_of_text)
            .finish_non_exhaustive()
    }
}

struct ModelFiles {
    text_encoder: PathBuf,
    unet: PathBuf,
    vae_encoder: PathBuf,
    vae_decoder: PathBuf,
    tokenizer: PathBuf,
}

impl StableDiffusionInpaint {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_hub(DEFAULT_REPO, DEFAULT_REVISION, DEFAULT_TOKENIZER_REPO)
    }

    pub fn from_hub(repo: &str, revision: &str, tokenizer_repo: &str) -> anyhow::Result<Self> {
        let api = Api::new()?;
        let models = api.repo(Repo::with_revision(
            repo.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        let unet = models.get("unet/model.onnx")?;
        // Large UNet exports keep their weights next to the graph.
        if let Err(e) = models.get("unet/weights.pb") {
            tracing::debug!("no external unet weights in {repo}: {e}");
        }

        let files = ModelFiles {
            text_encoder: models.get("text_encoder/model.onnx")?,
            unet,
            vae_encoder: models.get("vae_encoder/model.onnx")?,
            vae_decoder: models.get("vae_decoder/model.onnx")?,
            tokenizer: api.model(tokenizer_repo.to_string()).get("tokenizer.json")?,
        };

        Self::load(files)
    }

    /// Loads an export laid out as `text_encoder/`, `unet/`, `vae_encoder/`,
    /// `vae_decoder/` (each holding `model.onnx`) and `tokenizer/tokenizer.json`.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let files = ModelFiles {
            text_encoder: dir.join("text_encoder").join("model.onnx"),
            unet: dir.join("unet").join("model.onnx"),
            vae_encoder: dir.join("vae_encoder").join("model.onnx"),
            vae_decoder: dir.join("vae_decoder").join("model.onnx"),
            tokenizer: dir.join("tokenizer").join("tokenizer.json"),
        };

        for path in [
            &files.text_encoder,
            &files.unet,
            &files.vae_encoder,
            &files.vae_decoder,
            &files.tokenizer,
        ] {
            if !path.exists() {
                return Err(anyhow::anyhow!("Missing {:?}", path));
            }
        }

        Self::load(files)
    }

    fn load(files: ModelFiles) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {e}"))?;
        let end_of_text = tokenizer
            .token_to_id(END_OF_TEXT)
            .ok_or_else(|| anyhow::anyhow!("tokenizer has no {END_OF_TEXT} token"))?;

        Ok(Self {
            text_encoder: load_session(&files.text_encoder)?,
            unet: load_session(&files.unet)?,
            vae_encoder: load_session(&files.vae_encoder)?,
            vae_decoder: load_session(&files.vae_decoder)?,
            tokenizer,
            end_of_text,
        })
    }

    /// Synthesizes new content inside the non-zero pixels of `mask`.
    ///
    /// Both inputs must already be `WORKING_RESOLUTION` square; the result
    /// is returned at that resolution.
    pub fn inference(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        request: &InpaintRequest<'_>,
    ) -> anyhow::Result<RgbImage> {
        let side = WORKING_RESOLUTION;
        if image.dimensions() != (side, side) || mask.dimensions() != (side, side) {
            anyhow::bail!(
                "expected {side}x{side} image and mask, got {:?} and {:?}",
                image.dimensions(),
                mask.dimensions()
            );
        }

        let scheduler = DdimScheduler::new(request.steps)?;

        let cond = self.encode_text(request.prompt)?;
        let uncond = self.encode_text(request.negative_prompt.unwrap_or(""))?;
        let text_embeddings = concatenate(Axis(0), &[uncond.view(), cond.view()])?;

        let (image_tensor, mask_tensor) = image_tensors(image, mask);
        let masked_image = &image_tensor * &mask_tensor.mapv(|m| 1.0 - m);

        let masked_latents = {
            let _span = tracing::debug_span!("vae_encode").entered();
            let outputs = self
                .vae_encoder
                .run(inputs!["sample" => TensorRef::from_array_view(&masked_image)?])?;
            outputs[0]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix4>()?
                .mapv(|v| v * LATENT_SCALE)
        };
        let latent_side = (side / LATENT_DOWNSCALE) as usize;
        let latent_mask = latent_mask(mask, latent_side as u32);

        let mut rng = StdRng::seed_from_u64(request.seed);
        let mut latents = Array4::<f32>::from_shape_simple_fn((1, 4, latent_side, latent_side), || {
            rng.sample(StandardNormal)
        });

        for &t in scheduler.timesteps() {
            let _span = tracing::debug_span!("unet_step", t).entered();

            let single = concatenate(
                Axis(1),
                &[latents.view(), latent_mask.view(), masked_latents.view()],
            )?;
            let batch = concatenate(Axis(0), &[single.view(), single.view()])?;
            let timestep = Array1::from_vec(vec![t as i64]);

            let outputs = self.unet.run(inputs![
                "sample" => TensorRef::from_array_view(&batch)?,
                "timestep" => TensorRef::from_array_view(&timestep)?,
                "encoder_hidden_states" => TensorRef::from_array_view(&text_embeddings)?,
            ])?;
            let noise = outputs[0]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix4>()?;

            let guided = apply_guidance(
                noise.index_axis(Axis(0), 0).to_owned(),
                noise.index_axis(Axis(0), 1).to_owned(),
                request.guidance_scale,
            )
            .insert_axis(Axis(0));

            latents = scheduler.step(&guided, t, &latents);
        }

        let decoded = {
            let _span = tracing::debug_span!("vae_decode").entered();
            let latents = latents.mapv(|v| v / LATENT_SCALE);
            let outputs = self
                .vae_decoder
                .run(inputs!["latent_sample" => TensorRef::from_array_view(&latents)?])?;
            outputs[0]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix4>()?
                .to_owned()
        };

        let mut output_image = RgbImage::new(side, side);
        for (x, y, pixel) in output_image.enumerate_pixels_mut() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let v = (decoded[[0, c, y, x]] + 1.0) * 0.5 * 255.0;
                pixel[c] = v.clamp(0.0, 255.0).round() as u8;
            }
        }

        Ok(output_image)
    }

    fn encode_text(&mut self, text: &str) -> anyhow::Result<Array3<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Failed to tokenize prompt: {e}"))?;
        let ids = pad_tokens(encoding.get_ids(), self.end_of_text, MAX_TOKENS);
        let input_ids = Array2::from_shape_vec((1, MAX_TOKENS), ids)?;

        let outputs = self
            .text_encoder
            .run(inputs!["input_ids" => TensorRef::from_array_view(&input_ids)?])?;
        let hidden = outputs[0]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()?
            .to_owned();

        Ok(hidden)
    }
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
    tracing::info!("loading {}", path.display());
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(thread::available_parallelism()?.get())?
        .commit_from_file(path)?;
    Ok(session)
}

/// Truncates or pads token ids to `len`, keeping the end-of-text marker last
/// when truncating.
pub fn pad_tokens(ids: &[u32], end_of_text: u32, len: usize) -> Vec<i32> {
    let mut ids = ids.to_vec();
    if ids.len() > len {
        ids.truncate(len);
        if let Some(last) = ids.last_mut() {
            *last = end_of_text;
        }
    } else {
        ids.resize(len, end_of_text);
    }
    ids.into_iter().map(|id| id as i32).collect()
}

/// Classifier-free guidance: `uncond + scale * (cond - uncond)`.
pub fn apply_guidance(uncond: Array3<f32>, cond: Array3<f32>, scale: f32) -> Array3<f32> {
    &uncond + &((&cond - &uncond) * scale)
}

/// Image in [-1, 1] and binary mask (1 = repaint), both NCHW.
fn image_tensors(image: &RgbImage, mask: &GrayImage) -> (Array4<f32>, Array4<f32>) {
    let (width, height) = image.dimensions();
    let mut image_data = Array4::zeros((1, 3, height as usize, width as usize));
    let mut mask_data = Array4::zeros((1, 1, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        image_data[[0, 0, y, x]] = pixel[0] as f32 / 127.5 - 1.0;
        image_data[[0, 1, y, x]] = pixel[1] as f32 / 127.5 - 1.0;
        image_data[[0, 2, y, x]] = pixel[2] as f32 / 127.5 - 1.0;
    }
    for (x, y, pixel) in mask.enumerate_pixels() {
        mask_data[[0, 0, y as usize, x as usize]] = if pixel[0] >= 128 { 1.0f32 } else { 0.0f32 };
    }

    (image_data, mask_data)
}

fn latent_mask(mask: &GrayImage, side: u32) -> Array4<f32> {
    let small = image::imageops::resize(mask, side, side, image::imageops::FilterType::Nearest);
    let mut data = Array4::zeros((1, 1, side as usize, side as usize));
    for (x, y, pixel) in small.enumerate_pixels() {
        data[[0, 0, y as usize, x as usize]] = if pixel[0] >= 128 { 1.0f32 } else { 0.0f32 };
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_pad_tokens_pads_with_end_of_text() {
        assert_eq!(pad_tokens(&[49406, 320, 49407], 49407, 5), vec![49406, 320, 49407, 49407, 49407]);
    }

    #[test]
    fn test_pad_tokens_truncates_and_keeps_terminator() {
        let ids: Vec<u32> = (0..100).collect();
        let padded = pad_tokens(&ids, 49407, MAX_TOKENS);

        assert_eq!(padded.len(), MAX_TOKENS);
        assert_eq!(padded[75], 75);
        assert_eq!(padded[76], 49407);
    }

    #[test]
    fn test_guidance_scale_one_returns_conditional() {
        let uncond = Array3::from_elem((1, 2, 2), 1.0f32);
        let cond = Array3::from_elem((1, 2, 2), 3.0f32);

        assert_eq!(apply_guidance(uncond.clone(), cond.clone(), 1.0), cond);
        assert!(apply_guidance(uncond, cond, 7.5).iter().all(|v| *v == 16.0));
    }

    #[test]
    fn test_latent_mask_downsamples_binary() {
        let mask = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 255 } else { 0 }]));
        let small = latent_mask(&mask, 2);

        assert_eq!(small.shape(), &[1, 1, 2, 2]);
        assert_eq!(small[[0, 0, 0, 0]], 1.0);
        assert_eq!(small[[0, 0, 1, 1]], 0.0);
    }

    #[test]
    fn test_image_tensors_range() {
        let image = RgbImage::from_pixel(2, 2, image::Rgb([0, 255, 0]));
        let mask = GrayImage::from_pixel(2, 2, Luma([255]));
        let (image_data, mask_data) = image_tensors(&image, &mask);

        assert_eq!(image_data[[0, 0, 0, 0]], -1.0);
        assert_eq!(image_data[[0, 1, 1, 1]], 1.0);
        assert!(mask_data.iter().all(|m| *m == 1.0));
    }
}
