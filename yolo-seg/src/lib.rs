use std::path::Path;
use std::thread;

use hf_hub::api::sync::Api;
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use ndarray::{Array4, ArrayView2, ArrayView3, Axis, Ix3, Ix4};
use ort::{
    inputs,
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};

pub const DEFAULT_REPO: &str = "Ultralytics/YOLOv8";
pub const DEFAULT_FILE: &str = "yolov8x-seg.onnx";
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// One segmented object instance.
///
/// `bbox` is `[x1, y1, x2, y2]` in source image pixels. `mask` is binary
/// (0 or 255) at the model's prototype resolution and spans the whole
/// source image, so resizing it to the source dimensions aligns it.
#[derive(Debug, Clone)]
pub struct Instance {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: [f32; 4],
    pub mask: GrayImage,
}

#[derive(Debug)]
pub struct YoloSeg {
    model: Session,
    input_size: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl YoloSeg {
    pub fn new(confidence_threshold: f32, nms_threshold: f32) -> anyhow::Result<Self> {
        Self::from_hub(DEFAULT_REPO, DEFAULT_FILE, confidence_threshold, nms_threshold)
    }

    pub fn from_hub(
        repo: &str,
        file: &str,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> anyhow::Result<Self> {
        let api = Api::new()?;
        let repo = api.model(repo.to_string());
        let model_path = repo.get(file)?;

        Self::from_file(model_path, confidence_threshold, nms_threshold)
    }

    pub fn from_file(
        model_path: impl AsRef<Path>,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        tracing::info!("loading segmentation model from {}", model_path.display());

        let model = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(thread::available_parallelism()?.get())?
            .commit_from_file(model_path)
            .map_err(|e| {
                anyhow::anyhow!("Failed to load model from {}: {e}", model_path.display())
            })?;

        Ok(YoloSeg {
            model,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold,
            nms_threshold,
        })
    }

    /// Square side the image is stretched to before inference.
    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn inference(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<Instance>> {
        let _span = tracing::debug_span!("yolo_seg_inference").entered();

        let (orig_width, orig_height) = image.dimensions();
        let size = self.input_size;
        let resized = image
            .resize_exact(size, size, image::imageops::FilterType::Triangle)
            .to_rgb8();

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;

            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        let outputs = self
            .model
            .run(inputs!["images" => TensorRef::from_array_view(&tensor)?])?;

        let preds = outputs["output0"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()?;
        let protos = outputs["output1"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?;

        let preds = preds.index_axis(Axis(0), 0);
        let protos = protos.index_axis(Axis(0), 0);
        let num_coeffs = protos.shape()[0];
        let num_classes = preds
            .shape()
            .first()
            .and_then(|rows| rows.checked_sub(4 + num_coeffs))
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unexpected prediction shape {:?} for {} mask coefficients",
                    preds.shape(),
                    num_coeffs
                )
            })?;

        let candidates = decode_candidates(preds, num_classes, self.confidence_threshold);
        let kept = non_max_suppression(candidates, self.nms_threshold);
        tracing::debug!("{} instances after nms", kept.len());

        let proto_scale_x = protos.shape()[2] as f32 / size as f32;
        let proto_scale_y = protos.shape()[1] as f32 / size as f32;
        let scale_x = orig_width as f32 / size as f32;
        let scale_y = orig_height as f32 / size as f32;

        let instances = kept
            .into_iter()
            .map(|candidate| {
                let [x1, y1, x2, y2] = candidate.bbox;
                let proto_box = [
                    x1 * proto_scale_x,
                    y1 * proto_scale_y,
                    x2 * proto_scale_x,
                    y2 * proto_scale_y,
                ];
                Instance {
                    class_id: candidate.class_id,
                    confidence: candidate.confidence,
                    bbox: [x1 * scale_x, y1 * scale_y, x2 * scale_x, y2 * scale_y],
                    mask: decode_mask(&candidate.coeffs, protos, proto_box),
                }
            })
            .collect();

        Ok(instances)
    }
}

/// Raw detection before suppression, box in model input pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: [f32; 4],
    pub coeffs: Vec<f32>,
}

/// Decodes a `[4 + classes + coeffs, anchors]` prediction matrix.
pub fn decode_candidates(
    preds: ArrayView2<f32>,
    num_classes: usize,
    confidence_threshold: f32,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for column in preds.columns() {
        let (class_id, confidence) = column
            .iter()
            .skip(4)
            .take(num_classes)
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, score)| {
                if score > best.1 { (i, score) } else { best }
            });

        if confidence < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        candidates.push(Candidate {
            class_id,
            confidence,
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            coeffs: column.iter().skip(4 + num_classes).copied().collect(),
        });
    }

    candidates
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    if ix1 >= ix2 || iy1 >= iy2 {
        return 0.0;
    }

    let intersection = (ix2 - ix1) * (iy2 - iy1);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);

    intersection / (area_a + area_b - intersection)
}

/// Class-aware greedy suppression, highest confidence first.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

/// Combines prototype masks with instance coefficients, crops to the box
/// and binarizes at sigmoid 0.5 (logit 0).
pub fn decode_mask(coeffs: &[f32], protos: ArrayView3<f32>, proto_box: [f32; 4]) -> GrayImage {
    let (mask_h, mask_w) = (protos.shape()[1], protos.shape()[2]);
    let [x1, y1, x2, y2] = proto_box;

    GrayImage::from_fn(mask_w as u32, mask_h as u32, |x, y| {
        let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
        if fx < x1 || fx > x2 || fy < y1 || fy > y2 {
            return Luma([0]);
        }

        let logit: f32 = coeffs
            .iter()
            .enumerate()
            .map(|(k, c)| c * protos[[k, y as usize, x as usize]])
            .sum();

        if logit > 0.0 { Luma([255]) } else { Luma([0]) }
    })
}
