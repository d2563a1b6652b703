use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::detection::DetectionRule;
use crate::error::PipelineError;
use crate::filler::GenerativeParams;
use crate::naming::NamingScheme;

/// Every option the pipeline recognizes. Unknown keys in a config file are
/// rejected; missing keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub naming: NamingConfig,
    pub detection: DetectionConfig,
    pub selection: SelectionConfig,
    pub structural: StructuralConfig,
    pub generative: GenerativeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub extension: String,
    pub first_index: usize,
    pub expected_count: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "origIm".to_string(),
            extension: "jpg".to_string(),
            first_index: 1,
            expected_count: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConfig {
    pub mask_suffix: String,
    pub removed_suffix: String,
    pub substituted_suffix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            mask_suffix: "_mask.png".to_string(),
            removed_suffix: "-birdsRemoved.jpg".to_string(),
            substituted_suffix: "-NowWithSquirrels.jpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    /// COCO class 14 is "bird".
    pub target_class: usize,
    /// Gate for the strict-presence rule used by selection.
    pub selection_threshold: f32,
    /// Presence-only rule used when fusing masks for removal.
    pub removal_threshold: f32,
    /// Presence-only rule used when writing mask artifacts.
    pub mask_threshold: f32,
    /// Detector-side score floor applied before any rule.
    pub confidence_floor: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub cache_detections: bool,
    pub model: DetectorModel,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            target_class: 14,
            selection_threshold: 0.8,
            removal_threshold: 0.5,
            mask_threshold: 0.7,
            confidence_floor: 0.25,
            iou_threshold: 0.7,
            input_size: yolo_seg::DEFAULT_INPUT_SIZE,
            cache_detections: true,
            model: DetectorModel::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DetectorModel {
    Hub {
        repo: String,
        file: String,
    },
    Local {
        path: PathBuf,
        #[serde(default)]
        sha256: Option<String>,
    },
}

impl Default for DetectorModel {
    fn default() -> Self {
        DetectorModel::Hub {
            repo: yolo_seg::DEFAULT_REPO.to_string(),
            file: yolo_seg::DEFAULT_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    pub quota: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { quota: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StructuralConfig {
    pub radius: u32,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        Self { radius: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerativeConfig {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub seed: u64,
    pub steps: usize,
    pub guidance_scale: f32,
    pub resolution: u32,
    pub model: DiffusionModel,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            prompt: "a realistic squirrel or chipmunk sitting on a tree branch or near a bird feeder"
                .to_string(),
            negative_prompt: None,
            seed: 42,
            steps: 50,
            guidance_scale: 7.5,
            resolution: sd_inpaint::WORKING_RESOLUTION,
            model: DiffusionModel::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DiffusionModel {
    Hub {
        repo: String,
        revision: String,
        tokenizer_repo: String,
    },
    Local {
        dir: PathBuf,
        /// Relative file name -> expected sha256 hex digest.
        #[serde(default)]
        checksums: BTreeMap<String, String>,
    },
}

impl Default for DiffusionModel {
    fn default() -> Self {
        DiffusionModel::Hub {
            repo: sd_inpaint::DEFAULT_REPO.to_string(),
            revision: sd_inpaint::DEFAULT_REVISION.to_string(),
            tokenizer_repo: sd_inpaint::DEFAULT_TOKENIZER_REPO.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open config file at {:?}", path))?;

        let config: Self = serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse config file at {:?}", path))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |message: String| Err(PipelineError::InvalidConfig(message));
        let d = &self.detection;

        for (name, value) in [
            ("selection_threshold", d.selection_threshold),
            ("removal_threshold", d.removal_threshold),
            ("mask_threshold", d.mask_threshold),
            ("confidence_floor", d.confidence_floor),
            ("iou_threshold", d.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("detection.{name} must be within [0, 1], got {value}"));
            }
        }

        let lowest_rule = d
            .selection_threshold
            .min(d.removal_threshold)
            .min(d.mask_threshold);
        if d.confidence_floor > lowest_rule {
            return invalid(format!(
                "detection.confidence_floor {} is above a rule threshold {}",
                d.confidence_floor, lowest_rule
            ));
        }
        if d.input_size == 0 {
            return invalid("detection.input_size must be positive".to_string());
        }
        if self.structural.radius == 0 {
            return invalid("structural.radius must be at least 1".to_string());
        }
        if self.generative.steps == 0 {
            return invalid("generative.steps must be at least 1".to_string());
        }
        if self.generative.resolution == 0 {
            return invalid("generative.resolution must be positive".to_string());
        }
        if self.input.extension.is_empty() || self.input.prefix.is_empty() {
            return invalid("input.prefix and input.extension must not be empty".to_string());
        }

        let n = &self.naming;
        for (name, suffix) in [
            ("mask_suffix", &n.mask_suffix),
            ("removed_suffix", &n.removed_suffix),
            ("substituted_suffix", &n.substituted_suffix),
        ] {
            if suffix.is_empty() {
                return invalid(format!("naming.{name} must not be empty"));
            }
        }
        if n.mask_suffix == n.removed_suffix
            || n.mask_suffix == n.substituted_suffix
            || n.removed_suffix == n.substituted_suffix
        {
            return invalid("naming suffixes must be distinct".to_string());
        }

        Ok(())
    }

    pub fn naming(&self) -> NamingScheme {
        NamingScheme {
            dir: self.input.dir.clone(),
            prefix: self.input.prefix.clone(),
            extension: self.input.extension.clone(),
            first_index: self.input.first_index,
            expected_count: self.input.expected_count,
            mask_suffix: self.naming.mask_suffix.clone(),
            removed_suffix: self.naming.removed_suffix.clone(),
            substituted_suffix: self.naming.substituted_suffix.clone(),
        }
    }

    pub fn selection_rule(&self) -> DetectionRule {
        DetectionRule::new(self.detection.target_class, self.detection.selection_threshold)
    }

    pub fn removal_rule(&self) -> DetectionRule {
        DetectionRule::new(self.detection.target_class, self.detection.removal_threshold)
    }

    pub fn mask_rule(&self) -> DetectionRule {
        DetectionRule::new(self.detection.target_class, self.detection.mask_threshold)
    }

    pub fn generative_params(&self) -> GenerativeParams {
        let g = &self.generative;
        GenerativeParams {
            prompt: g.prompt.clone(),
            negative_prompt: g.negative_prompt.clone(),
            seed: g.seed,
            steps: g.steps,
            guidance_scale: g.guidance_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "selection": { "quota": 3 }, "detection": { "selection_threshold": 0.9 } }"#,
        )
        .unwrap();

        assert_eq!(config.selection.quota, 3);
        assert_eq!(config.detection.selection_threshold, 0.9);
        assert_eq!(config.detection.removal_threshold, 0.5);
        assert_eq!(config.input.expected_count, 20);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let parsed = serde_json::from_str::<PipelineConfig>(r#"{ "selection": { "qouta": 3 } }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_local_model_source() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "detection": { "model": { "kind": "local", "path": "models/seg.onnx" } } }"#,
        )
        .unwrap();

        assert_eq!(
            config.detection.model,
            DetectorModel::Local {
                path: PathBuf::from("models/seg.onnx"),
                sha256: None
            }
        );
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = PipelineConfig::default();
        config.detection.mask_threshold = 1.5;

        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_floor_above_rule_rejected() {
        let mut config = PipelineConfig::default();
        config.detection.confidence_floor = 0.6;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rules_use_independent_thresholds() {
        let config = PipelineConfig::default();

        assert_eq!(config.selection_rule().min_confidence, 0.8);
        assert_eq!(config.removal_rule().min_confidence, 0.5);
        assert_eq!(config.mask_rule().min_confidence, 0.7);
        assert_eq!(config.selection_rule().target_class, 14);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "structural": { "radius": 5 } }"#).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.structural.radius, 5);

        std::fs::write(&path, r#"{ "structural": { "radius": 0 } }"#).unwrap();
        assert!(PipelineConfig::from_file(&path).is_err());
    }
}
