use std::path::{Path, PathBuf};

use image::GenericImageView;

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::detection::{ObjectDetector, SourceImage};
use crate::error::PipelineError;
use crate::filler::{ContentFiller, FillMode, resize_for};
use crate::fusion::{self, FusedMask};
use crate::naming::NamingScheme;
use crate::selector::{self, Selection};
use crate::summary::{RunSummary, SkipReason, Task};

/// Runs the selection, mask generation, removal and substitution tasks over
/// the configured input set.
#[derive(Debug, Clone)]
pub struct PipelineDriver {
    config: PipelineConfig,
    naming: NamingScheme,
    cancel: CancelToken,
}

impl PipelineDriver {
    pub fn new(config: PipelineConfig) -> Self {
        let naming = config.naming();
        Self {
            config,
            naming,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn naming(&self) -> &NamingScheme {
        &self.naming
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// First `quota` candidates with a strict-presence detection of the
    /// target class.
    pub fn select<D>(&self, detector: &mut D) -> Selection
    where
        D: ObjectDetector + ?Sized,
    {
        let _span = tracing::info_span!("select").entered();
        selector::select(
            detector,
            &self.naming.candidates(),
            &self.config.selection_rule(),
            self.config.selection.quota,
            &self.cancel,
        )
    }

    /// Runs the select task and reports it like the other tasks.
    pub fn select_summary<D>(&self, detector: &mut D) -> RunSummary
    where
        D: ObjectDetector + ?Sized,
    {
        let selection = self.select(detector);
        RunSummary::from_selection(Task::Select, self.naming.expected_count, &selection)
    }

    /// Writes a mask artifact for every existing candidate that has at least
    /// one qualifying instance.
    pub fn generate_masks<D>(&self, detector: &mut D) -> RunSummary
    where
        D: ObjectDetector + ?Sized,
    {
        let _span = tracing::info_span!("segment").entered();
        let candidates = self.naming.candidates();
        let rule = self.config.mask_rule();
        let mut summary = RunSummary::new(Task::Segment, candidates.len());

        for path in candidates {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let result = SourceImage::open(&path)
                .and_then(|image| fusion::fuse(&mut *detector, &image, &rule))
                .and_then(|mask| {
                    if mask.is_empty() {
                        tracing::info!("{:?}: target not confidently detected", path);
                        return Err(PipelineError::EmptyMask);
                    }
                    let out = self.naming.mask_path(&path);
                    mask.save(&out)?;
                    Ok(out)
                });
            self.record(&mut summary, path, result);
        }

        summary
    }

    /// Selects images, fuses their masks and fills the masked regions
    /// structurally.
    pub fn remove<D, F>(&self, detector: &mut D, filler: &mut F) -> RunSummary
    where
        D: ObjectDetector + ?Sized,
        F: ContentFiller + ?Sized,
    {
        let selection = self.select(&mut *detector);
        let _span = tracing::info_span!("remove").entered();

        let mut summary =
            RunSummary::from_selection(Task::Remove, self.naming.expected_count, &selection);

        let rule = self.config.removal_rule();
        let mode = FillMode::Structural {
            radius: self.config.structural.radius,
        };

        for path in selection.selected {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let result = SourceImage::open(&path).and_then(|image| {
                let mask = fusion::fuse(&mut *detector, &image, &rule)?;
                if mask.is_empty() {
                    return Err(PipelineError::EmptyMask);
                }
                let filled = filler.fill(&image.pixels, &mask, &mode)?;
                let out = self.naming.removed_path(&path);
                save_rgb(&filled, &out)?;
                Ok(out)
            });
            self.record(&mut summary, path, result);
        }

        summary
    }

    /// Fills previously generated masks with generated content. Requires the
    /// full candidate set to be present and writes nothing otherwise.
    pub fn substitute<F>(&self, filler: &mut F) -> Result<RunSummary, PipelineError>
    where
        F: ContentFiller + ?Sized,
    {
        let _span = tracing::info_span!("substitute").entered();
        let candidates = self.naming.candidates();

        let missing: Vec<PathBuf> = candidates.iter().filter(|p| !p.exists()).cloned().collect();
        if !missing.is_empty() {
            return Err(PipelineError::CountMismatch {
                expected: candidates.len(),
                found: candidates.len() - missing.len(),
                missing,
            });
        }

        let mut summary = RunSummary::new(Task::Substitute, candidates.len());
        let mut pairs = Vec::new();
        for path in candidates {
            if pairs.len() >= self.config.selection.quota {
                break;
            }
            let mask_path = self.naming.mask_path(&path);
            if mask_path.exists() {
                pairs.push((path, mask_path));
            } else {
                tracing::debug!("no mask artifact for {:?}", path);
                summary.skip(path, SkipReason::MissingMask);
            }
        }
        summary.partial_selection = pairs.len() < self.config.selection.quota;
        if summary.partial_selection {
            tracing::warn!(
                "only {} of {} images have masks",
                pairs.len(),
                self.config.selection.quota
            );
        }

        summary.selected = pairs.iter().map(|(path, _)| path.clone()).collect();

        let mode = FillMode::Generative(self.config.generative_params());
        for (path, mask_path) in pairs {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let result = self.substitute_one(filler, &path, &mask_path, &mode);
            self.record(&mut summary, path, result);
        }

        Ok(summary)
    }

    fn substitute_one<F>(
        &self,
        filler: &mut F,
        path: &Path,
        mask_path: &Path,
        mode: &FillMode,
    ) -> Result<PathBuf, PipelineError>
    where
        F: ContentFiller + ?Sized,
    {
        let image = SourceImage::open(path)?;
        let mask = FusedMask::load(mask_path)?;
        if mask.dimensions() != image.dimensions() {
            return Err(PipelineError::DimensionMismatch {
                subject: "mask artifact",
                expected: image.dimensions(),
                actual: mask.dimensions(),
            });
        }
        if mask.is_empty() {
            return Err(PipelineError::EmptyMask);
        }

        let (pixels, mask) = match filler.working_resolution() {
            Some(resolution) => resize_for(&image.pixels, &mask, resolution),
            None => (image.pixels, mask),
        };
        let filled = filler.fill(&pixels, &mask, mode)?;

        let out = self.naming.substituted_path(path);
        save_rgb(&filled, &out)?;
        tracing::debug!("wrote {:?} at {:?}", out, filled.dimensions());
        Ok(out)
    }

    fn record(
        &self,
        summary: &mut RunSummary,
        path: PathBuf,
        result: Result<PathBuf, PipelineError>,
    ) {
        match result {
            Ok(out) => {
                tracing::info!("{:?} -> {:?}", path, out);
                summary.processed.push(out);
            }
            Err(PipelineError::EmptyMask) => {
                tracing::debug!("{:?}: empty mask, skipping", path);
                summary.skip(path, SkipReason::NoQualifyingRegion);
            }
            Err(PipelineError::MissingInput(_)) => {
                summary.skip(path, SkipReason::MissingInput);
            }
            Err(error) => {
                let reason = SkipReason::from(&error);
                tracing::error!("{:?} failed during {}: {}", path, summary.task, reason);
                summary.skip(path, reason);
            }
        }
    }
}

fn save_rgb(image: &image::DynamicImage, path: &Path) -> Result<(), PipelineError> {
    image
        .to_rgb8()
        .save(path)
        .map_err(|source| PipelineError::Persist {
            path: path.to_path_buf(),
            source,
        })
}
