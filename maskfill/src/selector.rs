use std::collections::HashSet;
use std::path::PathBuf;

use crate::cancel::CancelToken;
use crate::detection::{DetectionRule, ObjectDetector, SourceImage};
use crate::error::{PipelineError, Stage};

/// Outcome of scanning candidates for images that contain the target class.
#[derive(Debug, Default)]
pub struct Selection {
    /// Qualifying images in scan order.
    pub selected: Vec<PathBuf>,
    pub quota: usize,
    pub missing: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, PipelineError)>,
    pub scanned: usize,
    pub cancelled: bool,
}

impl Selection {
    pub fn is_partial(&self) -> bool {
        self.selected.len() < self.quota
    }
}

/// Scans `candidates` in order and keeps the first `quota` images with at
/// least one detection accepted by `rule`. Scanning stops as soon as the
/// quota is met.
pub fn select<D>(
    detector: &mut D,
    candidates: &[PathBuf],
    rule: &DetectionRule,
    quota: usize,
    cancel: &CancelToken,
) -> Selection
where
    D: ObjectDetector + ?Sized,
{
    let mut selection = Selection {
        quota,
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for path in candidates {
        if selection.selected.len() >= quota {
            break;
        }
        if cancel.is_cancelled() {
            tracing::warn!("selection cancelled after {} images", selection.scanned);
            selection.cancelled = true;
            break;
        }
        if !seen.insert(path.clone()) {
            continue;
        }

        let image = match SourceImage::open(path) {
            Ok(image) => image,
            Err(PipelineError::MissingInput(path)) => {
                tracing::debug!("skipping missing candidate {:?}", path);
                selection.missing.push(path);
                continue;
            }
            Err(e) => {
                tracing::warn!("skipping {:?}: {}", path, e);
                selection.failures.push((path.clone(), e));
                continue;
            }
        };
        selection.scanned += 1;

        match detector.detect(&image) {
            Ok(detections) => {
                if detections.iter().any(|d| rule.matches(d)) {
                    tracing::info!("selected {:?}", path);
                    selection.selected.push(path.clone());
                } else {
                    tracing::debug!(
                        "{:?}: none of {} detections qualified",
                        path,
                        detections.len()
                    );
                }
            }
            Err(e) => {
                tracing::warn!("detection failed for {:?}: {:#}", path, e);
                let error = PipelineError::inference(Stage::Detect, e);
                selection.failures.push((path.clone(), error));
            }
        }
    }

    if selection.is_partial() && !selection.cancelled {
        tracing::warn!(
            "partial selection: found {} of {} qualifying images",
            selection.selected.len(),
            quota
        );
    }

    selection
}
