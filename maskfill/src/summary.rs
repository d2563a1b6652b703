use std::fmt;
use std::path::PathBuf;

use crate::error::{PipelineError, Stage};
use crate::selector::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Select,
    Segment,
    Remove,
    Substitute,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::Select => "select",
            Task::Segment => "segment",
            Task::Remove => "remove",
            Task::Substitute => "substitute",
        };
        f.write_str(name)
    }
}

/// Why an image produced no output.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingInput,
    Unreadable(String),
    NoQualifyingRegion,
    MissingMask,
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    InferenceFailure {
        stage: Stage,
        message: String,
    },
    PersistFailure(String),
    Other(String),
}

impl From<&PipelineError> for SkipReason {
    fn from(error: &PipelineError) -> Self {
        match error {
            PipelineError::MissingInput(_) => SkipReason::MissingInput,
            PipelineError::UnreadableImage { source, .. } => {
                SkipReason::Unreadable(source.to_string())
            }
            PipelineError::EmptyMask => SkipReason::NoQualifyingRegion,
            PipelineError::DimensionMismatch {
                expected, actual, ..
            } => SkipReason::DimensionMismatch {
                expected: *expected,
                actual: *actual,
            },
            PipelineError::Inference { stage, source } => SkipReason::InferenceFailure {
                stage: *stage,
                message: source.to_string(),
            },
            PipelineError::Persist { path, source } => {
                SkipReason::PersistFailure(format!("{path:?}: {source}"))
            }
            other => SkipReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingInput => write!(f, "input missing"),
            SkipReason::Unreadable(msg) => write!(f, "unreadable: {msg}"),
            SkipReason::NoQualifyingRegion => write!(f, "no qualifying region"),
            SkipReason::MissingMask => write!(f, "mask artifact missing"),
            SkipReason::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: {}x{} vs {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            SkipReason::InferenceFailure { stage, message } => {
                write!(f, "{stage} failed: {message}")
            }
            SkipReason::PersistFailure(msg) => write!(f, "write failed: {msg}"),
            SkipReason::Other(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub task: Task,
    pub candidates: usize,
    pub selected: Vec<PathBuf>,
    /// Outputs written, in processing order.
    pub processed: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    pub partial_selection: bool,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(task: Task, candidates: usize) -> Self {
        Self {
            task,
            candidates,
            selected: Vec::new(),
            processed: Vec::new(),
            skipped: Vec::new(),
            partial_selection: false,
            cancelled: false,
        }
    }

    /// Summary seeded from a selection scan: the selected images, the flags,
    /// and a skip entry for every missing or failed candidate.
    pub fn from_selection(task: Task, candidates: usize, selection: &Selection) -> Self {
        let mut summary = Self::new(task, candidates);
        summary.selected = selection.selected.clone();
        summary.partial_selection = selection.is_partial() && !selection.cancelled;
        summary.cancelled = selection.cancelled;
        for path in &selection.missing {
            summary.skip(path.clone(), SkipReason::MissingInput);
        }
        for (path, error) in &selection.failures {
            summary.skip(path.clone(), SkipReason::from(error));
        }
        summary
    }

    pub fn skip(&mut self, path: PathBuf, reason: SkipReason) {
        self.skipped.push((path, reason));
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} candidates, {} selected, {} written, {} skipped",
            self.task,
            self.candidates,
            self.selected.len(),
            self.processed.len(),
            self.skipped.len()
        )?;
        if self.partial_selection {
            write!(f, " (partial selection)")?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        for (path, reason) in &self.skipped {
            write!(f, "\n  skipped {}: {}", path.display(), reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_from_error() {
        let reason = SkipReason::from(&PipelineError::EmptyMask);
        assert_eq!(reason, SkipReason::NoQualifyingRegion);

        let error = PipelineError::inference(Stage::Fill, anyhow::anyhow!("oom"));
        assert_eq!(
            SkipReason::from(&error),
            SkipReason::InferenceFailure {
                stage: Stage::Fill,
                message: "oom".to_string()
            }
        );
    }

    #[test]
    fn test_display() {
        let mut summary = RunSummary::new(Task::Remove, 20);
        summary.selected.push(PathBuf::from("a.jpg"));
        summary.partial_selection = true;
        summary.skip(PathBuf::from("a.jpg"), SkipReason::NoQualifyingRegion);

        assert_eq!(
            summary.to_string(),
            "remove: 20 candidates, 1 selected, 0 written, 1 skipped (partial selection)\n  skipped a.jpg: no qualifying region"
        );
    }
}
