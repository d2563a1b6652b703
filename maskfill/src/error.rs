use std::fmt;
use std::path::PathBuf;

/// Where in the per-image flow a model call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detect,
    Fill,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Detect => write!(f, "detection"),
            Stage::Fill => write!(f, "fill"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("input {0:?} does not exist")]
    MissingInput(PathBuf),

    #[error("failed to decode {path:?}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{subject} is {}x{}, expected {}x{}", .actual.0, .actual.1, .expected.0, .expected.1)]
    DimensionMismatch {
        subject: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("mask has no set pixels")]
    EmptyMask,

    #[error("{0} fill is not supported by this filler")]
    UnsupportedFill(&'static str),

    #[error("{stage} model failed")]
    Inference {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("expected {expected} input images, found {found}")]
    CountMismatch {
        expected: usize,
        found: usize,
        missing: Vec<PathBuf>,
    },

    #[error("failed to write {path:?}")]
    Persist {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn inference(stage: Stage, error: anyhow::Error) -> Self {
        PipelineError::Inference {
            stage,
            source: error.into(),
        }
    }
}
