use std::collections::HashMap;
use std::path::PathBuf;

use crate::detection::{Detection, ObjectDetector, SourceImage};

/// Memoizes unfiltered detections per image path so selection and fusion
/// do not run the model twice on the same image. Errors are not cached.
#[derive(Debug)]
pub struct CachedDetector<D> {
    inner: D,
    cache: HashMap<PathBuf, Vec<Detection>>,
    hits: usize,
    misses: usize,
}

impl<D: ObjectDetector> CachedDetector<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: ObjectDetector> ObjectDetector for CachedDetector<D> {
    fn detect(&mut self, image: &SourceImage) -> anyhow::Result<Vec<Detection>> {
        if let Some(detections) = self.cache.get(&image.id) {
            self.hits += 1;
            tracing::trace!("detection cache hit for {:?}", image.id);
            return Ok(detections.clone());
        }

        self.misses += 1;
        let detections = self.inner.detect(image)?;
        self.cache.insert(image.id.clone(), detections.clone());
        Ok(detections)
    }
}
