use std::path::{Path, PathBuf};

/// How candidate inputs are enumerated and how derived artifacts are named
/// next to them.
#[derive(Debug, Clone, PartialEq)]
pub struct NamingScheme {
    pub dir: PathBuf,
    pub prefix: String,
    pub extension: String,
    pub first_index: usize,
    pub expected_count: usize,
    pub mask_suffix: String,
    pub removed_suffix: String,
    pub substituted_suffix: String,
}

impl NamingScheme {
    pub fn candidate(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.prefix, index, self.extension))
    }

    /// Candidate paths in scan order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        (self.first_index..self.first_index + self.expected_count)
            .map(|i| self.candidate(i))
            .collect()
    }

    pub fn mask_path(&self, source: &Path) -> PathBuf {
        self.derive(source, &self.mask_suffix)
    }

    pub fn removed_path(&self, source: &Path) -> PathBuf {
        self.derive(source, &self.removed_suffix)
    }

    pub fn substituted_path(&self, source: &Path) -> PathBuf {
        self.derive(source, &self.substituted_suffix)
    }

    /// Replaces the configured `.{extension}` with `suffix` when it is the
    /// only extension of the name. Any other name keeps its full file name in
    /// front of the suffix, so `source_for` can recover it. A name with no
    /// extension at all derives the same artifact as `name.{extension}`.
    fn derive(&self, source: &Path, suffix: &str) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = format!(".{}", self.extension);
        let stem = match name.strip_suffix(&ext) {
            Some(stem) if !stem.is_empty() && !stem.contains('.') => stem,
            _ => name.as_str(),
        };
        source.with_file_name(format!("{stem}{suffix}"))
    }

    /// Inverse of the derive functions: the source an artifact was named from.
    pub fn source_for(&self, derived: &Path, suffix: &str) -> Option<PathBuf> {
        let name = derived.file_name()?.to_str()?;
        let stem = name.strip_suffix(suffix)?;
        if stem.is_empty() {
            return None;
        }
        if stem.contains('.') {
            return Some(derived.with_file_name(stem));
        }
        Some(derived.with_file_name(format!("{stem}.{}", self.extension)))
    }
}
