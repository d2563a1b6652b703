use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// SHA-256 of a file's contents as lowercase hex.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let content =
        fs::read(path).with_context(|| format!("Failed to read model file at {:?}", path))?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}

pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_hex(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(anyhow::anyhow!(
            "Checksum mismatch for {:?}: expected {}, got {}",
            path,
            expected,
            actual
        ));
    }
    tracing::debug!("checksum verified for {:?}", path);
    Ok(())
}

/// Validate checksums for files inside a model directory. Every listed file
/// must exist.
pub fn verify_checksums(model_dir: &Path, checksums: &BTreeMap<String, String>) -> Result<()> {
    for (filename, expected_hash) in checksums {
        let filepath = model_dir.join(filename);
        if !filepath.exists() {
            return Err(anyhow::anyhow!("Missing {} in {:?}", filename, model_dir));
        }
        verify_file(&filepath, expected_hash)?;
    }
    Ok(())
}
