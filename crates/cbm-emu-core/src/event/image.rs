use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::EventError;

/// Maps the file name an image was attached under while recording to the
/// local file that holds its bytes during playback.
#[derive(Debug, Clone, Default)]
pub struct ImageRegistry {
    entries: Vec<(String, PathBuf)>,
    materialized: u32,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every mapping; called when a session starts.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.materialized = 0;
    }

    /// Add a mapping. Returns false, leaving the registry unchanged, when
    /// `original` is already mapped.
    pub fn append(&mut self, original: &str, mapped: impl Into<PathBuf>) -> bool {
        if self.lookup(original).is_some() {
            return false;
        }
        self.entries.push((original.to_string(), mapped.into()));
        true
    }

    pub fn lookup(&self, original: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(name, _)| name == original)
            .map(|(_, path)| path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write embedded image bytes to `dir` as `event-image-<unit>-<n><ext>`
    /// and map `original` to the new file.
    pub fn materialize(
        &mut self,
        dir: &Path,
        unit: u8,
        original: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, EventError> {
        let ext = Path::new(original)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let path = dir.join(format!("event-image-{unit}-{}{ext}", self.materialized));
        fs::write(&path, bytes).map_err(|source| EventError::ImageIo {
            path: path.clone(),
            source,
        })?;
        self.materialized += 1;
        debug!(
            "Event: image '{original}' materialized as {}",
            path.display()
        );
        self.entries.retain(|(name, _)| name != original);
        self.entries.push((original.to_string(), path.clone()));
        Ok(path)
    }
}
