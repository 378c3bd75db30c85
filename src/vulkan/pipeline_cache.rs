use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::{vk, Device};

use crate::{AshError, Result};

/// Pipeline cache shared by every pass pipeline, optionally persisted to disk.
pub struct PipelineCache {
    device: Arc<Device>,
    cache: vk::PipelineCache,
    cache_file: Option<PathBuf>,
}

impl PipelineCache {
    /// Seeds the cache from `cache_file` when it holds data; saves back on drop.
    pub fn with_persistence(device: Arc<Device>, cache_file: Option<PathBuf>) -> Result<Self> {
        let initial_data = cache_file
            .as_deref()
            .and_then(load_cache_data)
            .unwrap_or_default();

        let create_info = if initial_data.is_empty() {
            vk::PipelineCacheCreateInfo::default()
        } else {
            vk::PipelineCacheCreateInfo::default().initial_data(&initial_data)
        };

        let cache = unsafe {
            device
                .create_pipeline_cache(&create_info, None)
                .map_err(|e| AshError::VulkanError(format!("Failed to create pipeline cache: {e}")))?
        };

        Ok(Self {
            device,
            cache,
            cache_file,
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Writes the driver's current blob to the persistence path, if any.
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.cache_file.as_deref() else {
            return Ok(());
        };
        let data = unsafe { self.device.get_pipeline_cache_data(self.cache) }
            .map_err(|e| AshError::VulkanError(format!("Failed to read pipeline cache data: {e}")))?;
        store_cache_data(path, &data)
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            log::warn!("Pipeline cache not persisted: {e}");
        }
        unsafe {
            self.device.destroy_pipeline_cache(self.cache, None);
        }
    }
}

/// Reads a previously saved cache blob. Missing or unreadable files start cold.
pub(crate) fn load_cache_data(path: &Path) -> Option<Vec<u8>> {
    if !path.exists() {
        log::debug!("No existing pipeline cache at: {}", path.display());
        return None;
    }
    match std::fs::read(path) {
        Ok(data) if data.is_empty() => None,
        Ok(data) => {
            log::info!("Loaded pipeline cache from: {}", path.display());
            Some(data)
        }
        Err(e) => {
            log::warn!("Failed to load pipeline cache: {e}");
            None
        }
    }
}

pub(crate) fn store_cache_data(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    log::info!(
        "Saved pipeline cache ({} bytes) to: {}",
        data.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cache_starts_cold() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_cache_data(&dir.path().join("pipelines.bin")).is_none());
    }

    #[test]
    fn saved_cache_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipelines.bin");

        store_cache_data(&path, &[0xCA, 0xFE, 0x01]).unwrap();
        assert_eq!(load_cache_data(&path), Some(vec![0xCA, 0xFE, 0x01]));
    }

    #[test]
    fn empty_cache_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        std::fs::write(&path, b"").unwrap();
        assert!(load_cache_data(&path).is_none());
    }
}
