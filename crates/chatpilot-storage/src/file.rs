//! File storage abstraction

use async_trait::async_trait;
use chatpilot_common::config::StorageConfig;
use chatpilot_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Replace a file's content atomically and return its relative path
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Read a file
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Read a file, returning `None` when it does not exist
    async fn read_optional(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if self.exists(path).await? {
            self.read(path).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Move a file to a new relative path, replacing any file already there
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Check if a file exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local filesystem storage rooted at the configured data directory
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance from config
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.data_dir)
    }

    /// Create a new local storage instance from a path
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Base directory of this storage
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a relative path, rejecting anything that escapes the base directory
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(Error::Storage("Empty path".to_string()));
        }

        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') || Path::new(path).is_absolute() {
            return Err(Error::Storage(
                "Absolute paths are not allowed".to_string(),
            ));
        }

        Ok(self.base_path.join(path))
    }

    async fn ensure_parent_exists(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path)?;
        self.ensure_parent_exists(&full_path).await?;

        // Write next to the target, then rename over it
        let mut tmp_name = full_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;

        file.write_all(data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Storage(format!("Failed to flush file: {}", e)))?;
        drop(file);

        fs::rename(&tmp_path, &full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to replace file: {}", e)))?;

        debug!(path = %path, size = data.len(), "Stored file");

        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;

        let data = fs::read(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read file: {}", e)))?;

        debug!(path = %path, size = data.len(), "Read file");

        Ok(data)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;

        fs::remove_file(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete file: {}", e)))?;

        debug!(path = %path, "Deleted file");

        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.full_path(from)?;
        let to_path = self.full_path(to)?;
        self.ensure_parent_exists(&to_path).await?;

        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to rename file: {}", e)))?;

        debug!(from = %from, to = %to, "Renamed file");

        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(&full_path).await.unwrap_or(false))
    }
}

/// Create file storage from configuration
pub fn create_storage(config: &StorageConfig) -> Result<std::sync::Arc<dyn FileStorage>> {
    Ok(std::sync::Arc::new(LocalStorage::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            data_dir: temp_dir.path().to_path_buf(),
        };

        let storage = LocalStorage::new(&config).unwrap();

        let data = b"{\"rules\":[]}";
        let path = storage.store("auto_reply_rules.json", data).await.unwrap();
        assert_eq!(path, "auto_reply_rules.json");

        assert!(storage.exists("auto_reply_rules.json").await.unwrap());
        assert!(!storage.exists("nonexistent.json").await.unwrap());
        // The temporary file never outlives the write
        assert!(!storage.exists("auto_reply_rules.json.tmp").await.unwrap());

        let read_data = storage.read("auto_reply_rules.json").await.unwrap();
        assert_eq!(read_data, data);

        storage.store("auto_reply_rules.json", b"{}").await.unwrap();
        assert_eq!(storage.read("auto_reply_rules.json").await.unwrap(), b"{}");

        storage
            .rename("auto_reply_rules.json", "backup/rules.json")
            .await
            .unwrap();
        assert!(!storage.exists("auto_reply_rules.json").await.unwrap());
        assert_eq!(storage.read("backup/rules.json").await.unwrap(), b"{}");
        storage
            .rename("backup/rules.json", "auto_reply_rules.json")
            .await
            .unwrap();

        storage.delete("auto_reply_rules.json").await.unwrap();
        assert!(!storage.exists("auto_reply_rules.json").await.unwrap());
        assert!(storage
            .read_optional("auto_reply_rules.json")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_path_traversal_prevention() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::from_path(temp_dir.path()).unwrap();

        assert!(storage.store("../../../etc/passwd", b"evil").await.is_err());
        assert!(storage.read("../../../etc/passwd").await.is_err());
        assert!(storage.delete("../../sensitive").await.is_err());
        assert!(storage.exists("../outside").await.is_err());
        assert!(storage.rename("nested.json", "../escaped.json").await.is_err());

        assert!(storage.store("/etc/passwd", b"evil").await.is_err());

        assert!(storage.store("nested/dir/file.json", b"ok").await.is_ok());
    }
}
