use std::path::{Path, PathBuf};

use quarry_core::error::AppError;
use quarry_core::models::ExtractionResult;
use quarry_core::traits::ResultSink;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends every result as one JSON line to a file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open `path` for appending, creating it when missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                AppError::ConfigError(format!("Cannot open sink {}: {e}", path.display()))
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonlSink {
    async fn record(&self, result: &ExtractionResult) -> Result<(), AppError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');

        // One lock per line keeps concurrent writers from interleaving.
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| AppError::Generic(format!("Write to {} failed: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| AppError::Generic(format!("Flush of {} failed: {e}", self.path.display())))?;
        Ok(())
    }
}
