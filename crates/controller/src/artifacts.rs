//! Run artifact storage
//!
//! Screenshots, annotated frames, and detection JSON for one run, laid
//! out under a per-run directory. Artifact failures are logged and
//! never affect the run outcome, so the save helpers swallow errors
//! into warnings.

use playtest_common::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Per-run artifact directory.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create the run directory tree.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("screenshots")).await?;
        tokio::fs::create_dir_all(root.join("annotated")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save_screenshot(&self, label: &str, png: &[u8]) {
        let path = self.root.join("screenshots").join(format!("{}.png", label));
        if let Err(e) = tokio::fs::write(&path, png).await {
            warn!("Failed to save screenshot {}: {}", path.display(), e);
        }
    }

    pub async fn save_annotation(&self, label: &str, png: &[u8]) {
        let path = self.root.join("annotated").join(format!("{}.png", label));
        if let Err(e) = tokio::fs::write(&path, png).await {
            warn!("Failed to save annotation {}: {}", path.display(), e);
        }
    }

    pub async fn save_detection(&self, label: &str, detection: &serde_json::Value) {
        let path = self.root.join("screenshots").join(format!("{}.json", label));
        match serde_json::to_vec_pretty(detection) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    warn!("Failed to save detection {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("Failed to serialize detection for {}: {}", label, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_layout_and_saves() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::create(dir.path().join("run1")).await.unwrap();

        store.save_screenshot("screenshot_1", b"png").await;
        store.save_annotation("annotated_1", b"png").await;
        store
            .save_detection("screenshot_1", &serde_json::json!({"ok": true}))
            .await;

        assert!(store.root().join("screenshots/screenshot_1.png").exists());
        assert!(store.root().join("annotated/annotated_1.png").exists());
        assert!(store.root().join("screenshots/screenshot_1.json").exists());
    }
}
