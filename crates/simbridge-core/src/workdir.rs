//! Per-request working directories.
//!
//! Layout: `<root>/<purpose>-<request id>/{input.<ext>, outputs/, converted/}`.
//! The directory name never derives from the uploaded file name, so two
//! uploads with the same name cannot collide. Directories are not removed.

use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const OUTPUTS_DIR: &str = "outputs";
pub const CONVERTED_DIR: &str = "converted";
const INPUT_STEM: &str = "input";

/// Exclusively-owned scratch space for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirectory {
    request_id: Uuid,
    root: PathBuf,
}

impl WorkingDirectory {
    /// Create `<base>/<purpose>-<request_id>` and its `outputs/` subdirectory.
    pub async fn create(base: &Path, purpose: &str, request_id: Uuid) -> std::io::Result<Self> {
        let root = base.join(format!("{purpose}-{request_id}"));
        tokio::fs::create_dir_all(root.join(OUTPUTS_DIR)).await?;
        Ok(Self { request_id, root })
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn outputs(&self) -> PathBuf {
        self.root.join(OUTPUTS_DIR)
    }

    pub fn converted(&self) -> PathBuf {
        self.root.join(CONVERTED_DIR)
    }

    /// Whether `path` already lives inside this working directory.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Copy `source` in as `input.<ext>`, keeping the original extension.
    pub async fn stage_input(&self, source: &Path) -> std::io::Result<PathBuf> {
        let name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{INPUT_STEM}.{ext}"),
            None => INPUT_STEM.to_string(),
        };
        let staged = self.root.join(name);
        tokio::fs::copy(source, &staged).await?;
        Ok(staged)
    }
}
