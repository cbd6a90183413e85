use std::path::{Path, PathBuf};

use hf_hub::api::sync::{Api, ApiBuilder};
use tracing::{debug, info};

use crate::errors::{AgnosticMaskError, Result};
use crate::traits::CheckpointResolver;

/// Folder holding the dense part segmentation weights.
pub const DENSEPOSE_DIR: &str = "DensePose";
/// Folder holding the human parsing (ATR + LIP) weights.
pub const SCHP_DIR: &str = "SCHP";

/// Local locations of the two checkpoint folders the masker needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub root: PathBuf,
    pub densepose: PathBuf,
    pub schp: PathBuf,
}

impl CheckpointPaths {
    pub fn from_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let densepose = root.join(DENSEPOSE_DIR);
        let schp = root.join(SCHP_DIR);

        for dir in [&densepose, &schp] {
            if !dir.is_dir() {
                return Err(AgnosticMaskError::missing(dir, "checkpoint folder"));
            }
        }

        Ok(Self {
            root,
            densepose,
            schp,
        })
    }
}

/// Resolves checkpoints from a local directory or the Hugging Face hub.
///
/// Hub downloads land in the standard hub cache (`HF_HOME`), so a second run
/// with the same repository id reads straight from disk.
#[derive(Debug, Clone)]
pub struct HubCheckpointResolver {
    show_progress: bool,
}

impl Default for HubCheckpointResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HubCheckpointResolver {
    pub const fn new() -> Self {
        Self {
            show_progress: true,
        }
    }

    pub const fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn api(&self, repo_id: &str) -> Result<Api> {
        ApiBuilder::new()
            .with_progress(self.show_progress)
            .build()
            .map_err(|e| resolution_error(repo_id, e))
    }

    fn download(&self, repo_id: &str) -> Result<PathBuf> {
        let api = self.api(repo_id)?;
        let repo = api.model(repo_id.to_string());
        let repo_info = repo.info().map_err(|e| resolution_error(repo_id, e))?;

        let files: Vec<String> = repo_info
            .siblings
            .into_iter()
            .map(|s| s.rfilename)
            .filter(|name| is_checkpoint_file(name))
            .collect();

        if files.is_empty() {
            return Err(AgnosticMaskError::Resolution {
                repo: repo_id.to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("repository has no {DENSEPOSE_DIR}/ or {SCHP_DIR}/ files"),
                )),
            });
        }

        info!(repo = repo_id, files = files.len(), "resolving checkpoints from hub");

        let mut root = None;
        for file in &files {
            let local = repo.get(file).map_err(|e| resolution_error(repo_id, e))?;
            debug!(file = %file, path = %local.display(), "checkpoint file ready");
            if root.is_none() {
                root = snapshot_root(&local, file);
            }
        }

        root.ok_or_else(|| AgnosticMaskError::Resolution {
            repo: repo_id.to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unable to locate snapshot directory in hub cache",
            )),
        })
    }
}

impl CheckpointResolver for HubCheckpointResolver {
    fn resolve(&self, repo_id: &str) -> Result<PathBuf> {
        let local = Path::new(repo_id);
        let root = if local.is_dir() {
            info!(path = %local.display(), "using local checkpoint directory");
            local.to_path_buf()
        } else {
            self.download(repo_id)?
        };

        CheckpointPaths::from_root(&root)?;
        Ok(root)
    }
}

fn resolution_error(repo_id: &str, err: hf_hub::api::sync::ApiError) -> AgnosticMaskError {
    AgnosticMaskError::Resolution {
        repo: repo_id.to_string(),
        source: Box::new(err),
    }
}

/// Only the two folders the masker reads are fetched; the rest of the
/// repository (diffusion weights and so on) is left alone.
fn is_checkpoint_file(rfilename: &str) -> bool {
    [DENSEPOSE_DIR, SCHP_DIR]
        .iter()
        .any(|dir| rfilename.starts_with(&format!("{dir}/")))
}

/// Strips the repository-relative file name off a cached file path to get
/// the snapshot directory it lives in.
fn snapshot_root(local_file: &Path, rfilename: &str) -> Option<PathBuf> {
    let depth = Path::new(rfilename).components().count();
    local_file.ancestors().nth(depth).map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_file_filter() {
        assert!(is_checkpoint_file("DensePose/model_final_162be9.pkl"));
        assert!(is_checkpoint_file("SCHP/exp-schp-201908301523-atr.pth"));
        assert!(!is_checkpoint_file("mix-48k-1024/attention/model.safetensors"));
        assert!(!is_checkpoint_file("DensePoseExtra/file"));
        assert!(!is_checkpoint_file("README.md"));
    }

    #[test]
    fn test_snapshot_root() {
        let cached = Path::new("/cache/models--zhengchong--CatVTON/snapshots/abc/SCHP/lip.onnx");
        assert_eq!(
            snapshot_root(cached, "SCHP/lip.onnx"),
            Some(PathBuf::from("/cache/models--zhengchong--CatVTON/snapshots/abc"))
        );
    }

    #[test]
    fn test_checkpoint_paths_require_both_folders() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join(DENSEPOSE_DIR))?;

        assert!(CheckpointPaths::from_root(temp_dir.path()).is_err());

        fs::create_dir_all(temp_dir.path().join(SCHP_DIR))?;
        let paths = CheckpointPaths::from_root(temp_dir.path())?;
        assert_eq!(paths.densepose, temp_dir.path().join(DENSEPOSE_DIR));
        assert_eq!(paths.schp, temp_dir.path().join(SCHP_DIR));
        Ok(())
    }

    #[test]
    fn test_local_directory_resolves_without_network() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join(DENSEPOSE_DIR))?;
        fs::create_dir_all(temp_dir.path().join(SCHP_DIR))?;

        let repo = temp_dir.path().to_string_lossy().to_string();
        let resolver = HubCheckpointResolver::new().with_progress(false);
        let first = resolver.resolve(&repo)?;
        let second = resolver.resolve(&repo)?;
        assert_eq!(first, temp_dir.path());
        assert_eq!(first, second);
        Ok(())
    }
}
