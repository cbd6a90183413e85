use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{GrayImage, Luma};
use parking_lot::Mutex;

use crate::config::ClothType;
use crate::errors::{AgnosticMaskError, Result};
use crate::traits::{CheckpointResolver, MaskGenerator, MaskOutput};

/// Deterministic stand-in for the real masker.
///
/// Reads only the image header and returns a mask of the same size whose
/// left half is set. Records every call and can be told to fail on a file.
#[derive(Debug, Default)]
pub struct FakeMaskGenerator {
    calls: Mutex<Vec<(PathBuf, ClothType)>>,
    fail_on: Option<String>,
}

impl FakeMaskGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call whose input file name equals `file_name`.
    pub fn failing_on(file_name: impl Into<String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(file_name.into()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(PathBuf, ClothType)> {
        self.calls.lock().clone()
    }
}

impl MaskGenerator for FakeMaskGenerator {
    fn generate(&self, image_path: &Path, cloth_type: ClothType) -> Result<MaskOutput> {
        self.calls
            .lock()
            .push((image_path.to_path_buf(), cloth_type));

        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.fail_on.as_deref() == Some(file_name.as_str()) {
            return Err(AgnosticMaskError::model_message(
                "fake inference",
                format!("refusing to mask {file_name}"),
            ));
        }

        let (width, height) =
            image::image_dimensions(image_path).map_err(|e| AgnosticMaskError::ImageProcessing {
                path: image_path.display().to_string(),
                operation: "read image header".to_string(),
                source: Box::new(e),
            })?;

        let mask = GrayImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        Ok(MaskOutput { mask })
    }
}

/// Resolver that hands back a fixed directory and counts calls.
#[derive(Debug)]
pub struct FakeCheckpointResolver {
    root: PathBuf,
    calls: AtomicUsize,
}

impl FakeCheckpointResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CheckpointResolver for FakeCheckpointResolver {
    fn resolve(&self, _repo_id: &str) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.root.clone())
    }
}
