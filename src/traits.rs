use crate::config::ClothType;
use crate::errors::Result;
use image::GrayImage;
use std::path::{Path, PathBuf};

/// Output of one mask generation call.
#[derive(Debug, Clone)]
pub struct MaskOutput {
    /// Single-channel mask, 255 where the garment region should be inpainted.
    /// Same dimensions as the input image.
    pub mask: GrayImage,
}

/// Produces agnostic masks from person images.
///
/// The batch driver only depends on this trait, so it can be exercised with
/// a fake that never touches a model.
pub trait MaskGenerator: Send + Sync {
    fn generate(&self, image_path: &Path, cloth_type: ClothType) -> Result<MaskOutput>;
}

/// Turns a repository identifier into a local directory holding the
/// checkpoint bundle.
pub trait CheckpointResolver: Send + Sync {
    /// Must be idempotent: repeated calls with the same id return the same
    /// directory without downloading again.
    fn resolve(&self, repo_id: &str) -> Result<PathBuf>;
}

impl<G: MaskGenerator + ?Sized> MaskGenerator for &G {
    fn generate(&self, image_path: &Path, cloth_type: ClothType) -> Result<MaskOutput> {
        (**self).generate(image_path, cloth_type)
    }
}

impl<G: MaskGenerator + ?Sized> MaskGenerator for Box<G> {
    fn generate(&self, image_path: &Path, cloth_type: ClothType) -> Result<MaskOutput> {
        (**self).generate(image_path, cloth_type)
    }
}
