use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use image::{imageops, imageops::FilterType, GrayImage, Luma, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::{builder::SessionBuilder, Session};
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::info;

use crate::checkpoint::CheckpointPaths;
use crate::config::{ClothType, DeviceSelector};
use crate::errors::{AgnosticMaskError, Result};
use crate::masking::{agnostic_mask, ParsingMaps};
use crate::traits::{MaskGenerator, MaskOutput};

/// Used when an export has a dynamic spatial axis.
pub const DEFAULT_INPUT_SIZE: u32 = 512;

/// Per-channel input normalisation, `(v / 255 - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Feed channels in BGR order.
    pub bgr: bool,
}

/// Detectron2 pixel statistics (BGR, 0-255 scale, unit std).
pub const DENSEPOSE_NORMALIZATION: Normalization = Normalization {
    mean: [103.53 / 255.0, 116.28 / 255.0, 123.675 / 255.0],
    std: [1.0 / 255.0, 1.0 / 255.0, 1.0 / 255.0],
    bgr: true,
};

/// ImageNet statistics in BGR order, as the parsing networks were trained.
pub const SCHP_NORMALIZATION: Normalization = Normalization {
    mean: [0.406, 0.456, 0.485],
    std: [0.225, 0.224, 0.229],
    bgr: true,
};

fn model_err<E: Display>(operation: impl Into<String>) -> impl FnOnce(E) -> AgnosticMaskError {
    let operation = operation.into();
    move |e| AgnosticMaskError::model_message(operation, e.to_string())
}

/// One ONNX network that maps an RGB image to a per-pixel label map.
pub struct LabelModel {
    pub input_size: u32,
    input_name: String,
    output_name: String,
    normalization: Normalization,
    session: Mutex<Session>,
}

impl LabelModel {
    pub fn new(
        model_path: &Path,
        device: DeviceSelector,
        normalization: Normalization,
    ) -> Result<Self> {
        let builder = SessionBuilder::new().map_err(model_err("session builder init"))?;
        let builder = match device {
            DeviceSelector::Cpu => builder,
            DeviceSelector::Cuda(device_id) => builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .map_err(model_err("execution provider setup"))?,
        };
        let mut session = builder
            .with_memory_pattern(true)
            .map_err(model_err("memory pattern setup"))?
            .commit_from_file(model_path)
            .map_err(model_err(format!("load model {}", model_path.display())))?;

        let input = session.inputs.first().ok_or_else(|| {
            AgnosticMaskError::model_message("inspect model inputs", "model has no inputs")
        })?;
        let input_name = input.name.clone();
        let input_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|size| *size > 0)
            .map(|size| size as u32)
            .unwrap_or(DEFAULT_INPUT_SIZE);
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| {
                AgnosticMaskError::model_message("inspect model outputs", "model has no outputs")
            })?;

        // warm up
        let data = Array4::<f32>::zeros((1, 3, input_size as usize, input_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data).map_err(model_err("warmup tensor"))?])
            .map_err(model_err("warmup run"))?;

        Ok(Self {
            input_size,
            input_name,
            output_name,
            normalization,
            session: Mutex::new(session),
        })
    }

    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let value = &outputs[self.output_name.as_str()];
        match value.try_extract_array::<f32>() {
            Ok(array) => Ok(array.to_owned()),
            Err(_) => Ok(value.try_extract_array::<i64>()?.mapv(|v| v as f32)),
        }
    }

    /// Label map at the resolution of `image`.
    pub fn label_map(&self, image: &RgbImage) -> Result<GrayImage> {
        let (tensor, crop) = preprocess(image, self.input_size, &self.normalization)?;
        let output = self.predict(tensor.view())?;
        let labels = labels_from_output(output.view())?;
        Ok(postprocess_labels(
            &labels,
            self.input_size,
            crop,
            image.width(),
            image.height(),
        ))
    }
}

/// Letterboxes `image` into an `input_size` square and returns the NCHW
/// tensor with the `[x, y, w, h]` placement of the resized image.
pub fn preprocess(
    image: &RgbImage,
    input_size: u32,
    normalization: &Normalization,
) -> Result<(Array4<f32>, [u32; 4])> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(AgnosticMaskError::Validation {
            field: "image".to_string(),
            reason: "has zero width or height".to_string(),
        });
    }

    let scale = input_size as f32 / width.max(height) as f32;
    let w = ((width as f32 * scale).round() as u32).clamp(1, input_size);
    let h = ((height as f32 * scale).round() as u32).clamp(1, input_size);
    let resized = imageops::resize(image, w, h, FilterType::Lanczos3);

    let (x, y) = ((input_size - w) / 2, (input_size - h) / 2);
    let mut canvas = RgbImage::new(input_size, input_size);
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);

    let pixels = canvas.as_ndarray3();
    let size = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for c in 0..3 {
        let source = if normalization.bgr { 2 - c } else { c };
        let (mean, std) = (normalization.mean[c], normalization.std[c]);
        tensor
            .slice_mut(s![0, c, .., ..])
            .assign(&pixels.slice(s![source, .., ..]).mapv(|v| (v as f32 / 255.0 - mean) / std));
    }

    Ok((tensor, [x, y, w, h]))
}

/// Accepts class scores `[1, C, H, W]` (arg-maxed), or labels as
/// `[1, 1, H, W]` / `[1, H, W]`.
pub fn labels_from_output(output: ArrayViewD<f32>) -> Result<GrayImage> {
    let shape = output.shape().to_vec();
    let labels = match shape.as_slice() {
        [1, 1, h, w] => label_values(output.into_shape_with_order((*h, *w))?),
        [1, h, w] => label_values(output.into_shape_with_order((*h, *w))?),
        [1, c, h, w] if *c > 1 => argmax(output.into_shape_with_order((*c, *h, *w))?),
        _ => {
            return Err(AgnosticMaskError::model_message(
                "read model output",
                format!("unexpected output shape {shape:?}"),
            ))
        }
    };
    Ok(labels)
}

fn label_values(labels: ArrayView2<f32>) -> GrayImage {
    let (h, w) = labels.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([labels[[y as usize, x as usize]].round().clamp(0.0, 255.0) as u8])
    })
}

fn argmax(scores: ArrayView3<f32>) -> GrayImage {
    let (c, h, w) = scores.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        // first maximum wins on ties
        let mut best = 0;
        for k in 1..c {
            if scores[[k, y, x]] > scores[[best, y, x]] {
                best = k;
            }
        }
        Luma([best.min(u8::MAX as usize) as u8])
    })
}

/// Undoes the letterbox of `preprocess`, scaling the crop when the network
/// emits labels at a different resolution than its input.
pub fn postprocess_labels(
    labels: &GrayImage,
    input_size: u32,
    crop: [u32; 4],
    width: u32,
    height: u32,
) -> GrayImage {
    let (lw, lh) = labels.dimensions();
    let sx = lw as f32 / input_size as f32;
    let sy = lh as f32 / input_size as f32;
    let [x, y, w, h] = crop;

    let cx = ((x as f32 * sx).round() as u32).min(lw.saturating_sub(1));
    let cy = ((y as f32 * sy).round() as u32).min(lh.saturating_sub(1));
    let cw = ((w as f32 * sx).round() as u32).clamp(1, lw - cx);
    let ch = ((h as f32 * sy).round() as u32).clamp(1, lh - cy);

    let cropped = imageops::crop_imm(labels, cx, cy, cw, ch).to_image();
    imageops::resize(&cropped, width, height, FilterType::Nearest)
}

/// First `*.onnx` file in `dir` (sorted by name) whose lowercase name
/// contains `keyword`, or any `*.onnx` when no keyword is given.
pub fn find_onnx_model(dir: &Path, keyword: Option<&str>) -> Result<PathBuf> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AgnosticMaskError::file_system(dir, "list checkpoint folder", e))?;

    let paths = entries
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| AgnosticMaskError::file_system(dir, "list checkpoint folder", e))?;

    let mut candidates: Vec<PathBuf> = paths
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            name.ends_with(".onnx") && keyword.map_or(true, |k| name.contains(k))
        })
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        let what = match keyword {
            Some(k) => format!("ONNX export matching {k:?}"),
            None => "ONNX export".to_string(),
        };
        AgnosticMaskError::missing(dir, &what)
    })
}

/// Dense part segmentation plus ATR and LIP human parsing, combined into
/// an agnostic mask.
pub struct AutoMasker {
    densepose: LabelModel,
    atr: LabelModel,
    lip: LabelModel,
}

impl AutoMasker {
    pub fn new(densepose_ckpt: &Path, schp_ckpt: &Path, device: DeviceSelector) -> Result<Self> {
        let densepose_path = find_onnx_model(densepose_ckpt, None)?;
        let atr_path = find_onnx_model(schp_ckpt, Some("atr"))?;
        let lip_path = find_onnx_model(schp_ckpt, Some("lip"))?;

        info!(
            densepose = %densepose_path.display(),
            atr = %atr_path.display(),
            lip = %lip_path.display(),
            %device,
            "loading masking models"
        );

        Ok(Self {
            densepose: LabelModel::new(&densepose_path, device, DENSEPOSE_NORMALIZATION)?,
            atr: LabelModel::new(&atr_path, device, SCHP_NORMALIZATION)?,
            lip: LabelModel::new(&lip_path, device, SCHP_NORMALIZATION)?,
        })
    }

    pub fn from_checkpoints(paths: &CheckpointPaths, device: DeviceSelector) -> Result<Self> {
        Self::new(&paths.densepose, &paths.schp, device)
    }

    pub fn parse(&self, image: &RgbImage) -> Result<ParsingMaps> {
        Ok(ParsingMaps {
            densepose: self.densepose.label_map(image)?,
            atr: self.atr.label_map(image)?,
            lip: self.lip.label_map(image)?,
        })
    }
}

impl MaskGenerator for AutoMasker {
    fn generate(&self, image_path: &Path, cloth_type: ClothType) -> Result<MaskOutput> {
        let image = image::open(image_path)
            .map_err(|e| AgnosticMaskError::ImageProcessing {
                path: image_path.display().to_string(),
                operation: "open image".to_string(),
                source: Box::new(e),
            })?
            .to_rgb8();

        let maps = self.parse(&image)?;
        let mask = agnostic_mask(&maps, cloth_type)?;
        Ok(MaskOutput { mask })
    }
}
