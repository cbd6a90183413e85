use std::fs;
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::dataset::{Batch, Dataset, WorkItem};
use crate::errors::{AgnosticMaskError, Result};
use crate::traits::MaskGenerator;

/// What to do when the generator fails on one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the whole run on the first failure. Masks already written stay.
    #[default]
    FailFast,
    /// Record the failure and move on to the next image.
    Continue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: Vec<PathBuf>,
}

impl BatchReport {
    /// Turns a report with failures into an error so the process exits
    /// non-zero.
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(AgnosticMaskError::Batch {
                failed: self.failed.len(),
            })
        }
    }
}

/// Walks a dataset and writes one mask per image that does not have one yet.
///
/// Presence of the output file is the only "done" marker; its content is
/// never inspected.
pub struct BatchDriver<G: MaskGenerator> {
    generator: G,
    policy: FailurePolicy,
    show_progress: bool,
}

impl<G: MaskGenerator> BatchDriver<G> {
    pub const fn new(generator: G) -> Self {
        Self {
            generator,
            policy: FailurePolicy::FailFast,
            show_progress: true,
        }
    }

    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub const fn generator(&self) -> &G {
        &self.generator
    }

    pub fn run(&self, dataset: &Dataset) -> Result<BatchReport> {
        dataset.validate()?;
        let batches = dataset.batches()?;

        let mut report = BatchReport::default();
        for batch in &batches {
            fs::create_dir_all(&batch.output_dir).map_err(|e| {
                AgnosticMaskError::file_system(&batch.output_dir, "create output folder", e)
            })?;
            self.process_batch(batch, &mut report)?;
        }

        info!(
            total = report.total,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed.len(),
            "mask generation finished"
        );
        Ok(report)
    }

    fn process_batch(&self, batch: &Batch, report: &mut BatchReport) -> Result<()> {
        info!(batch = %batch.name, images = batch.items.len(), "processing");
        let progress_bar = self.progress_bar(batch)?;

        for item in &batch.items {
            report.total += 1;

            if item.output.exists() {
                debug!(path = %item.output.display(), "mask exists, skipping");
                report.skipped += 1;
                progress_bar.inc(1);
                continue;
            }

            match self.process_item(item) {
                Ok(()) => report.processed += 1,
                Err(e) => match self.policy {
                    FailurePolicy::FailFast => {
                        progress_bar.abandon();
                        return Err(e);
                    }
                    FailurePolicy::Continue => {
                        warn!(path = %item.input.display(), error = %e, "mask generation failed");
                        report.failed.push(item.input.clone());
                    }
                },
            }
            progress_bar.inc(1);
        }

        progress_bar.finish_with_message(format!("{} done", batch.name));
        Ok(())
    }

    /// Generates and stores the mask for a single image, ignoring any
    /// existing output.
    pub fn process_item(&self, item: &WorkItem) -> Result<()> {
        let output = self.generator.generate(&item.input, item.cloth_type)?;
        save_mask(&output.mask, &item.output)
    }

    fn progress_bar(&self, batch: &Batch) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let progress_bar = ProgressBar::new(batch.items.len() as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| AgnosticMaskError::Configuration {
                    message: e.to_string(),
                })?
                .progress_chars("#>-"),
        );
        progress_bar.set_message(format!("Processing {}", batch.name));
        Ok(progress_bar)
    }
}

/// Writes `mask` as PNG to `path` through a `.part` file so a crash never
/// leaves a truncated mask at the final path.
pub fn save_mask(mask: &GrayImage, path: &Path) -> Result<()> {
    let tmp = partial_path(path);

    if let Err(e) = mask.save_with_format(&tmp, ImageFormat::Png) {
        let _ = fs::remove_file(&tmp);
        return Err(AgnosticMaskError::ImageProcessing {
            path: path.display().to_string(),
            operation: "save mask".to_string(),
            source: Box::new(e),
        });
    }

    fs::rename(&tmp, path).map_err(|e| AgnosticMaskError::file_system(path, "move mask into place", e))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}
