pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod errors;
pub mod masking;
pub mod model;
pub mod traits;

pub mod mocks;

use tracing::info;

pub use checkpoint::{CheckpointPaths, HubCheckpointResolver};
pub use config::{ClothType, Config, DeviceSelector, Layout};
pub use dataset::Dataset;
pub use driver::{BatchDriver, BatchReport, FailurePolicy};
pub use errors::{AgnosticMaskError, Result};
pub use model::AutoMasker;
pub use traits::*;

/// Full run: validate the dataset, resolve checkpoints, build the generator
/// and walk the images.
///
/// The dataset is validated before the resolver is touched, so a bad
/// `--data_root_path` never triggers a download.
pub fn run_with<R, F, G>(config: &Config, resolver: &R, build_generator: F) -> Result<BatchReport>
where
    R: CheckpointResolver + ?Sized,
    F: FnOnce(&CheckpointPaths, DeviceSelector) -> Result<G>,
    G: MaskGenerator,
{
    let dataset = Dataset::new(&config.data_root_path, config.layout, config.cloth_type);
    dataset.validate()?;

    if config.local_rank != -1 {
        info!(local_rank = config.local_rank, "running with local rank");
    }

    let root = resolver.resolve(&config.repo_path)?;
    let paths = CheckpointPaths::from_root(root)?;
    let generator = build_generator(&paths, config.device)?;

    let policy = if config.continue_on_error {
        FailurePolicy::Continue
    } else {
        FailurePolicy::FailFast
    };

    BatchDriver::new(generator)
        .with_failure_policy(policy)
        .run(&dataset)
}

/// [`run_with`] using the hub resolver and the ONNX masker.
pub fn run(config: &Config) -> Result<BatchReport> {
    run_with(config, &HubCheckpointResolver::new(), AutoMasker::from_checkpoints)
}
