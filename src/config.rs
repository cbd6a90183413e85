use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_REPO: &str = "zhengchong/CatVTON";

/// Environment variable that overrides `--local_rank` when set to anything but -1.
pub const LOCAL_RANK_ENV: &str = "LOCAL_RANK";

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Preprocess agnostic masks for a virtual try-on dataset", long_about = None)]
pub struct Config {
    /// Dataset root containing an `image` folder (or the paired category folders).
    #[arg(long = "data_root_path")]
    pub data_root_path: PathBuf,

    /// Hub repository id or local directory holding `DensePose` and `SCHP`.
    #[arg(long = "repo_path", default_value = DEFAULT_REPO)]
    pub repo_path: String,

    /// Compute device: `cpu`, `cuda` or `cuda:<id>`.
    #[arg(long, default_value = "cuda")]
    pub device: DeviceSelector,

    /// Garment region to mask in the flat layout.
    #[arg(long = "cloth_type", value_enum, default_value_t = ClothType::Upper)]
    pub cloth_type: ClothType,

    #[arg(long, value_enum, default_value_t = Layout::Flat)]
    pub layout: Layout,

    /// Log per-image failures and keep going instead of aborting the batch.
    #[arg(long = "continue_on_error")]
    pub continue_on_error: bool,

    #[arg(long = "local_rank", default_value_t = -1, allow_negative_numbers = true)]
    pub local_rank: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        let mut config = Self::parse();
        config.apply_env_overrides(std::env::var(LOCAL_RANK_ENV).ok().as_deref());
        config
    }

    /// `LOCAL_RANK` wins over the flag unless it is unset, unparsable or -1.
    pub fn apply_env_overrides(&mut self, local_rank: Option<&str>) {
        let env_rank = local_rank
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(-1);
        if env_rank != -1 && env_rank != self.local_rank {
            self.local_rank = env_rank;
        }
    }
}

/// Which dataset layout to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Layout {
    /// `<root>/image/*` → `<root>/agnostic_masks/*.png`
    Flat,
    /// DressCode-style category folders with `test_pairs_paired.txt`.
    Paired,
}

/// Garment region the agnostic mask should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ClothType {
    Upper,
    Lower,
    Overall,
    Inner,
    Outer,
}

impl ClothType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Overall => "overall",
            Self::Inner => "inner",
            Self::Outer => "outer",
        }
    }
}

impl fmt::Display for ClothType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device on which inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    Cpu,
    Cuda(i32),
}

impl FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            _ => {
                let id = s
                    .strip_prefix("cuda:")
                    .ok_or_else(|| format!("unsupported device {s:?} (expected cpu, cuda or cuda:<id>)"))?;
                id.parse::<i32>()
                    .ok()
                    .filter(|id| *id >= 0)
                    .map(Self::Cuda)
                    .ok_or_else(|| format!("invalid CUDA device id {id:?}"))
            }
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}
