use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Policy for the adaptive two-sample comparison.
///
/// These thresholds decide whether Welch's t-test or the Mann-Whitney U test
/// runs, so they live here rather than inside the test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoSampleConfig {
    /// Below this many observations in either group the comparison is refused.
    pub min_observations: usize,
    /// Both groups need at least this many observations for the t-test.
    pub min_parametric_n: usize,
    /// A Shapiro-Wilk p-value above this counts as "normal".
    pub normality_alpha: f64,
    /// Larger samples are subsampled before the normality check.
    pub normality_max_sample: usize,
    pub subsample_seed: u64,
}

impl Default for TwoSampleConfig {
    fn default() -> Self {
        Self {
            min_observations: 5,
            min_parametric_n: 30,
            normality_alpha: 0.05,
            normality_max_sample: 5_000,
            subsample_seed: 42,
        }
    }
}

/// Image sizes in pixels (figure inches × 100 dpi) and plot limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub missing_size: (u32, u32),
    pub correlation_size: (u32, u32),
    pub distribution_size: (u32, u32),
    pub categorical_size: (u32, u32),
    pub categorical_top_n: usize,
    pub max_bins: usize,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            missing_size: (1200, 600),
            correlation_size: (1200, 800),
            distribution_size: (800, 400),
            categorical_size: (800, 400),
            categorical_top_n: 20,
            max_bins: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub raw_data_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    /// Minimum group size for aggregation, chi-square and Kruskal-Wallis.
    pub min_count: usize,
    /// Significance threshold used when interpreting p-values.
    pub alpha: f64,
    pub two_sample: TwoSampleConfig,
    pub plot: PlotConfig,
}

impl AnalysisConfig {
    pub fn canonical() -> Self {
        Self {
            raw_data_dir: PathBuf::from(crate::io::RAW_DATA_PATH),
            processed_data_dir: PathBuf::from(crate::io::PROCESSED_DATA_PATH),
            min_count: 30,
            alpha: 0.05,
            two_sample: TwoSampleConfig::default(),
            plot: PlotConfig::default(),
        }
    }

    /// Load overrides from a JSON file; absent keys keep their canonical value.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config = serde_json::from_reader(reader)?;
        log::debug!("loaded analysis config from {}", path.as_ref().display());
        Ok(config)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_thresholds() {
        let config = AnalysisConfig::canonical();
        assert_eq!(config.min_count, 30);
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.two_sample.min_observations, 5);
        assert_eq!(config.two_sample.min_parametric_n, 30);
        assert_eq!(config.two_sample.normality_max_sample, 5_000);
        assert_eq!(config.plot.categorical_top_n, 20);
        assert_eq!(config.raw_data_dir, PathBuf::from("data/raw"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"min_count": 10, "two_sample": {"min_parametric_n": 50}}"#).unwrap();
        let config = AnalysisConfig::from_json_file(&path).unwrap();
        assert_eq!(config.min_count, 10);
        assert_eq!(config.two_sample.min_parametric_n, 50);
        assert_eq!(config.two_sample.normality_alpha, 0.05);
        assert_eq!(config.plot, PlotConfig::default());
    }
}
