//! Runtime configuration: project layout, collaborator endpoints and pacing.
//!
//! Defaults cover the published setup; a `pipeline_config.json` at the
//! project root may override any subset of the fields.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::error::PipelineError;
use crate::models::DatasetKind;

pub const CONFIG_FILE_NAME: &str = "pipeline_config.json";
pub const API_KEY_VAR: &str = "ALPHA_GENOME_KEY";

/// Reference genome build understood by the annotation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assembly {
    Hg19,
    Hg38,
}

impl Assembly {
    pub fn as_str(&self) -> &'static str {
        match self {
            Assembly::Hg19 => "hg19",
            Assembly::Hg38 => "hg38",
        }
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub base_url: String,
    pub assembly: Assembly,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://myvariant.info/v1".to_string(),
            assembly: Assembly::Hg38,
            batch_size: 100,
            batch_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl AnnotationConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// JSON bridge exposing the model's `score_variant` call.
    pub base_url: String,
    pub timeout_secs: u64,
    /// Width of the sequence window scored around each variant.
    pub sequence_length: i64,
    pub organism: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            timeout_secs: 120,
            sequence_length: 1 << 20,
            organism: "HOMO_SAPIENS".to_string(),
        }
    }
}

impl ScoringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(skip)]
    pub project_root: PathBuf,
    pub annotation: AnnotationConfig,
    pub scoring: ScoringConfig,
}

impl PipelineConfig {
    /// Loads the configuration for `project_root`, applying the optional
    /// override file found there.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            info!("Reading pipeline configuration from {}", path.display());
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str::<PipelineConfig>(&raw)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        } else {
            PipelineConfig::default()
        };
        config.project_root = project_root.to_path_buf();
        Ok(config)
    }

    pub fn raw_input_path(&self, dataset: DatasetKind) -> PathBuf {
        let relative = match dataset {
            DatasetKind::CaQtls => "data/raw/caQTLs_GSE86886/ATAC-QTLs.csv",
            DatasetKind::HQtls => "data/raw/hQTLs_GSE116193/Pelikan_et_al_hQTL_summary.csv",
        };
        self.project_root.join(relative)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.project_root.join("data/processed")
    }

    pub fn processed_path(&self, dataset: DatasetKind) -> PathBuf {
        self.processed_dir().join(format!("{dataset}.parquet"))
    }

    pub fn predictions_dir(&self) -> PathBuf {
        self.project_root.join("results/predictions")
    }

    pub fn predictions_path(&self, dataset: DatasetKind) -> PathBuf {
        self.predictions_dir().join(format!("{dataset}.parquet"))
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.project_root.join("results/tables")
    }

    pub fn metrics_path(&self, dataset: DatasetKind) -> PathBuf {
        self.tables_dir().join(format!("{dataset}_metrics.txt"))
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.project_root.join("results/plots")
    }

    pub fn plot_path(&self, dataset: DatasetKind, plot: &str) -> PathBuf {
        self.plots_dir().join(format!("{dataset}_{plot}.png"))
    }
}

/// Reads the scoring API key; its absence is a configuration error.
pub fn scoring_api_key() -> Result<String, PipelineError> {
    match env::var(API_KEY_VAR) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(PipelineError::MissingApiKey(API_KEY_VAR)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(dir.path()).unwrap();
        assert_eq!(config.annotation.batch_size, 100);
        assert_eq!(config.annotation.assembly, Assembly::Hg38);
        assert_eq!(config.scoring.sequence_length, 1_048_576);
        assert_eq!(
            config.processed_path(DatasetKind::CaQtls),
            dir.path().join("data/processed/caQTLs.parquet")
        );
        assert_eq!(
            config.plot_path(DatasetKind::HQtls, "residuals"),
            dir.path().join("results/plots/hQTLs_residuals.png")
        );
    }

    #[test]
    fn override_file_replaces_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"annotation": {"assembly": "hg19", "batch_delay_ms": 0}}"#,
        )
        .unwrap();
        let config = PipelineConfig::load(dir.path()).unwrap();
        assert_eq!(config.annotation.assembly, Assembly::Hg19);
        assert_eq!(config.annotation.batch_delay(), Duration::ZERO);
        assert_eq!(config.annotation.batch_size, 100);
        assert_eq!(config.scoring.organism, "HOMO_SAPIENS");
    }
}
