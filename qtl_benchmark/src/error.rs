use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions of a stage invocation. Everything recoverable (an
/// unresolved batch, a malformed row, a single failed scoring call) is
/// logged and counted instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),

    #[error("required input {} not found (run the `{stage}` stage first)", path.display())]
    MissingInput { path: PathBuf, stage: &'static str },

    #[error("raw release file not found; place the published table at {}", .0.display())]
    MissingRawRelease(PathBuf),

    #[error("required column `{column}` missing from {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("no usable variant records left for {0} after filtering")]
    NoRecords(String),

    #[error("no variant in {0} has a position and known alleles")]
    NoScorableVariants(String),

    #[error("no valid scorers for modalities: {0}")]
    NoScorers(String),

    #[error("no variants successfully scored for modality group `{0}`")]
    NothingScored(String),

    #[error("no {tissue} ({curie}) predictions found for modality group `{modality}`")]
    NoTissueRows {
        tissue: String,
        curie: String,
        modality: String,
    },

    #[error("none of the scored variants mapped back to an input record (modality group `{0}`)")]
    EmptyJoin(String),

    #[error("need at least {needed} variants for correlation, got {got}")]
    TooFewVariants { needed: usize, got: usize },
}
