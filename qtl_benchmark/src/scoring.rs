//! Variant-effect scoring through the external sequence model.
//!
//! The model sits behind [`VariantScorer`]: one variant, its surrounding
//! interval and a scorer set go in, one score row per model track comes out.

use anyhow::{Context, Result};
use polars::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api_handler::APIHandler;
use crate::config::ScoringConfig;
use crate::error::PipelineError;
use crate::modality::{scorers_for_modality, ScorerKind};
use crate::models::{ucsc_chrom, VariantRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenomicInterval {
    pub chromosome: String,
    /// 0-based, inclusive
    pub start: i64,
    /// 0-based, exclusive
    pub end: i64,
}

impl GenomicInterval {
    /// Window of `width` bp centred on the variant's reference bases.
    pub fn around_variant(variant: &VariantDescriptor, width: i64) -> Self {
        let ref_start = variant.position - 1;
        let ref_end = ref_start + variant.reference_bases.len() as i64;
        let center = (ref_start + ref_end) / 2;
        let start = center - width / 2;
        Self {
            chromosome: variant.chromosome.clone(),
            start,
            end: start + width,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantDescriptor {
    pub chromosome: String,
    /// 1-based
    pub position: i64,
    pub reference_bases: String,
    pub alternate_bases: String,
    /// Canonical `variant_id`, echoed for tracing on the service side.
    pub name: String,
}

impl VariantDescriptor {
    /// `None` for records that must not be scored (unknown alleles or position).
    pub fn from_record(record: &VariantRecord) -> Option<Self> {
        if !record.is_scorable() {
            return None;
        }
        Some(Self {
            chromosome: ucsc_chrom(&record.chrom),
            position: record.pos?,
            reference_bases: record.ref_allele.clone(),
            alternate_bases: record.alt_allele.clone(),
            name: record.variant_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreRequest {
    pub interval: GenomicInterval,
    pub variant: VariantDescriptor,
    pub variant_scorers: Vec<&'static str>,
    pub organism: String,
}

/// One model track's score for one variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackScore {
    /// `chr<chrom>:<pos>:<ref>><alt>` as reported by the model.
    pub variant_id: String,
    #[serde(default)]
    pub scorer: Option<String>,
    #[serde(default)]
    pub ontology_curie: Option<String>,
    #[serde(default)]
    pub biosample_name: Option<String>,
    #[serde(default)]
    pub quantile_score: Option<f64>,
    #[serde(default)]
    pub raw_score: Option<f64>,
}

pub trait VariantScorer {
    fn score_variant(&self, request: &ScoreRequest) -> Result<Vec<TrackScore>>;
}

/// HTTP client for the JSON bridge in front of the model's `score_variant`.
pub struct AlphaGenomeClient {
    api: APIHandler,
    api_key: String,
}

impl AlphaGenomeClient {
    pub fn new(config: &ScoringConfig, api_key: String) -> Result<Self> {
        info!("Initializing scoring client for {}", config.base_url);
        Ok(Self {
            api: APIHandler::new(&config.base_url, config.timeout())?,
            api_key,
        })
    }
}

impl VariantScorer for AlphaGenomeClient {
    fn score_variant(&self, request: &ScoreRequest) -> Result<Vec<TrackScore>> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).context("API key is not a valid header value")?,
        );
        let body = self.api.post_json("/score_variant", request, headers)?;
        serde_json::from_value(body).context("unexpected score payload")
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScoringStats {
    pub attempted: usize,
    pub skipped_unknown_alleles: usize,
    pub scored: usize,
    pub failed: usize,
}

/// Scores every scorable record of one modality group and returns the tidy
/// per-track table. Individual failures are logged and skipped; a group in
/// which nothing could be scored is an error.
pub fn score_group(
    scorer: &dyn VariantScorer,
    records: &[VariantRecord],
    modality: &str,
    config: &ScoringConfig,
) -> Result<(DataFrame, ScoringStats)> {
    let scorers: Vec<&'static str> = scorers_for_modality(modality)?
        .iter()
        .map(ScorerKind::as_str)
        .collect();
    info!("Using {} scorers for: {}", scorers.len(), modality);

    let mut stats = ScoringStats::default();
    let mut tracks = Vec::new();
    for record in records {
        let Some(variant) = VariantDescriptor::from_record(record) else {
            stats.skipped_unknown_alleles += 1;
            continue;
        };
        stats.attempted += 1;
        let request = ScoreRequest {
            interval: GenomicInterval::around_variant(&variant, config.sequence_length),
            variant,
            variant_scorers: scorers.clone(),
            organism: config.organism.clone(),
        };
        match scorer.score_variant(&request) {
            Ok(scores) => {
                debug!("{}: {} track scores", record.variant_id, scores.len());
                stats.scored += 1;
                tracks.extend(scores);
            }
            Err(e) => {
                stats.failed += 1;
                warn!("Failed {}: {:#}", record.variant_id, e);
            }
        }
    }

    info!(
        "Scored {}/{} variants ({} failed, {} skipped with unknown alleles)",
        stats.scored, stats.attempted, stats.failed, stats.skipped_unknown_alleles
    );
    if stats.scored == 0 {
        return Err(PipelineError::NothingScored(modality.to_string()).into());
    }

    info!("Converting {} results to tidy format...", stats.scored);
    let df = tidy_scores(&tracks)?;
    Ok((df, stats))
}

/// Flattens track scores into `variant_key, scorer, ontology_curie,
/// biosample_name, quantile_score, raw_score`.
pub fn tidy_scores(tracks: &[TrackScore]) -> PolarsResult<DataFrame> {
    let keys: Vec<&str> = tracks.iter().map(|t| t.variant_id.as_str()).collect();
    let scorers: Vec<Option<&str>> = tracks.iter().map(|t| t.scorer.as_deref()).collect();
    let curies: Vec<Option<&str>> = tracks.iter().map(|t| t.ontology_curie.as_deref()).collect();
    let biosamples: Vec<Option<&str>> =
        tracks.iter().map(|t| t.biosample_name.as_deref()).collect();
    let quantiles: Vec<Option<f64>> = tracks.iter().map(|t| t.quantile_score).collect();
    let raws: Vec<Option<f64>> = tracks.iter().map(|t| t.raw_score).collect();

    DataFrame::new(vec![
        Column::from(Series::new(PlSmallStr::from("variant_key"), keys)),
        Column::from(Series::new(PlSmallStr::from("scorer"), scorers)),
        Column::from(Series::new(PlSmallStr::from("ontology_curie"), curies)),
        Column::from(Series::new(PlSmallStr::from("biosample_name"), biosamples)),
        Column::from(Series::new(PlSmallStr::from("quantile_score"), quantiles)),
        Column::from(Series::new(PlSmallStr::from("raw_score"), raws)),
    ])
}
