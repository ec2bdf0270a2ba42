//! Maps the model's per-track scores back onto canonical variant records.
//!
//! The model reports variants under a `chr<chrom>:<pos>:<ref>><alt>` key. That
//! key is only used to find the record again; every output row is identified
//! by the record's own `variant_id`.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::models::{PredictionRecord, Tissue, VariantRecord};

/// Filters `tracks` to `tissue`, averages the remaining tracks per variant
/// key and joins the result onto `records`. Keys without a matching record
/// are dropped.
pub fn reconcile(
    tracks: &DataFrame,
    records: &[VariantRecord],
    tissue: Tissue,
    modality: &str,
) -> Result<Vec<PredictionRecord>> {
    if tracks.height() == 0 {
        return Err(PipelineError::NothingScored(modality.to_string()).into());
    }

    info!(
        "Filtering to {} ({}) (before: {} rows)...",
        tissue.name,
        tissue.curie,
        tracks.height()
    );
    let filtered = tracks
        .clone()
        .lazy()
        .filter(col("ontology_curie").eq(lit(tissue.curie)))
        .collect()?;
    info!(
        "After filtering: {} rows from {} tracks",
        filtered.height(),
        distinct_biosamples(&filtered)?
    );
    if filtered.height() == 0 {
        return Err(PipelineError::NoTissueRows {
            tissue: tissue.name.to_string(),
            curie: tissue.curie.to_string(),
            modality: modality.to_string(),
        }
        .into());
    }

    let aggregated = aggregate_tracks(filtered)?;
    let lookup = key_lookup(records);

    let keys = aggregated.column("variant_key")?.str()?;
    let quantiles = aggregated.column("quantile_score")?.f64()?;
    let raws = aggregated.column("raw_score")?.f64()?;
    let counts = aggregated.column("n_tracks")?.u32()?;

    let mut predictions = Vec::with_capacity(aggregated.height());
    for i in 0..aggregated.height() {
        let Some(key) = keys.get(i) else { continue };
        let Some(record) = lookup.get(key) else {
            debug!("{} has no matching input record, dropped", key);
            continue;
        };
        let Some(quantile_score) = quantiles.get(i) else {
            debug!("{} has no quantile score on any track, dropped", key);
            continue;
        };
        // Lookup only holds records with a position.
        let Some(pos) = record.pos else { continue };
        predictions.push(PredictionRecord {
            variant_id: record.variant_id.clone(),
            chrom: record.chrom.clone(),
            pos,
            ref_allele: record.ref_allele.clone(),
            alt_allele: record.alt_allele.clone(),
            beta: record.beta,
            modality: record.modality.clone(),
            quantile_score,
            raw_score: raws.get(i).unwrap_or(f64::NAN),
            n_tracks: counts.get(i).unwrap_or(0),
        });
    }

    info!(
        "Successfully mapped {}/{} variants ({:.1}%)",
        predictions.len(),
        aggregated.height(),
        predictions.len() as f64 / aggregated.height() as f64 * 100.0
    );
    if predictions.is_empty() {
        return Err(PipelineError::EmptyJoin(modality.to_string()).into());
    }
    Ok(predictions)
}

/// Mean quantile and raw score per variant key, with the number of tracks
/// that carried a quantile score. Keys keep their first-seen order.
pub fn aggregate_tracks(filtered: DataFrame) -> PolarsResult<DataFrame> {
    filtered
        .lazy()
        .group_by_stable([col("variant_key")])
        .agg([
            col("quantile_score").mean(),
            col("raw_score").mean(),
            col("quantile_score")
                .count()
                .cast(DataType::UInt32)
                .alias("n_tracks"),
        ])
        .collect()
}

/// Key → record index. A later record with the same key replaces an earlier one.
fn key_lookup(records: &[VariantRecord]) -> HashMap<String, &VariantRecord> {
    let mut lookup = HashMap::with_capacity(records.len());
    for record in records {
        if let Some(key) = record.variant_key() {
            if let Some(previous) = lookup.insert(key, record) {
                debug!(
                    "{} shares its variant key with {}; keeping {}",
                    record.variant_id, previous.variant_id, record.variant_id
                );
            }
        }
    }
    lookup
}

fn distinct_biosamples(df: &DataFrame) -> PolarsResult<usize> {
    let names = df.column("biosample_name")?.str()?;
    Ok(names.into_iter().flatten().collect::<HashSet<&str>>().len())
}
