//! Modality grouping and scorer selection.
//!
//! Groups are keyed on the literal modality string: `H3K27ac,H3K4me1` and
//! `H3K4me1,H3K27ac` are two separate groups even though they name the same
//! marks. Both groups select the same scorers, so the only effect is one
//! extra scoring pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::PipelineError;
use crate::models::VariantRecord;

/// Variant scorer families offered by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScorerKind {
    Atac,
    Dnase,
    ChipHistone,
    RnaSeq,
}

impl ScorerKind {
    /// Scorer identifier as the scoring service names it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScorerKind::Atac => "ATAC",
            ScorerKind::Dnase => "DNASE",
            ScorerKind::ChipHistone => "CHIP_HISTONE",
            ScorerKind::RnaSeq => "RNA_SEQ",
        }
    }

    /// Scorer for one assay tag; `None` for tags the model has no scorer for.
    pub fn for_tag(tag: &str) -> Option<Self> {
        match tag {
            "ATAC" => Some(ScorerKind::Atac),
            "DNase" => Some(ScorerKind::Dnase),
            "H3K27ac" | "H3K4me1" => Some(ScorerKind::ChipHistone),
            "RNA_SEQ" => Some(ScorerKind::RnaSeq),
            _ => None,
        }
    }
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplicated scorers for a comma-joined modality string.
pub fn scorers_for_modality(modality: &str) -> Result<Vec<ScorerKind>, PipelineError> {
    let scorers: BTreeSet<ScorerKind> = modality
        .split(',')
        .filter_map(|tag| ScorerKind::for_tag(tag.trim()))
        .collect();
    if scorers.is_empty() {
        return Err(PipelineError::NoScorers(modality.to_string()));
    }
    Ok(scorers.into_iter().collect())
}

/// Partitions records by their literal `modality` string, keys in sorted
/// order, records in input order within each group.
pub fn group_by_modality(records: &[VariantRecord]) -> BTreeMap<String, Vec<VariantRecord>> {
    let mut groups: BTreeMap<String, Vec<VariantRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.modality.clone())
            .or_default()
            .push(record.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, modality: &str) -> VariantRecord {
        VariantRecord {
            variant_id: id.into(),
            chrom: "1".into(),
            pos: Some(1),
            ref_allele: "A".into(),
            alt_allele: "G".into(),
            beta: 0.0,
            modality: modality.into(),
        }
    }

    #[test]
    fn differently_ordered_tags_form_separate_groups() {
        let records = vec![
            record("hQTL_0", "H3K27ac,H3K4me1"),
            record("hQTL_1", "H3K4me1,H3K27ac"),
            record("hQTL_2", "H3K27ac,H3K4me1"),
        ];
        let groups = group_by_modality(&records);
        assert_eq!(groups.len(), 2);
        let ids: Vec<&str> = groups["H3K27ac,H3K4me1"]
            .iter()
            .map(|r| r.variant_id.as_str())
            .collect();
        assert_eq!(ids, ["hQTL_0", "hQTL_2"]);
        assert_eq!(groups["H3K4me1,H3K27ac"].len(), 1);
    }

    #[test]
    fn groups_are_visited_in_key_order() {
        let records = vec![record("a", "H3K4me1"), record("b", "H3K27ac")];
        let groups = group_by_modality(&records);
        let keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(keys, ["H3K27ac", "H3K4me1"]);
    }

    #[test]
    fn histone_marks_share_one_scorer() {
        assert_eq!(
            scorers_for_modality("H3K27ac,H3K4me1").unwrap(),
            vec![ScorerKind::ChipHistone]
        );
        assert_eq!(
            scorers_for_modality("ATAC,DNase,H3K27ac").unwrap(),
            vec![ScorerKind::Atac, ScorerKind::Dnase, ScorerKind::ChipHistone]
        );
    }

    #[test]
    fn unknown_tags_are_ignored_but_none_is_an_error() {
        assert_eq!(
            scorers_for_modality("CTCF, ATAC").unwrap(),
            vec![ScorerKind::Atac]
        );
        assert!(matches!(
            scorers_for_modality("CTCF"),
            Err(PipelineError::NoScorers(m)) if m == "CTCF"
        ));
    }
}
