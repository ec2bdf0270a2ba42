//! Turns raw dataset rows plus resolved alleles into canonical variant records.

use tracing::{debug, info};

use crate::allele_resolver::AlleleMap;
use crate::identifiers::{extract_rs_id, parse_coordinate_token};
use crate::models::{VariantRecord, SENTINEL_ALLELE};

/// Coordinates a dataset ships for a row in its own columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FileLocus {
    pub chrom: String,
    pub pos: i64,
}

/// Fields a dataset extracts from one row of its raw file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVariantRow {
    /// 0-based row index in the raw file; becomes part of the `variant_id`.
    pub index: usize,
    /// Compound `chrom:pos_rsID` token, when the dataset has one.
    pub token: Option<String>,
    /// rs-ID from a dedicated column, when the dataset has one.
    pub rs_id: Option<String>,
    /// Coordinates from dedicated columns, used when resolution fails.
    pub file_locus: Option<FileLocus>,
    /// `(ref, alt)` reported by the dataset; these take precedence over
    /// resolved alleles because `beta` is oriented on them.
    pub file_alleles: Option<(String, String)>,
    pub beta: f64,
    pub modality_tags: Vec<String>,
}

impl RawVariantRow {
    /// rs-ID from the dedicated column, else extracted from the token.
    pub fn rs_id(&self) -> Option<String> {
        self.rs_id
            .clone()
            .or_else(|| self.token.as_deref().and_then(extract_rs_id))
    }
}

/// Counters reported after a build.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub rows: usize,
    pub with_rs_id: usize,
    pub resolved: usize,
    pub coordinate_fallback: usize,
    pub dropped_unparsable: usize,
    pub dropped_no_modality: usize,
    pub real_alleles: usize,
}

impl BuildStats {
    pub fn dropped(&self) -> usize {
        self.dropped_unparsable + self.dropped_no_modality
    }

    pub fn coverage_line(&self) -> String {
        format!(
            "{}/{} with rs-IDs, {} dropped",
            self.resolved,
            self.with_rs_id,
            self.dropped()
        )
    }
}

/// Collects every distinct rs-ID in row order, ready for batch resolution.
pub fn collect_rs_ids(rows: &[RawVariantRow]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter_map(RawVariantRow::rs_id)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

pub struct RecordBuilder<'a> {
    id_prefix: &'a str,
    resolved: &'a AlleleMap,
    stats: BuildStats,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(id_prefix: &'a str, resolved: &'a AlleleMap) -> Self {
        Self {
            id_prefix,
            resolved,
            stats: BuildStats::default(),
        }
    }

    /// Builds one record, or `None` when the row has to be dropped.
    pub fn build(&mut self, row: &RawVariantRow) -> Option<VariantRecord> {
        self.stats.rows += 1;
        let variant_id = format!("{}_{}", self.id_prefix, row.index);

        if row.modality_tags.is_empty() {
            debug!("{}: no usable modality, skipped", variant_id);
            self.stats.dropped_no_modality += 1;
            return None;
        }

        let rs_id = row.rs_id();
        if rs_id.is_some() {
            self.stats.with_rs_id += 1;
        }

        let resolved = rs_id.as_ref().and_then(|id| self.resolved.get(id));
        let (chrom, pos, ref_allele, alt_allele) = if let Some(hit) = resolved {
            self.stats.resolved += 1;
            let (r, a) = row
                .file_alleles
                .clone()
                .unwrap_or_else(|| (hit.ref_allele.clone(), hit.alt_allele.clone()));
            (hit.chrom.clone(), hit.pos, r, a)
        } else {
            let locus = row.file_locus.clone().or_else(|| {
                row.token
                    .as_deref()
                    .and_then(parse_coordinate_token)
                    .map(|(chrom, pos)| FileLocus { chrom, pos })
            });
            let Some(locus) = locus else {
                debug!(
                    "{}: unparsable token {:?}, dropped",
                    variant_id,
                    row.token.as_deref().unwrap_or("")
                );
                self.stats.dropped_unparsable += 1;
                return None;
            };
            self.stats.coordinate_fallback += 1;
            let (r, a) = row
                .file_alleles
                .clone()
                .unwrap_or_else(|| (SENTINEL_ALLELE.to_string(), SENTINEL_ALLELE.to_string()));
            (locus.chrom, locus.pos, r, a)
        };

        let record = VariantRecord {
            variant_id,
            chrom,
            pos: Some(pos),
            ref_allele,
            alt_allele,
            beta: row.beta,
            modality: row.modality_tags.join(","),
        };
        if record.has_known_alleles() {
            self.stats.real_alleles += 1;
        }
        Some(record)
    }

    pub fn build_all(mut self, rows: &[RawVariantRow]) -> (Vec<VariantRecord>, BuildStats) {
        let records: Vec<VariantRecord> = rows.iter().filter_map(|row| self.build(row)).collect();
        info!(
            "Built {} variant records from {} rows: {}",
            records.len(),
            self.stats.rows,
            self.stats.coverage_line()
        );
        info!(
            "Real alleles: {}/{}, coordinate-only fallbacks: {}",
            self.stats.real_alleles,
            records.len(),
            self.stats.coordinate_fallback
        );
        (records, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele_resolver::ResolvedAllele;

    fn resolved(chrom: &str, pos: i64, r: &str, a: &str) -> ResolvedAllele {
        ResolvedAllele {
            chrom: chrom.into(),
            pos,
            ref_allele: r.into(),
            alt_allele: a.into(),
        }
    }

    fn token_row(index: usize, token: &str, beta: f64) -> RawVariantRow {
        RawVariantRow {
            index,
            token: Some(token.into()),
            rs_id: None,
            file_locus: None,
            file_alleles: None,
            beta,
            modality_tags: vec!["ATAC".into(), "DNase".into(), "H3K27ac".into()],
        }
    }

    #[test]
    fn two_resolved_and_one_unparsable_row() {
        let mut map = AlleleMap::new();
        map.insert("rs61916194".into(), resolved("12", 9283487, "C", "T"));
        map.insert("rs7".into(), resolved("3", 400, "G", "A"));

        let rows = vec![
            token_row(0, "chr12:9436083_rs61916194", -0.8),
            token_row(1, "garbage", 0.1),
            token_row(2, "chr3:500_rs7", 0.3),
        ];
        let (records, stats) = RecordBuilder::new("caQTL", &map).build_all(&rows);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].variant_id, "caQTL_0");
        assert_eq!(records[0].pos, Some(9283487));
        assert_eq!(records[0].ref_allele, "C");
        assert_eq!(records[0].beta, -0.8);
        assert_eq!(records[1].variant_id, "caQTL_2");
        assert_eq!(records[1].modality, "ATAC,DNase,H3K27ac");
        assert_eq!(stats.coverage_line(), "2/2 with rs-IDs, 1 dropped");
    }

    #[test]
    fn unresolved_token_falls_back_to_sentinel_alleles() {
        let map = AlleleMap::new();
        let rows = vec![token_row(4, "chr5:1234_rs99", 1.5)];
        let (records, stats) = RecordBuilder::new("caQTL", &map).build_all(&rows);

        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.chrom, "5");
        assert_eq!(rec.pos, Some(1234));
        assert_eq!((rec.ref_allele.as_str(), rec.alt_allele.as_str()), ("N", "N"));
        assert!(!rec.is_scorable());
        assert_eq!(stats.with_rs_id, 1);
        assert_eq!(stats.resolved, 0);
        assert_eq!(stats.coordinate_fallback, 1);
    }

    #[test]
    fn file_alleles_survive_resolution() {
        let mut map = AlleleMap::new();
        map.insert("rs5".into(), resolved("6", 31_000_000, "T", "C"));
        let row = RawVariantRow {
            index: 3,
            token: None,
            rs_id: Some("rs5".into()),
            file_locus: Some(FileLocus {
                chrom: "6".into(),
                pos: 30_900_000,
            }),
            file_alleles: Some(("A".into(), "G".into())),
            beta: -0.25,
            modality_tags: vec!["H3K4me1".into()],
        };
        let mut builder = RecordBuilder::new("hQTL", &map);
        let rec = builder.build(&row).unwrap();
        assert_eq!(rec.variant_id, "hQTL_3");
        assert_eq!(rec.pos, Some(31_000_000));
        assert_eq!((rec.ref_allele.as_str(), rec.alt_allele.as_str()), ("A", "G"));
        assert_eq!(rec.beta, -0.25);
    }

    #[test]
    fn unresolved_row_keeps_file_coordinates() {
        let map = AlleleMap::new();
        let row = RawVariantRow {
            index: 0,
            token: None,
            rs_id: Some("rs5".into()),
            file_locus: Some(FileLocus {
                chrom: "6".into(),
                pos: 30_900_000,
            }),
            file_alleles: Some(("A".into(), "G".into())),
            beta: 0.5,
            modality_tags: vec!["H3K27ac".into(), "H3K4me1".into()],
        };
        let rec = RecordBuilder::new("hQTL", &map).build(&row).unwrap();
        assert_eq!(rec.pos, Some(30_900_000));
        assert_eq!(rec.modality, "H3K27ac,H3K4me1");
    }

    #[test]
    fn empty_modality_never_proceeds() {
        let map = AlleleMap::new();
        let mut row = token_row(0, "chr1:10_rs1", 0.0);
        row.modality_tags.clear();
        let (records, stats) = RecordBuilder::new("hQTL", &map).build_all(&[row]);
        assert!(records.is_empty());
        assert_eq!(stats.dropped_no_modality, 1);
    }

    #[test]
    fn rs_ids_are_collected_once_in_order() {
        let rows = vec![
            token_row(0, "chr1:10_rs2", 0.0),
            token_row(1, "chr1:11", 0.0),
            token_row(2, "chr1:12_rs1", 0.0),
            token_row(3, "chr1:10_rs2", 0.0),
        ];
        assert_eq!(collect_rs_ids(&rows), vec!["rs2".to_string(), "rs1".to_string()]);
    }
}
