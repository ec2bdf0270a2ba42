use std::path::PathBuf;

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::helper_functions::{is_usable_cell, parse_f64_cell, read_csv_as_strings};
use crate::models::{polars_err, Dataset, DatasetKind};
use crate::record_builder::{FileLocus, RawVariantRow};

// Column names as published in the supplementary table (footnote letters included).
const RS_ID_COLUMN: &str = "epiQTL rsID";
const CHR_COLUMN: &str = "Chr";
const POS_HG19_COLUMN: &str = "Bp (hg19)";
const REF_COLUMN: &str = "Ref Allelec";
const ALT_COLUMN: &str = "Alt Alleled";
const EFFECT_COLUMN: &str = "log2 (effect size)";

/// Per-mark significance columns, in the order tags are joined.
const SIGNIFICANCE_COLUMNS: [(&str, &str); 2] = [
    ("H3K27ac", "H3K27ac p-valueb"),
    ("H3K4me1", "H3K4me1 p-valueb"),
];

/// Histone-QTL summary of GSE116193 (Pelikan et al.). Alleles ship with the
/// file, coordinates are hg19; `beta` is the directional log2 fold change.
pub struct HQtlDataset {
    pub path: PathBuf,
}

impl HQtlDataset {
    fn require_columns(&self, df: &DataFrame) -> PolarsResult<()> {
        let names = df.get_column_names();
        let required = [
            RS_ID_COLUMN,
            CHR_COLUMN,
            POS_HG19_COLUMN,
            REF_COLUMN,
            ALT_COLUMN,
            EFFECT_COLUMN,
        ]
        .into_iter()
        .chain(SIGNIFICANCE_COLUMNS.iter().map(|(_, c)| *c));

        for column in required {
            if !names.iter().any(|n| n.as_str() == column) {
                return Err(polars_err(Box::new(PipelineError::MissingColumn {
                    column: column.to_string(),
                    source_name: self.path.display().to_string(),
                })));
            }
        }
        Ok(())
    }
}

impl Dataset for HQtlDataset {
    fn kind(&self) -> DatasetKind {
        DatasetKind::HQtls
    }

    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading hQTLs from {}", self.path.display());
        let df = match read_csv_as_strings(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read hQTL CSV: {}", e);
                return Err(e);
            }
        };
        info!("Loading {} hQTLs...", df.height());
        Ok(df)
    }

    fn raw_rows(&self, df: &DataFrame) -> PolarsResult<Vec<RawVariantRow>> {
        self.require_columns(df)?;

        let rs_ids = df.column(RS_ID_COLUMN)?.str()?;
        let chroms = df.column(CHR_COLUMN)?.str()?;
        let positions = df.column(POS_HG19_COLUMN)?.str()?;
        let refs = df.column(REF_COLUMN)?.str()?;
        let alts = df.column(ALT_COLUMN)?.str()?;
        let effects = df.column(EFFECT_COLUMN)?.str()?;
        let mut significance = Vec::with_capacity(SIGNIFICANCE_COLUMNS.len());
        for (tag, column) in SIGNIFICANCE_COLUMNS {
            significance.push((tag, df.column(column)?.str()?));
        }

        let mut rows = Vec::with_capacity(df.height());
        let mut without_rs_id = 0usize;
        let mut incomplete = 0usize;
        for i in 0..df.height() {
            let rs_id = match rs_ids.get(i).map(str::trim) {
                Some(id) if id.starts_with("rs") => id.to_string(),
                _ => {
                    without_rs_id += 1;
                    continue;
                }
            };

            let pos = parse_f64_cell(positions.get(i)).map(|p| p as i64);
            let effect = parse_f64_cell(effects.get(i));
            let (Some(chrom), Some(pos), Some(r), Some(a), Some(beta)) =
                (chroms.get(i), pos, refs.get(i), alts.get(i), effect)
            else {
                incomplete += 1;
                continue;
            };

            let modality_tags = significance
                .iter()
                .filter(|(_, values)| is_usable_cell(values.get(i)))
                .map(|(tag, _)| tag.to_string())
                .collect();

            rows.push(RawVariantRow {
                index: i,
                token: None,
                rs_id: Some(rs_id),
                file_locus: Some(FileLocus {
                    chrom: chrom.trim().to_string(),
                    pos,
                }),
                file_alleles: Some((r.trim().to_string(), a.trim().to_string())),
                beta,
                modality_tags,
            });
        }
        debug!(
            "hQTL rows: {} kept, {} without rs-ID, {} incomplete",
            rows.len(),
            without_rs_id,
            incomplete
        );
        info!("Found {} variants with rs IDs", rows.len());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn frame() -> DataFrame {
        df![
            "epiQTL rsID" => &["rs11", "rs12", "1:500", "rs14"],
            "Chr" => &["6", "1", "1", "X"],
            "Bp (hg19)" => &["30900000", "1000", "500", "77"],
            "Ref Allelec" => &["A", "C", "G", " T"],
            "Alt Alleled" => &["G", "T", "A", "C "],
            "log2 (effect size)" => &["-0.75", "0.4", "1.0", "0.2"],
            "H3K27ac p-valueb" => &["1e-5", ".", "1e-3", "."],
            "H3K4me1 p-valueb" => &["2e-4", "3e-6", ".", "."],
        ]
        .unwrap()
    }

    fn dataset() -> HQtlDataset {
        HQtlDataset {
            path: PathBuf::from("hqtl.csv"),
        }
    }

    #[test]
    fn modality_tags_follow_significance_columns() {
        let rows = dataset().raw_rows(&frame()).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].modality_tags, vec!["H3K27ac", "H3K4me1"]);
        assert_eq!(rows[0].beta, -0.75);
        let locus = FileLocus {
            chrom: "6".into(),
            pos: 30_900_000,
        };
        assert_eq!(rows[0].file_locus, Some(locus));
        assert_eq!(rows[1].modality_tags, vec!["H3K4me1"]);
        // rows without an rs-ID are not part of the dataset; index is kept
        assert_eq!(rows[2].index, 3);
        assert!(rows[2].modality_tags.is_empty());
        assert_eq!(rows[2].file_alleles, Some(("T".into(), "C".into())));
    }

    #[test]
    fn missing_significance_column_is_reported() {
        let df = frame().drop("H3K4me1 p-valueb").unwrap();
        let err = dataset().raw_rows(&df).unwrap_err();
        assert!(err.to_string().contains("H3K4me1 p-valueb"));
    }
}
