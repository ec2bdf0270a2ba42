use std::path::PathBuf;

use polars::prelude::*;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::helper_functions::{first_present_column, parse_f64_cell, read_csv_as_strings};
use crate::models::{polars_err, Dataset, DatasetKind};
use crate::record_builder::RawVariantRow;

const SNP_COLUMN: &str = "SNP";
const BETA_COLUMNS: [&str; 2] = ["beta", "Beta"];

/// Every caQTL was called on ATAC peaks that overlap DNase and H3K27ac signal.
pub const CA_QTL_MODALITIES: [&str; 3] = ["ATAC", "DNase", "H3K27ac"];

/// ATAC-QTL release of GSE86886 (Nedelec et al.): one compound `SNP` token
/// (`chr12:9436083_rs61916194`) and a signed `beta` per row.
pub struct CaQtlDataset {
    pub path: PathBuf,
}

impl Dataset for CaQtlDataset {
    fn kind(&self) -> DatasetKind {
        DatasetKind::CaQtls
    }

    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading caQTLs from {}", self.path.display());
        let df = match read_csv_as_strings(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read caQTL CSV: {}", e);
                return Err(e);
            }
        };
        info!("Loading {} caQTLs...", df.height());
        Ok(df)
    }

    fn raw_rows(&self, df: &DataFrame) -> PolarsResult<Vec<RawVariantRow>> {
        let source_name = self.path.display().to_string();
        let beta_column = first_present_column(df, &BETA_COLUMNS).ok_or_else(|| {
            polars_err(Box::new(PipelineError::MissingColumn {
                column: BETA_COLUMNS.join("|"),
                source_name: source_name.clone(),
            }))
        })?;

        let snps = df.column(SNP_COLUMN)?.str()?;
        let betas = df.column(beta_column)?.str()?;
        let modality_tags: Vec<String> = CA_QTL_MODALITIES.iter().map(|m| m.to_string()).collect();

        let mut rows = Vec::with_capacity(df.height());
        let mut missing_beta = 0usize;
        for i in 0..df.height() {
            let Some(beta) = parse_f64_cell(betas.get(i)) else {
                missing_beta += 1;
                continue;
            };
            rows.push(RawVariantRow {
                index: i,
                token: snps.get(i).map(str::to_string),
                rs_id: None,
                file_locus: None,
                file_alleles: None,
                beta,
                modality_tags: modality_tags.clone(),
            });
        }
        if missing_beta > 0 {
            warn!("{} caQTL rows without a numeric {} skipped", missing_beta, beta_column);
        }
        Ok(rows)
    }
}
