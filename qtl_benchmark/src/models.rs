use std::fmt;

use clap::ValueEnum;
use polars::prelude::*;

use crate::record_builder::RawVariantRow;

/// Allele placeholder for rows whose ref/alt could not be resolved.
pub const SENTINEL_ALLELE: &str = "N";

/// Cell type a dataset's assay was run in, used to pick matching model tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tissue {
    pub name: &'static str,
    pub curie: &'static str,
}

pub const CD4_T_CELL: Tissue = Tissue {
    name: "CD4_T_CELL",
    curie: "CL:0000624",
};
pub const B_CELL: Tissue = Tissue {
    name: "B_CELL",
    curie: "CL:0000236",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum DatasetKind {
    /// Chromatin-accessibility QTLs (Nedelec et al., CD4+ T cells)
    #[value(name = "caQTLs")]
    CaQtls,
    /// Histone-mark QTLs (Pelikan et al., lymphoblastoid B cells)
    #[value(name = "hQTLs")]
    HQtls,
}

impl DatasetKind {
    /// Prefix of every `variant_id` minted for this dataset.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            DatasetKind::CaQtls => "caQTL",
            DatasetKind::HQtls => "hQTL",
        }
    }

    pub fn tissue(&self) -> Tissue {
        match self {
            DatasetKind::CaQtls => CD4_T_CELL,
            DatasetKind::HQtls => B_CELL,
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatasetKind::CaQtls => "caQTLs",
            DatasetKind::HQtls => "hQTLs",
        };
        write!(f, "{s}")
    }
}

/// A raw QTL source file that can be turned into canonical variant rows.
pub trait Dataset {
    fn kind(&self) -> DatasetKind;

    /// Reads the raw release file untouched (every column as a string).
    fn load(&self) -> PolarsResult<DataFrame>;

    /// Extracts the per-row fields the record builder needs. Rows the dataset
    /// itself rejects (e.g. no rs-ID where one is mandatory) are not returned.
    fn raw_rows(&self, df: &DataFrame) -> PolarsResult<Vec<RawVariantRow>>;
}

/// Canonical unit flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub variant_id: String,
    pub chrom: String,
    pub pos: Option<i64>,
    pub ref_allele: String,
    pub alt_allele: String,
    pub beta: f64,
    pub modality: String,
}

impl VariantRecord {
    pub fn has_known_alleles(&self) -> bool {
        self.ref_allele != SENTINEL_ALLELE && self.alt_allele != SENTINEL_ALLELE
    }

    /// True when the record may be sent to the scoring service.
    pub fn is_scorable(&self) -> bool {
        self.pos.is_some() && self.has_known_alleles()
    }

    /// Key the scoring service reports variants under (`chr12:9283487:C>T`).
    pub fn variant_key(&self) -> Option<String> {
        self.pos.map(|pos| {
            format!(
                "{}:{}:{}>{}",
                ucsc_chrom(&self.chrom),
                pos,
                self.ref_allele,
                self.alt_allele
            )
        })
    }
}

/// One scored variant after reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub variant_id: String,
    pub chrom: String,
    pub pos: i64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub beta: f64,
    pub modality: String,
    pub quantile_score: f64,
    pub raw_score: f64,
    pub n_tracks: u32,
}

/// Chromosome name with a single `chr` prefix.
pub fn ucsc_chrom(chrom: &str) -> String {
    if chrom.starts_with("chr") {
        chrom.to_string()
    } else {
        format!("chr{chrom}")
    }
}

pub fn polars_err(e: Box<dyn std::error::Error>) -> PolarsError {
    PolarsError::ComputeError(e.to_string().into())
}

// ─────────────────────────────────────────────────────────────────────────────
// DataFrame conversions
// ─────────────────────────────────────────────────────────────────────────────

pub fn variant_records_to_df(records: &[VariantRecord]) -> PolarsResult<DataFrame> {
    let ids: Vec<&str> = records.iter().map(|r| r.variant_id.as_str()).collect();
    let chroms: Vec<&str> = records.iter().map(|r| r.chrom.as_str()).collect();
    let positions: Vec<Option<i64>> = records.iter().map(|r| r.pos).collect();
    let refs: Vec<&str> = records.iter().map(|r| r.ref_allele.as_str()).collect();
    let alts: Vec<&str> = records.iter().map(|r| r.alt_allele.as_str()).collect();
    let betas: Vec<f64> = records.iter().map(|r| r.beta).collect();
    let modalities: Vec<&str> = records.iter().map(|r| r.modality.as_str()).collect();

    DataFrame::new(vec![
        Column::from(Series::new(PlSmallStr::from("variant_id"), ids)),
        Column::from(Series::new(PlSmallStr::from("chrom"), chroms)),
        Column::from(Series::new(PlSmallStr::from("pos"), positions)),
        Column::from(Series::new(PlSmallStr::from("ref"), refs)),
        Column::from(Series::new(PlSmallStr::from("alt"), alts)),
        Column::from(Series::new(PlSmallStr::from("beta"), betas)),
        Column::from(Series::new(PlSmallStr::from("modality"), modalities)),
    ])
}

pub fn df_to_variant_records(df: &DataFrame) -> PolarsResult<Vec<VariantRecord>> {
    let ids = df.column("variant_id")?.str()?;
    let chroms = df.column("chrom")?.str()?;
    let positions = df.column("pos")?.i64()?;
    let refs = df.column("ref")?.str()?;
    let alts = df.column("alt")?.str()?;
    let betas = df.column("beta")?.f64()?;
    let modalities = df.column("modality")?.str()?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(id), Some(chrom), Some(r), Some(a), Some(beta), Some(modality)) = (
            ids.get(i),
            chroms.get(i),
            refs.get(i),
            alts.get(i),
            betas.get(i),
            modalities.get(i),
        ) else {
            return Err(PolarsError::ComputeError(
                format!("processed variant table has a null field at row {i}").into(),
            ));
        };
        records.push(VariantRecord {
            variant_id: id.to_string(),
            chrom: chrom.to_string(),
            pos: positions.get(i),
            ref_allele: r.to_string(),
            alt_allele: a.to_string(),
            beta,
            modality: modality.to_string(),
        });
    }
    Ok(records)
}

pub fn prediction_records_to_df(records: &[PredictionRecord]) -> PolarsResult<DataFrame> {
    let ids: Vec<&str> = records.iter().map(|r| r.variant_id.as_str()).collect();
    let chroms: Vec<&str> = records.iter().map(|r| r.chrom.as_str()).collect();
    let positions: Vec<i64> = records.iter().map(|r| r.pos).collect();
    let refs: Vec<&str> = records.iter().map(|r| r.ref_allele.as_str()).collect();
    let alts: Vec<&str> = records.iter().map(|r| r.alt_allele.as_str()).collect();
    let betas: Vec<f64> = records.iter().map(|r| r.beta).collect();
    let modalities: Vec<&str> = records.iter().map(|r| r.modality.as_str()).collect();
    let quantiles: Vec<f64> = records.iter().map(|r| r.quantile_score).collect();
    let raws: Vec<f64> = records.iter().map(|r| r.raw_score).collect();
    let tracks: Vec<u32> = records.iter().map(|r| r.n_tracks).collect();

    DataFrame::new(vec![
        Column::from(Series::new(PlSmallStr::from("variant_id"), ids)),
        Column::from(Series::new(PlSmallStr::from("chrom"), chroms)),
        Column::from(Series::new(PlSmallStr::from("pos"), positions)),
        Column::from(Series::new(PlSmallStr::from("ref"), refs)),
        Column::from(Series::new(PlSmallStr::from("alt"), alts)),
        Column::from(Series::new(PlSmallStr::from("beta"), betas)),
        Column::from(Series::new(PlSmallStr::from("modality"), modalities)),
        Column::from(Series::new(PlSmallStr::from("quantile_score"), quantiles)),
        Column::from(Series::new(PlSmallStr::from("raw_score"), raws)),
        Column::from(Series::new(PlSmallStr::from("n_tracks"), tracks)),
    ])
}

pub fn df_to_prediction_records(df: &DataFrame) -> PolarsResult<Vec<PredictionRecord>> {
    let ids = df.column("variant_id")?.str()?;
    let chroms = df.column("chrom")?.str()?;
    let positions = df.column("pos")?.i64()?;
    let refs = df.column("ref")?.str()?;
    let alts = df.column("alt")?.str()?;
    let betas = df.column("beta")?.f64()?;
    let modalities = df.column("modality")?.str()?;
    let quantiles = df.column("quantile_score")?.f64()?;
    let raws = df.column("raw_score")?.f64()?;
    let tracks = df.column("n_tracks")?.u32()?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(id), Some(chrom), Some(pos), Some(r), Some(a), Some(beta), Some(modality)) = (
            ids.get(i),
            chroms.get(i),
            positions.get(i),
            refs.get(i),
            alts.get(i),
            betas.get(i),
            modalities.get(i),
        ) else {
            return Err(PolarsError::ComputeError(
                format!("prediction table has a null field at row {i}").into(),
            ));
        };
        let (Some(quantile_score), Some(raw_score), Some(n_tracks)) =
            (quantiles.get(i), raws.get(i), tracks.get(i))
        else {
            return Err(PolarsError::ComputeError(
                format!("prediction table has a null score at row {i}").into(),
            ));
        };
        records.push(PredictionRecord {
            variant_id: id.to_string(),
            chrom: chrom.to_string(),
            pos,
            ref_allele: r.to_string(),
            alt_allele: a.to_string(),
            beta,
            modality: modality.to_string(),
            quantile_score,
            raw_score,
            n_tracks,
        });
    }
    Ok(records)
}
