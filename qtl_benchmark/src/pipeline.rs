//! Stage drivers. Each stage reads the previous stage's file for one dataset,
//! writes its own, and is skipped when that output already exists unless
//! forced.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::allele_resolver::{resolve_all, AlleleResolver, MyVariantClient};
use crate::config::{scoring_api_key, PipelineConfig};
use crate::data_handling::dataset_for;
use crate::error::PipelineError;
use crate::evaluation::{basic_stats, evaluate, log_metrics, render_metrics};
use crate::helper_functions::{read_parquet, write_parquet};
use crate::models::{
    df_to_prediction_records, df_to_variant_records, prediction_records_to_df,
    variant_records_to_df, DatasetKind, PredictionRecord,
};
use crate::modality::group_by_modality;
use crate::plots::{plot_correlation, plot_distributions, plot_residuals, plot_top_variants};
use crate::reconciler::reconcile;
use crate::record_builder::{collect_rs_ids, RecordBuilder};
use crate::scoring::{score_group, AlphaGenomeClient, VariantScorer};

pub const PLOT_NAMES: [&str; 4] = ["correlation", "distributions", "residuals", "top_variants"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Only the first `limit` rows of each dataset.
    pub limit: Option<usize>,
    /// Recompute even when the output exists.
    pub force: bool,
}

fn banner(title: &str, dataset: DatasetKind) {
    info!("{}", "=".repeat(60));
    info!("{} {}", title, dataset);
    info!("{}", "=".repeat(60));
}

fn already_done(path: &Path, opts: &RunOptions) -> bool {
    if path.exists() && !opts.force {
        info!("{} exists, skipping (use --force to recompute)", path.display());
        return true;
    }
    false
}

fn require_input(path: &Path, stage: &'static str) -> Result<(), PipelineError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
            stage,
        })
    }
}

// --------------------------------------------------------
//  Prepare
// --------------------------------------------------------

pub fn run_prepare(
    config: &PipelineConfig,
    datasets: &[DatasetKind],
    opts: &RunOptions,
) -> Result<()> {
    let client = MyVariantClient::new(&config.annotation)?;
    for &dataset in datasets {
        prepare_dataset(config, dataset, opts, &client)
            .with_context(|| format!("prepare failed for {dataset}"))?;
    }
    Ok(())
}

/// Raw CSV → canonical variant records, alleles resolved through `resolver`.
pub fn prepare_dataset(
    config: &PipelineConfig,
    dataset: DatasetKind,
    opts: &RunOptions,
    resolver: &dyn AlleleResolver,
) -> Result<()> {
    banner("Processing", dataset);
    let output = config.processed_path(dataset);
    if already_done(&output, opts) {
        return Ok(());
    }
    let input = config.raw_input_path(dataset);
    if !input.exists() {
        return Err(PipelineError::MissingRawRelease(input).into());
    }

    let source = dataset_for(dataset, input);
    let mut df = source.load()?;
    if let Some(limit) = opts.limit {
        df = df.head(Some(limit));
        info!("Limited to first {} rows", df.height());
    }
    let rows = source.raw_rows(&df)?;

    let rs_ids = collect_rs_ids(&rows);
    info!("Found {} unique rs IDs", rs_ids.len());
    let annotation = &config.annotation;
    let report = resolve_all(
        resolver,
        &rs_ids,
        annotation.assembly,
        annotation.batch_size,
        annotation.batch_delay(),
    );
    info!(
        "Retrieved alleles for {}/{} variants ({:.1}%)",
        report.resolved(),
        report.requested,
        report.coverage_pct()
    );

    let (records, _) =
        RecordBuilder::new(source.kind().id_prefix(), &report.alleles).build_all(&rows);
    if records.is_empty() {
        return Err(PipelineError::NoRecords(dataset.to_string()).into());
    }

    let mut out = variant_records_to_df(&records)?;
    write_parquet(&mut out, &output)?;
    info!("Saved {} {} to {}", records.len(), dataset, output.display());
    Ok(())
}

// --------------------------------------------------------
//  Predict
// --------------------------------------------------------

pub fn run_predict(
    config: &PipelineConfig,
    datasets: &[DatasetKind],
    opts: &RunOptions,
) -> Result<()> {
    let api_key = scoring_api_key()?;
    let client = AlphaGenomeClient::new(&config.scoring, api_key)?;
    info!("Scoring client ready at {}", config.scoring.base_url);
    for &dataset in datasets {
        predict_dataset(config, dataset, opts, &client)
            .with_context(|| format!("predict failed for {dataset}"))?;
    }
    Ok(())
}

/// Scores every modality group, keeps the dataset's tissue and writes one
/// prediction per reconciled variant.
pub fn predict_dataset(
    config: &PipelineConfig,
    dataset: DatasetKind,
    opts: &RunOptions,
    scorer: &dyn VariantScorer,
) -> Result<()> {
    banner("Predicting", dataset);
    let output = config.predictions_path(dataset);
    if already_done(&output, opts) {
        return Ok(());
    }
    let input = config.processed_path(dataset);
    require_input(&input, "prepare")?;

    let mut records = df_to_variant_records(&read_parquet(&input)?)?;
    if let Some(limit) = opts.limit {
        records.truncate(limit);
        info!("Limited to first {} variants", records.len());
    }
    let real = records.iter().filter(|r| r.has_known_alleles()).count();
    info!(
        "Loaded {} variants, {} with real alleles ({:.1}%)",
        records.len(),
        real,
        real as f64 / records.len().max(1) as f64 * 100.0
    );
    if !records.iter().any(|r| r.is_scorable()) {
        return Err(PipelineError::NoScorableVariants(dataset.to_string()).into());
    }

    let tissue = dataset.tissue();
    let mut predictions: Vec<PredictionRecord> = Vec::new();
    for (modality, group) in group_by_modality(&records) {
        info!("Scoring {} variants for {}", group.len(), modality);
        let (tracks, _) = score_group(scorer, &group, &modality, &config.scoring)?;
        predictions.extend(reconcile(&tracks, &group, tissue, &modality)?);
    }
    if predictions.is_empty() {
        return Err(PipelineError::NoScorableVariants(dataset.to_string()).into());
    }

    let mut out = prediction_records_to_df(&predictions)?;
    write_parquet(&mut out, &output)?;

    let scores: Vec<f64> = predictions.iter().map(|p| p.quantile_score).collect();
    let (min, max, _) = basic_stats(&scores);
    info!(
        "Saved {} predictions to {} (score range [{:.3}, {:.3}])",
        predictions.len(),
        output.display(),
        min,
        max
    );
    Ok(())
}

// --------------------------------------------------------
//  Evaluate and plot
// --------------------------------------------------------

fn load_predictions(
    config: &PipelineConfig,
    dataset: DatasetKind,
) -> Result<Vec<PredictionRecord>> {
    let input = config.predictions_path(dataset);
    require_input(&input, "predict")?;
    let preds = df_to_prediction_records(&read_parquet(&input)?)?;
    info!("Loaded {} predictions", preds.len());
    Ok(preds)
}

pub fn run_evaluate(
    config: &PipelineConfig,
    datasets: &[DatasetKind],
    opts: &RunOptions,
) -> Result<()> {
    for &dataset in datasets {
        evaluate_dataset(config, dataset, opts)
            .with_context(|| format!("evaluate failed for {dataset}"))?;
    }
    Ok(())
}

pub fn evaluate_dataset(
    config: &PipelineConfig,
    dataset: DatasetKind,
    opts: &RunOptions,
) -> Result<()> {
    banner("Evaluating", dataset);
    let output = config.metrics_path(dataset);
    if already_done(&output, opts) {
        return Ok(());
    }
    let preds = load_predictions(config, dataset)?;
    let metrics = evaluate(&preds)?;
    log_metrics(&dataset.to_string(), &metrics);

    fs::create_dir_all(config.tables_dir())?;
    fs::write(&output, render_metrics(&dataset.to_string(), &metrics))
        .with_context(|| format!("cannot write {}", output.display()))?;
    info!("Saved metrics to {}", output.display());
    Ok(())
}

pub fn run_plots(
    config: &PipelineConfig,
    datasets: &[DatasetKind],
    opts: &RunOptions,
) -> Result<()> {
    for &dataset in datasets {
        plot_dataset(config, dataset, opts)
            .with_context(|| format!("plot failed for {dataset}"))?;
    }
    Ok(())
}

pub fn plot_dataset(
    config: &PipelineConfig,
    dataset: DatasetKind,
    opts: &RunOptions,
) -> Result<()> {
    banner("Generating plots for", dataset);
    let all_present = PLOT_NAMES
        .iter()
        .all(|name| config.plot_path(dataset, name).exists());
    if all_present && !opts.force {
        info!("Plots for {} exist, skipping (use --force to redraw)", dataset);
        return Ok(());
    }
    let preds = load_predictions(config, dataset)?;
    let metrics = evaluate(&preds)?;
    fs::create_dir_all(config.plots_dir())?;

    let name = dataset.to_string();
    let draw_err = |plot: &str, e: Box<dyn std::error::Error>| {
        anyhow!("failed to draw {} plot: {}", plot, e)
    };

    let path = config.plot_path(dataset, "correlation");
    plot_correlation(&path, &name, &preds, &metrics).map_err(|e| draw_err("correlation", e))?;
    let path = config.plot_path(dataset, "distributions");
    plot_distributions(&path, &name, &preds).map_err(|e| draw_err("distributions", e))?;
    let path = config.plot_path(dataset, "residuals");
    plot_residuals(&path, &name, &preds).map_err(|e| draw_err("residuals", e))?;
    let path = config.plot_path(dataset, "top_variants");
    plot_top_variants(&path, &name, &preds).map_err(|e| draw_err("top_variants", e))?;

    info!("All plots generated for {}", dataset);
    Ok(())
}

/// All four stages in order.
pub fn run_all(
    config: &PipelineConfig,
    datasets: &[DatasetKind],
    opts: &RunOptions,
) -> Result<()> {
    // Fail on the key before any network work.
    scoring_api_key()?;
    run_prepare(config, datasets, opts)?;
    run_predict(config, datasets, opts)?;
    run_evaluate(config, datasets, opts)?;
    run_plots(config, datasets, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele_resolver::{AlleleMap, ResolvedAllele};
    use crate::config::Assembly;
    use crate::models::VariantRecord;
    use crate::scoring::tests::{record, StubScorer};

    /// Resolves rs61916194 only.
    struct OneHitResolver;

    impl AlleleResolver for OneHitResolver {
        fn fetch_batch(&self, rs_ids: &[String], _assembly: Assembly) -> Result<AlleleMap> {
            Ok(rs_ids
                .iter()
                .filter(|id| id.as_str() == "rs61916194")
                .map(|id| {
                    (
                        id.clone(),
                        ResolvedAllele {
                            chrom: "12".into(),
                            pos: 9283487,
                            ref_allele: "C".into(),
                            alt_allele: "T".into(),
                        },
                    )
                })
                .collect())
        }
    }

    fn workspace() -> (tempfile::TempDir, PipelineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::load(dir.path()).unwrap();
        config.annotation.batch_delay_ms = 0;
        (dir, config)
    }

    fn write_ca_qtls(config: &PipelineConfig) {
        write_raw(
            config,
            "SNP,beta\n\
             chr12:9436083_rs61916194,0.42\n\
             chr3:1200_rs999,-0.1\n\
             garbage,0.3\n",
        );
    }

    fn write_raw(config: &PipelineConfig, csv: &str) {
        let path = config.raw_input_path(DatasetKind::CaQtls);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, csv).unwrap();
    }

    fn write_processed(config: &PipelineConfig, records: &[VariantRecord]) {
        let mut df = variant_records_to_df(records).unwrap();
        write_parquet(&mut df, &config.processed_path(DatasetKind::CaQtls)).unwrap();
    }

    #[test]
    fn prepare_then_predict_with_stub_collaborators() {
        let (_dir, config) = workspace();
        write_ca_qtls(&config);
        let opts = RunOptions::default();

        prepare_dataset(&config, DatasetKind::CaQtls, &opts, &OneHitResolver).unwrap();
        let processed = read_parquet(&config.processed_path(DatasetKind::CaQtls)).unwrap();
        let records = df_to_variant_records(&processed).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.variant_id.as_str()).collect();
        assert_eq!(ids, ["caQTL_0", "caQTL_1"]);
        assert_eq!(records[0].pos, Some(9283487));
        assert!(!records[1].has_known_alleles());

        let stub = StubScorer::new(&[]);
        predict_dataset(&config, DatasetKind::CaQtls, &opts, &stub).unwrap();
        // the sentinel row is never sent
        assert_eq!(stub.requests.borrow().len(), 1);

        let preds = load_predictions(&config, DatasetKind::CaQtls).unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].variant_id, "caQTL_0");
        assert_eq!(preds[0].beta, 0.42);
        assert!((preds[0].quantile_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn prepare_without_surviving_rows_writes_nothing() {
        let (_dir, config) = workspace();
        write_raw(&config, "SNP,beta\ngarbage,0.3\nnope,0.1\n");

        let opts = RunOptions::default();
        let err =
            prepare_dataset(&config, DatasetKind::CaQtls, &opts, &OneHitResolver).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoRecords(ds)) if ds == "caQTLs"
        ));
        assert!(!config.processed_path(DatasetKind::CaQtls).exists());
    }

    #[test]
    fn predict_without_scorable_variants_writes_nothing() {
        let (_dir, config) = workspace();
        let stub = StubScorer::new(&[]);
        let opts = RunOptions::default();

        for records in [vec![], vec![record("caQTL_0", "3", 1200, "N", "N")]] {
            write_processed(&config, &records);
            let err = predict_dataset(&config, DatasetKind::CaQtls, &opts, &stub).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<PipelineError>(),
                Some(PipelineError::NoScorableVariants(_))
            ));
            assert!(!config.predictions_path(DatasetKind::CaQtls).exists());
        }
        assert!(stub.requests.borrow().is_empty());
    }

    #[test]
    fn existing_output_is_not_recomputed_without_force() {
        let (_dir, config) = workspace();
        let output = config.predictions_path(DatasetKind::CaQtls);
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, b"placeholder").unwrap();

        let stub = StubScorer::new(&[]);
        predict_dataset(&config, DatasetKind::CaQtls, &RunOptions::default(), &stub).unwrap();
        assert!(stub.requests.borrow().is_empty());

        let forced = RunOptions {
            force: true,
            ..Default::default()
        };
        let err = predict_dataset(&config, DatasetKind::CaQtls, &forced, &stub).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput { stage: "prepare", .. })
        ));
    }

    #[test]
    fn missing_raw_input_is_fatal() {
        let (_dir, config) = workspace();
        let opts = RunOptions::default();
        let err = prepare_dataset(&config, DatasetKind::HQtls, &opts, &OneHitResolver).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingRawRelease(path))
                if *path == config.raw_input_path(DatasetKind::HQtls)
        ));
        assert!(err.to_string().contains("place the published table at"));
    }

    #[test]
    fn evaluate_writes_the_metrics_table() {
        let (_dir, config) = workspace();
        let preds: Vec<PredictionRecord> = [(0.1, 0.2), (0.5, 0.6), (-0.2, -0.4), (0.3, 0.1)]
            .iter()
            .enumerate()
            .map(|(i, &(q, beta))| PredictionRecord {
                variant_id: format!("caQTL_{i}"),
                chrom: "1".into(),
                pos: 100 + i as i64,
                ref_allele: "A".into(),
                alt_allele: "G".into(),
                beta,
                modality: "ATAC,DNase,H3K27ac".into(),
                quantile_score: q,
                raw_score: q,
                n_tracks: 2,
            })
            .collect();
        let mut df = prediction_records_to_df(&preds).unwrap();
        write_parquet(&mut df, &config.predictions_path(DatasetKind::CaQtls)).unwrap();

        evaluate_dataset(&config, DatasetKind::CaQtls, &RunOptions::default()).unwrap();
        let text = fs::read_to_string(config.metrics_path(DatasetKind::CaQtls)).unwrap();
        assert!(text.contains("n_variants: 4"));
        assert!(text.contains("spearman_r: 0.8000"));
    }
}
