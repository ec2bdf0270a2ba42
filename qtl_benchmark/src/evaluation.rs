use std::cmp::Ordering;
use std::fmt::Write as _;

use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::info;

use crate::error::PipelineError;
use crate::models::PredictionRecord;

// --------------------------------------------------------
//  Metrics
// --------------------------------------------------------

/// Agreement between predicted `quantile_score` and measured `beta`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationMetrics {
    pub n_variants: usize,
    pub spearman_r: f64,
    pub spearman_p: f64,
    pub pearson_r: f64,
    pub pearson_p: f64,
    pub score: ScoreSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub abs_mean: f64,
}

/// Correlates quantile scores with betas. Both are directional, so neither
/// side is transformed.
pub fn evaluate(predictions: &[PredictionRecord]) -> Result<EvaluationMetrics, PipelineError> {
    const MIN_VARIANTS: usize = 3;
    if predictions.len() < MIN_VARIANTS {
        return Err(PipelineError::TooFewVariants {
            needed: MIN_VARIANTS,
            got: predictions.len(),
        });
    }

    let scores: Vec<f64> = predictions.iter().map(|p| p.quantile_score).collect();
    let betas: Vec<f64> = predictions.iter().map(|p| p.beta).collect();
    let n = scores.len();

    let spearman_r = spearman_correlation(&scores, &betas).unwrap_or(f64::NAN);
    let pearson_r = pearson_correlation(&scores, &betas).unwrap_or(f64::NAN);

    Ok(EvaluationMetrics {
        n_variants: n,
        spearman_r,
        spearman_p: correlation_p_value(spearman_r, n),
        pearson_r,
        pearson_p: correlation_p_value(pearson_r, n),
        score: summarize(&scores),
    })
}

pub fn summarize(vals: &[f64]) -> ScoreSummary {
    let (min, max, mean) = basic_stats(vals);
    let abs_mean = if vals.is_empty() {
        f64::NAN
    } else {
        vals.iter().map(|v| v.abs()).sum::<f64>() / vals.len() as f64
    };
    ScoreSummary {
        mean,
        std: sample_std(vals),
        min,
        max,
        abs_mean,
    }
}

/// Metrics file body, one `key: value` line per statistic.
pub fn render_metrics(dataset: &str, m: &EvaluationMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} Evaluation", dataset);
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "n_variants: {}", m.n_variants);
    let _ = writeln!(out, "spearman_r: {}", fixed4(m.spearman_r));
    let _ = writeln!(out, "spearman_p: {}", format_sci(m.spearman_p));
    let _ = writeln!(out, "pearson_r: {}", fixed4(m.pearson_r));
    let _ = writeln!(out, "pearson_p: {}", format_sci(m.pearson_p));
    let _ = writeln!(out);
    let _ = writeln!(out, "Note: Correlating quantile_score with beta (directional effects)");
    let _ = writeln!(out);
    let _ = writeln!(out, "Score stats:");
    let _ = writeln!(out, "  mean: {}", fixed4(m.score.mean));
    let _ = writeln!(out, "  std: {}", fixed4(m.score.std));
    let _ = writeln!(out, "  range: [{}, {}]", fixed4(m.score.min), fixed4(m.score.max));
    let _ = writeln!(out, "  abs_mean: {}", fixed4(m.score.abs_mean));
    out
}

pub fn log_metrics(dataset: &str, m: &EvaluationMetrics) {
    info!("{} Results (n={}):", dataset, m.n_variants);
    info!("  Spearman r: {} (p={})", fixed4(m.spearman_r), format_sci(m.spearman_p));
    info!("  Pearson r:  {} (p={})", fixed4(m.pearson_r), format_sci(m.pearson_p));
}

fn fixed4(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else {
        format!("{:.4}", x)
    }
}

/// Scientific notation with two mantissa decimals and an at least two-digit
/// exponent (`1.23e-05`).
pub fn format_sci(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    let s = format!("{:.2e}", x);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => s,
    }
}

// --------------------------------------------------------
//  Basic Statistics and Correlations
// --------------------------------------------------------
pub fn basic_stats(vals: &[f64]) -> (f64, f64, f64) {
    if vals.is_empty() {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    let min = vals.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = vals.iter().sum::<f64>() / vals.len() as f64;
    (min, max, mean)
}

/// Standard deviation with one degree of freedom removed.
pub fn sample_std(vals: &[f64]) -> f64 {
    if vals.len() < 2 {
        return f64::NAN;
    }
    let n = vals.len() as f64;
    let mean = vals.iter().sum::<f64>() / n;
    let ss: f64 = vals.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (n - 1.0)).sqrt()
}

pub fn spearman_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.is_empty() {
        return None;
    }
    let rx = rank_data(x);
    let ry = rank_data(y);
    pearson_correlation(&rx, &ry)
}

/// 1-based ranks, ties share their average rank.
pub fn rank_data(vals: &[f64]) -> Vec<f64> {
    let mut indexed: Vec<(usize, f64)> = vals.iter().cloned().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut ranks = vec![0.0; vals.len()];
    let mut i = 0;
    while i < indexed.len() {
        let val = indexed[i].1;
        let mut j = i + 1;

        while j < indexed.len() && indexed[j].1.partial_cmp(&val) == Some(Ordering::Equal) {
            j += 1;
        }

        let avg_rank = ((i + 1) as f64 + j as f64) / 2.0;
        for item in &indexed[i..j] {
            ranks[item.0] = avg_rank;
        }

        i = j;
    }

    ranks
}

pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.is_empty() || x.len() != y.len() {
        return None;
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (mut num, mut denom_x, mut denom_y) = (0.0, 0.0, 0.0);
    for (&xx, &yy) in x.iter().zip(y.iter()) {
        let dx = xx - mean_x;
        let dy = yy - mean_y;
        num += dx * dy;
        denom_x += dx * dx;
        denom_y += dy * dy;
    }

    let denom = (denom_x * denom_y).sqrt();
    if denom == 0.0 {
        return None;
    }

    Some((num / denom).clamp(-1.0, 1.0))
}

/// Two-sided p-value of a correlation coefficient `r` over `n` pairs, from
/// the Student-t distribution with `n - 2` degrees of freedom.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if r.is_nan() || n < 3 {
        return f64::NAN;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r * (df / ((1.0 - r) * (1.0 + r))).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// Least-squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    pub fn r_squared(&self) -> f64 {
        self.r * self.r
    }
}

pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mean_x) * (v - mean_x)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mean_x) * (b - mean_y)).sum();
    let slope = sxy / sxx;
    Some(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
        r: pearson_correlation(x, y).unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(q: f64, beta: f64) -> PredictionRecord {
        PredictionRecord {
            variant_id: "caQTL_0".into(),
            chrom: "1".into(),
            pos: 1,
            ref_allele: "A".into(),
            alt_allele: "G".into(),
            beta,
            modality: "ATAC".into(),
            quantile_score: q,
            raw_score: q,
            n_tracks: 1,
        }
    }

    #[test]
    fn ranks_average_ties() {
        assert_eq!(rank_data(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn monotone_but_nonlinear_is_perfect_spearman() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 100.0];
        assert!((spearman_correlation(&x, &y).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson_correlation(&x, &y).unwrap() < 1.0);
    }

    #[test]
    fn p_value_matches_reference() {
        // r = 0.5 over 10 pairs: t = 1.63299, df = 8, two-sided p = 0.14111
        let p = correlation_p_value(0.5, 10);
        assert!((p - 0.14111).abs() < 1e-4, "p = {p}");
        assert_eq!(correlation_p_value(1.0, 10), 0.0);
        assert!(correlation_p_value(0.0, 10) > 0.999);
    }

    #[test]
    fn negative_effects_keep_their_sign() {
        let preds: Vec<PredictionRecord> = [(0.1, -0.2), (0.4, -0.9), (-0.3, 0.5), (0.0, 0.1)]
            .iter()
            .map(|&(q, b)| prediction(q, b))
            .collect();
        let m = evaluate(&preds).unwrap();
        assert_eq!(m.n_variants, 4);
        assert!(m.pearson_r < 0.0);
        assert!(m.spearman_r < 0.0);
        assert!((m.score.abs_mean - 0.2).abs() < 1e-12);
        assert!((m.score.min + 0.3).abs() < 1e-12);
    }

    #[test]
    fn too_few_variants() {
        let preds = vec![prediction(0.1, 0.2), prediction(0.2, 0.3)];
        assert!(matches!(
            evaluate(&preds),
            Err(PipelineError::TooFewVariants { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn sample_std_uses_n_minus_one() {
        assert!((sample_std(&[1.0, 2.0, 3.0, 4.0]) - 1.2909944487).abs() < 1e-9);
    }

    #[test]
    fn scientific_format_pads_exponent() {
        assert_eq!(format_sci(1.234e-5), "1.23e-05");
        assert_eq!(format_sci(0.5), "5.00e-01");
        assert_eq!(format_sci(0.0), "0.00e+00");
        assert_eq!(format_sci(f64::NAN), "nan");
    }

    #[test]
    fn metrics_file_lists_named_values() {
        let preds: Vec<PredictionRecord> = [(0.1, 0.2), (0.4, 0.9), (-0.3, -0.5)]
            .iter()
            .map(|&(q, b)| prediction(q, b))
            .collect();
        let text = render_metrics("caQTLs", &evaluate(&preds).unwrap());
        assert!(text.starts_with("caQTLs Evaluation\n"));
        let expected = [
            "n_variants: 3",
            "spearman_r: 1.0000",
            "spearman_p: 0.00e+00",
            "pearson_r:",
            "pearson_p:",
            "abs_mean:",
        ];
        for key in expected {
            assert!(text.contains(key), "missing {key}");
        }
    }

    #[test]
    fn regression_recovers_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let fit = linear_regression(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.r_squared() - 1.0).abs() < 1e-12);
        assert!(linear_regression(&[1.0, 1.0], &[0.0, 2.0]).is_none());
    }
}
