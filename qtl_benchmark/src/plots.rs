use std::cmp::Ordering;
use std::error::Error;
use std::ops::Range;
use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use crate::evaluation::{
    basic_stats, format_sci, linear_regression, sample_std, EvaluationMetrics, LinearFit,
};
use crate::models::PredictionRecord;

const PLOT_WIDTH: u32 = 1000;
const PLOT_HEIGHT: u32 = 750;
const PANEL_WIDTH: u32 = 1400;
const PLOT_MARGIN: i32 = 20;
const FONT_SIZE_TITLE: u32 = 22;
const FONT_SIZE_PANEL: u32 = 17;
const HISTOGRAM_BINS: usize = 50;
const TOP_N: usize = 20;

const STEELBLUE: RGBColor = RGBColor(70, 130, 180);
const CORAL: RGBColor = RGBColor(255, 127, 80);
const PURPLE: RGBColor = RGBColor(128, 0, 128);
const DARK_GREEN: RGBColor = RGBColor(0, 128, 0);
const WHEAT: RGBColor = RGBColor(245, 222, 179);

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

// --------------------------------------------------------
//  Figures
// --------------------------------------------------------

/// Predicted quantile score against measured beta with the least-squares line.
pub fn plot_correlation(
    output_path: &Path,
    dataset: &str,
    preds: &[PredictionRecord],
    metrics: &EvaluationMetrics,
) -> Result<(), Box<dyn Error>> {
    let (scores, betas) = columns(preds);
    if scores.is_empty() {
        info!("No data for correlation plot: {}", output_path.display());
        return Ok(());
    }

    let root_area = BitMapBackend::new(output_path, (PLOT_WIDTH, PLOT_HEIGHT)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let x_range = padded_range(&scores);
    let y_range = padded_range(&betas);
    let mut chart = ChartBuilder::on(&root_area)
        .margin(PLOT_MARGIN)
        .caption(
            format!(
                "{} - AlphaGenome Predictions vs QTL Effects (n={} variants)",
                dataset,
                preds.len()
            ),
            ("sans-serif", FONT_SIZE_TITLE),
        )
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range.clone(), y_range.clone())?;

    chart
        .configure_mesh()
        .light_line_style(BLACK.mix(0.05))
        .x_desc("AlphaGenome Quantile Score")
        .y_desc("QTL Effect Size (Beta)")
        .draw()?;

    chart.draw_series(
        scores
            .iter()
            .zip(betas.iter())
            .map(|(&x, &y)| Circle::new((x, y), 3, STEELBLUE.mix(0.5).filled())),
    )?;

    if let Some(fit) = linear_regression(&scores, &betas) {
        let (min_x, max_x, _) = basic_stats(&scores);
        chart
            .draw_series(LineSeries::new(
                vec![(min_x, fit.predict(min_x)), (max_x, fit.predict(max_x))],
                RED.stroke_width(2),
            ))?
            .label(format!("Linear fit (R²={:.3})", fit.r_squared()))
            .legend(|(x, y)| PathElement::new(vec![(x - 10, y), (x + 10, y)], RED.stroke_width(2)));
    }

    // Stats box, upper left in data coordinates
    let x_span = x_range.end - x_range.start;
    let y_span = y_range.end - y_range.start;
    let left = x_range.start + 0.02 * x_span;
    let top = y_range.end - 0.02 * y_span;
    chart.draw_series(std::iter::once(Rectangle::new(
        [(left, top), (left + 0.28 * x_span, top - 0.22 * y_span)],
        WHEAT.mix(0.8).filled(),
    )))?;
    let lines = [
        format!("Spearman r = {:.3}", metrics.spearman_r),
        format!("p = {}", format_sci(metrics.spearman_p)),
        format!("Pearson r = {:.3}", metrics.pearson_r),
        format!("p = {}", format_sci(metrics.pearson_p)),
    ];
    chart.draw_series(lines.iter().enumerate().map(|(i, line)| {
        Text::new(
            line.clone(),
            (left + 0.015 * x_span, top - (0.02 + 0.05 * i as f64) * y_span),
            ("sans-serif", 15).into_font().color(&BLACK),
        )
    }))?;

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root_area.present()?;
    info!("Saved correlation plot: {}", output_path.display());
    Ok(())
}

/// 2×2 panel: score and beta histograms, magnitude overlay, sign agreement.
pub fn plot_distributions(
    output_path: &Path,
    dataset: &str,
    preds: &[PredictionRecord],
) -> Result<(), Box<dyn Error>> {
    let (scores, betas) = columns(preds);
    if scores.is_empty() {
        info!("No data for distribution plot: {}", output_path.display());
        return Ok(());
    }

    let root_area =
        BitMapBackend::new(output_path, (PANEL_WIDTH, PANEL_WIDTH * 5 / 7)).into_drawing_area();
    root_area.fill(&WHITE)?;
    let root_area = root_area.titled(
        &format!("{} - Distribution Analysis", dataset),
        ("sans-serif", FONT_SIZE_TITLE),
    )?;
    let panels = root_area.split_evenly((2, 2));

    let (_, _, score_mean) = basic_stats(&scores);
    draw_histograms(
        &panels[0],
        "Distribution of AlphaGenome Scores",
        "Quantile Score",
        &[HistogramLayer::new(&scores, STEELBLUE, 0.7, None)],
        Some((score_mean, format!("Mean: {:.3}", score_mean))),
    )?;

    let (_, _, beta_mean) = basic_stats(&betas);
    draw_histograms(
        &panels[1],
        "Distribution of QTL Effect Sizes",
        "QTL Beta",
        &[HistogramLayer::new(&betas, CORAL, 0.7, None)],
        Some((beta_mean, format!("Mean: {:.3}", beta_mean))),
    )?;

    let magnitudes: Vec<f64> = scores.iter().map(|s| s.abs()).collect();
    draw_histograms(
        &panels[2],
        "Magnitude Comparison",
        "Value",
        &[
            HistogramLayer::new(&magnitudes, STEELBLUE, 0.5, Some("|Quantile Score|")),
            HistogramLayer::new(&betas, CORAL, 0.5, Some("QTL Beta")),
        ],
        None,
    )?;

    draw_sign_agreement(&panels[3], &scores, &betas)?;

    root_area.present()?;
    info!("Saved distribution plot: {}", output_path.display());
    Ok(())
}

/// Residuals of the least-squares fit of beta on quantile score.
pub fn plot_residuals(
    output_path: &Path,
    dataset: &str,
    preds: &[PredictionRecord],
) -> Result<(), Box<dyn Error>> {
    let (scores, betas) = columns(preds);
    if scores.is_empty() {
        info!("No data for residual plot: {}", output_path.display());
        return Ok(());
    }
    let fit = residual_fit(&scores, &betas);
    let fitted: Vec<f64> = scores.iter().map(|&s| fit.predict(s)).collect();
    let residuals: Vec<f64> = betas.iter().zip(&fitted).map(|(b, f)| b - f).collect();

    let root_area =
        BitMapBackend::new(output_path, (PANEL_WIDTH, PANEL_WIDTH * 5 / 14)).into_drawing_area();
    root_area.fill(&WHITE)?;
    let root_area = root_area.titled(
        &format!("{} - Residual Analysis", dataset),
        ("sans-serif", FONT_SIZE_TITLE),
    )?;
    let panels = root_area.split_evenly((1, 2));

    let x_range = padded_range(&fitted);
    let mut chart = ChartBuilder::on(&panels[0])
        .margin(PLOT_MARGIN)
        .caption("Residual Plot", ("sans-serif", FONT_SIZE_PANEL))
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range.clone(), padded_range(&residuals))?;
    chart
        .configure_mesh()
        .light_line_style(BLACK.mix(0.05))
        .x_desc("Predicted Beta")
        .y_desc("Residual (Observed - Predicted)")
        .draw()?;
    chart.draw_series(
        fitted
            .iter()
            .zip(residuals.iter())
            .map(|(&x, &y)| Circle::new((x, y), 3, PURPLE.mix(0.5).filled())),
    )?;
    chart.draw_series(LineSeries::new(
        vec![(x_range.start, 0.0), (x_range.end, 0.0)],
        RED.stroke_width(2),
    ))?;

    let (_, _, mean) = basic_stats(&residuals);
    draw_histograms(
        &panels[1],
        &format!(
            "Residual Distribution (Mean = {:.4}, Std = {:.4})",
            mean,
            sample_std(&residuals)
        ),
        "Residual",
        &[HistogramLayer::new(&residuals, PURPLE, 0.7, None)],
        Some((0.0, "Zero".to_string())),
    )?;

    root_area.present()?;
    info!("Saved residual plot: {}", output_path.display());
    Ok(())
}

/// Top variants by predicted score and by measured beta, side by side.
pub fn plot_top_variants(
    output_path: &Path,
    dataset: &str,
    preds: &[PredictionRecord],
) -> Result<(), Box<dyn Error>> {
    if preds.is_empty() {
        info!("No data for top-variant plot: {}", output_path.display());
        return Ok(());
    }

    let root_area =
        BitMapBackend::new(output_path, (PANEL_WIDTH, PANEL_WIDTH * 4 / 7)).into_drawing_area();
    root_area.fill(&WHITE)?;
    let root_area = root_area.titled(
        &format!("{} - Top Variants", dataset),
        ("sans-serif", FONT_SIZE_TITLE),
    )?;
    let panels = root_area.split_evenly((1, 2));

    let by_score: Vec<(String, f64, RGBColor)> = top_n(preds, TOP_N, |p| p.quantile_score)
        .into_iter()
        .map(|p| {
            let color = if p.quantile_score > 0.0 { DARK_GREEN } else { RED };
            (p.variant_id.clone(), p.quantile_score, color)
        })
        .collect();
    draw_ranked_bars(
        &panels[0],
        &format!("Top {} by AlphaGenome Score", TOP_N),
        "Quantile Score",
        &by_score,
    )?;

    let by_beta: Vec<(String, f64, RGBColor)> = top_n(preds, TOP_N, |p| p.beta)
        .into_iter()
        .map(|p| (p.variant_id.clone(), p.beta, CORAL))
        .collect();
    draw_ranked_bars(
        &panels[1],
        &format!("Top {} by QTL Effect Size", TOP_N),
        "QTL Beta",
        &by_beta,
    )?;

    root_area.present()?;
    info!("Saved top variants plot: {}", output_path.display());
    Ok(())
}

// --------------------------------------------------------
//  Panels
// --------------------------------------------------------

struct HistogramLayer<'a> {
    values: &'a [f64],
    color: RGBColor,
    alpha: f64,
    label: Option<&'static str>,
}

impl<'a> HistogramLayer<'a> {
    fn new(values: &'a [f64], color: RGBColor, alpha: f64, label: Option<&'static str>) -> Self {
        Self {
            values,
            color,
            alpha,
            label,
        }
    }
}

fn draw_histograms(
    area: &Area,
    title: &str,
    x_desc: &str,
    layers: &[HistogramLayer],
    marker: Option<(f64, String)>,
) -> Result<(), Box<dyn Error>> {
    let mut all: Vec<f64> = layers.iter().flat_map(|l| l.values.iter().cloned()).collect();
    if let Some((x, _)) = &marker {
        all.push(*x);
    }
    let x_range = padded_range(&all);

    let binned: Vec<Vec<usize>> = layers
        .iter()
        .map(|l| histogram_counts(l.values, &x_range, HISTOGRAM_BINS))
        .collect();
    let max_count = binned.iter().flatten().copied().max().unwrap_or(0).max(1);
    let y_max = max_count as f64 * 1.1;
    let bin_width = (x_range.end - x_range.start) / HISTOGRAM_BINS as f64;

    let mut chart = ChartBuilder::on(area)
        .margin(PLOT_MARGIN)
        .caption(title, ("sans-serif", FONT_SIZE_PANEL))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range.clone(), 0.0..y_max)?;
    chart
        .configure_mesh()
        .light_line_style(BLACK.mix(0.05))
        .x_desc(x_desc)
        .y_desc("Count")
        .y_label_formatter(&|v: &f64| format!("{:.0}", v))
        .draw()?;

    let mut labelled = false;
    for (layer, counts) in layers.iter().zip(&binned) {
        let start = x_range.start;
        let fill = layer.color.mix(layer.alpha).filled();
        let series = chart.draw_series(counts.iter().enumerate().filter(|(_, &c)| c > 0).map(
            |(i, &c)| {
                let x0 = start + i as f64 * bin_width;
                Rectangle::new([(x0, 0.0), (x0 + bin_width, c as f64)], fill)
            },
        ))?;
        if let Some(label) = layer.label {
            let color = layer.color;
            series
                .label(label)
                .legend(move |(x, y)| {
                    Rectangle::new([(x - 5, y - 5), (x + 5, y + 5)], color.filled())
                });
            labelled = true;
        }
    }

    if let Some((x, label)) = marker {
        chart
            .draw_series(LineSeries::new(vec![(x, 0.0), (x, y_max)], RED.stroke_width(2)))?
            .label(label)
            .legend(|(x, y)| PathElement::new(vec![(x - 10, y), (x + 10, y)], RED.stroke_width(2)));
        labelled = true;
    }

    if labelled {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_sign_agreement(area: &Area, scores: &[f64], betas: &[f64]) -> Result<(), Box<dyn Error>> {
    let (same, opposite) = sign_agreement(scores, betas);
    let pct = same as f64 / scores.len().max(1) as f64 * 100.0;
    let y_max = (same.max(opposite).max(1)) as f64 * 1.15;

    let mut chart = ChartBuilder::on(area)
        .margin(PLOT_MARGIN)
        .caption(
            format!("Directional Agreement: {:.1}% same sign", pct),
            ("sans-serif", FONT_SIZE_PANEL),
        )
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5..1.5, 0.0..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_x_axis()
        .light_line_style(BLACK.mix(0.05))
        .y_desc("Count")
        .y_label_formatter(&|v: &f64| format!("{:.0}", v))
        .draw()?;

    let bars = [("Same Sign", same, DARK_GREEN), ("Opposite Sign", opposite, RED)];
    chart.draw_series(bars.iter().enumerate().map(|(i, (_, count, color))| {
        let x = i as f64;
        Rectangle::new([(x - 0.3, 0.0), (x + 0.3, *count as f64)], color.mix(0.7).filled())
    }))?;
    chart.draw_series(bars.iter().enumerate().map(|(i, (name, count, _))| {
        Text::new(
            format!("{}: {}", name, count),
            (i as f64 - 0.25, *count as f64 + y_max * 0.04),
            ("sans-serif", 15).into_font().color(&BLACK),
        )
    }))?;
    Ok(())
}

/// Horizontal bars, first entry on top.
fn draw_ranked_bars(
    area: &Area,
    title: &str,
    x_desc: &str,
    bars: &[(String, f64, RGBColor)],
) -> Result<(), Box<dyn Error>> {
    let n = bars.len();
    let mut extent: Vec<f64> = bars.iter().map(|(_, v, _)| *v).collect();
    extent.push(0.0);
    let x_range = padded_range(&extent);
    let labels: Vec<&str> = bars.iter().map(|(id, _, _)| id.as_str()).collect();

    let mut chart = ChartBuilder::on(area)
        .margin(PLOT_MARGIN)
        .caption(title, ("sans-serif", FONT_SIZE_PANEL))
        .x_label_area_size(40)
        .y_label_area_size(110)
        .build_cartesian_2d(x_range, -0.5..(n as f64 - 0.5))?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .light_line_style(BLACK.mix(0.05))
        .x_desc(x_desc)
        .y_labels(n)
        .y_label_style(("sans-serif", 11))
        .y_label_formatter(&|v: &f64| {
            let slot = v.round();
            if (v - slot).abs() > 1e-6 || slot < 0.0 {
                return String::new();
            }
            // slot 0 is the bottom row
            let idx = n.saturating_sub(1).saturating_sub(slot as usize);
            labels.get(idx).map(|s| s.to_string()).unwrap_or_default()
        })
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, value, color))| {
        let y = (n - 1 - i) as f64;
        Rectangle::new([(0.0, y - 0.4), (*value, y + 0.4)], color.mix(0.7).filled())
    }))?;
    Ok(())
}

// --------------------------------------------------------
//  Helpers
// --------------------------------------------------------

/// Least-squares fit of beta on score. With constant scores the best line is
/// flat at the mean beta.
fn residual_fit(scores: &[f64], betas: &[f64]) -> LinearFit {
    linear_regression(scores, betas).unwrap_or_else(|| {
        info!("Scores are constant; residuals taken against the mean beta");
        LinearFit {
            slope: 0.0,
            intercept: basic_stats(betas).2,
            r: 0.0,
        }
    })
}

fn columns(preds: &[PredictionRecord]) -> (Vec<f64>, Vec<f64>) {
    preds.iter().map(|p| (p.quantile_score, p.beta)).unzip()
}

/// Data range widened by 5% on each side; a flat or empty range is widened
/// to a unit interval.
fn padded_range(vals: &[f64]) -> Range<f64> {
    let finite: Vec<f64> = vals.iter().cloned().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return -1.0..1.0;
    }
    let (min, max, _) = basic_stats(&finite);
    if max <= min {
        return (min - 0.5)..(max + 0.5);
    }
    let pad = (max - min) * 0.05;
    (min - pad)..(max + pad)
}

fn histogram_counts(vals: &[f64], range: &Range<f64>, bins: usize) -> Vec<usize> {
    let mut counts = vec![0usize; bins];
    let width = (range.end - range.start) / bins as f64;
    if width <= 0.0 {
        return counts;
    }
    for &v in vals.iter().filter(|v| v.is_finite()) {
        let idx = ((v - range.start) / width).floor() as isize;
        counts[idx.clamp(0, bins as isize - 1) as usize] += 1;
    }
    counts
}

fn sign(x: f64) -> i8 {
    match x.partial_cmp(&0.0) {
        Some(Ordering::Greater) => 1,
        Some(Ordering::Less) => -1,
        _ => 0,
    }
}

/// Pairs whose signs match (zero only matches zero) and pairs whose don't.
fn sign_agreement(scores: &[f64], betas: &[f64]) -> (usize, usize) {
    let same = scores
        .iter()
        .zip(betas)
        .filter(|(s, b)| sign(**s) == sign(**b))
        .count();
    (same, scores.len().min(betas.len()) - same)
}

/// Largest `n` by `key`, descending; ties keep input order.
fn top_n<F>(preds: &[PredictionRecord], n: usize, key: F) -> Vec<&PredictionRecord>
where
    F: Fn(&PredictionRecord) -> f64,
{
    let mut sorted: Vec<&PredictionRecord> = preds.iter().collect();
    sorted.sort_by(|a, b| key(b).total_cmp(&key(a)));
    sorted.truncate(n);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(id: &str, q: f64, beta: f64) -> PredictionRecord {
        PredictionRecord {
            variant_id: id.into(),
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
    fn top_n_is_descending_and_truncated() {
        let preds: Vec<PredictionRecord> = (0..30)
            .map(|i| prediction(&format!("caQTL_{i}"), i as f64 / 10.0 - 1.0, -(i as f64)))
            .collect();
        let top = top_n(&preds, TOP_N, |p| p.quantile_score);
        assert_eq!(top.len(), 20);
        assert_eq!(top[0].variant_id, "caQTL_29");
        assert_eq!(top[19].variant_id, "caQTL_10");

        let by_beta = top_n(&preds, 3, |p| p.beta);
        let ids: Vec<&str> = by_beta.iter().map(|p| p.variant_id.as_str()).collect();
        assert_eq!(ids, ["caQTL_0", "caQTL_1", "caQTL_2"]);
    }

    #[test]
    fn sign_agreement_treats_zero_as_its_own_sign() {
        let scores = [0.5, -0.2, 0.0, 0.1];
        let betas = [1.0, 0.3, 0.0, -0.1];
        assert_eq!(sign_agreement(&scores, &betas), (2, 2));
    }

    #[test]
    fn histogram_keeps_every_finite_value() {
        let vals = [0.0, 0.5, 1.0, 1.0, f64::NAN];
        let range = padded_range(&vals);
        let counts = histogram_counts(&vals, &range, 10);
        assert_eq!(counts.iter().sum::<usize>(), 4);
        // the maximum lands in a bin, not past the end
        assert_eq!(counts.iter().rev().find(|&&c| c > 0), Some(&2));
    }

    #[test]
    fn constant_scores_fall_back_to_a_flat_fit() {
        let fit = residual_fit(&[0.5, 0.5, 0.5], &[1.0, 2.0, 6.0]);
        assert_eq!(fit.slope, 0.0);
        assert!((fit.predict(0.5) - 3.0).abs() < 1e-12);

        let fit = residual_fit(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]);
        assert!((fit.slope - 2.0).abs() < 1e-12);
    }

    #[test]
    fn flat_ranges_are_widened() {
        assert_eq!(padded_range(&[2.0, 2.0]), 1.5..2.5);
        assert_eq!(padded_range(&[]), -1.0..1.0);
        let r = padded_range(&[0.0, 10.0]);
        assert!((r.start + 0.5).abs() < 1e-12 && (r.end - 10.5).abs() < 1e-12);
    }
}
