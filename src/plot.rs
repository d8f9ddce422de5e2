use anyhow::Result;
use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

use crate::cluster::ClusterResult;

const FIGURE_SIZE: (u32, u32) = (1800, 1100);

fn padded_range<I: Iterator<Item = f64>>(values: I) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { 0.05 * (hi - lo) } else { 1.0 };
    return (lo - pad)..(hi + pad);
}

// Scatter the first two projected coordinates coloured by cluster label.
fn draw_scatter(
    area: &DrawingArea<BitMapBackend, Shift>,
    projection: &Array2<f64>,
    result: &ClusterResult,
) -> Result<()> {
    let xs = padded_range(projection.column(0).iter().cloned());
    let ys = padded_range(projection.column(1).iter().cloned());

    let mut chart = ChartBuilder::on(area)
        .caption(&result.name, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(xs, ys)?;

    chart.configure_mesh().x_desc("PC1").y_desc("PC2").draw()?;

    chart.draw_series(
        projection
            .rows()
            .into_iter()
            .zip(&result.labels)
            .map(|(row, &label)| Circle::new((row[0], row[1]), 4, Palette99::pick(label).filled())),
    )?;

    Ok(())
}

fn draw_elbow(area: &DrawingArea<BitMapBackend, Shift>, curve: &[(usize, f64)]) -> Result<()> {
    let kmax = curve.iter().map(|(k, _)| *k).max().unwrap_or(1) as f64;
    let ys = padded_range(curve.iter().map(|(_, d)| *d));

    let mut chart = ChartBuilder::on(area)
        .caption("Elbow method", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0.5..(kmax + 0.5), ys)?;

    chart.configure_mesh().x_desc("k").y_desc("distortion").draw()?;

    let points: Vec<(f64, f64)> = curve.iter().map(|&(k, d)| (k as f64, d)).collect();
    chart.draw_series(LineSeries::new(points.iter().cloned(), &BLUE))?;
    chart.draw_series(points.iter().map(|&p| Circle::new(p, 3, BLUE.filled())))?;

    Ok(())
}

fn heat_color(v: f64) -> RGBColor {
    if !v.is_finite() {
        return RGBColor(160, 160, 160);
    }
    let v = v.clamp(0.0, 1.0);
    let fade = |c: u8| (255.0 - v * (255.0 - c as f64)) as u8;
    RGBColor(fade(8), fade(48), fade(107))
}

fn draw_heatmap(area: &DrawingArea<BitMapBackend, Shift>, matrix: &Array2<f64>) -> Result<()> {
    let (nrows, ncols) = matrix.dim();

    let mut chart = ChartBuilder::on(area)
        .caption("Filament / class occupancy", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..(ncols.max(1) as f64), 0.0..(nrows.max(1) as f64))?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("class")
        .y_desc("filament")
        .draw()?;

    // first filament at the top
    chart.draw_series(matrix.indexed_iter().map(|((f, c), &v)| {
        let (x, y) = (c as f64, (nrows - f - 1) as f64);
        Rectangle::new([(x, y), (x + 1.0, y + 1.0)], heat_color(v).filled())
    }))?;

    Ok(())
}

/// Write the 2x3 summary figure: one scatter per clustering (up to four),
/// the elbow curve and the normalized matrix.
pub fn render_figure(
    path: &Path,
    projection: &Array2<f64>,
    results: &[ClusterResult],
    elbow: &[(usize, f64)],
    normalized: &Array2<f64>,
) -> Result<()> {
    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 3));

    for (panel, result) in [0, 1, 3, 4].iter().zip(results) {
        draw_scatter(&panels[*panel], projection, result)?;
    }
    draw_elbow(&panels[2], elbow)?;
    draw_heatmap(&panels[5], normalized)?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_padded() {
        let r = padded_range([0.0, 10.0].into_iter());
        assert!((r.start + 0.5).abs() < 1e-12);
        assert!((r.end - 10.5).abs() < 1e-12);

        let r = padded_range([3.0, f64::NAN].into_iter());
        assert_eq!(r, 2.0..4.0);

        assert_eq!(padded_range(std::iter::empty()), 0.0..1.0);
    }

    #[test]
    fn heat_colors() {
        assert_eq!(heat_color(0.0).rgb(), (255, 255, 255));
        assert_eq!(heat_color(1.0).rgb(), (8, 48, 107));
        assert_eq!(heat_color(f64::NAN).rgb(), (160, 160, 160));
    }
}
