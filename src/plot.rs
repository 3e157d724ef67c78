use plotters::prelude::*;
use std::path::Path;

/// 等高線図1行分 (拡散係数場と解の場、いずれも `n × n` 行優先)。
#[derive(Debug, Clone)]
pub struct ContourRow {
    pub diffusivity: Vec<f32>,
    pub solution: Vec<f32>,
}

/// jet カラーマップ。`t` は [0, 1] にクランプされます。
pub fn jet(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let channel = |offset: f64| {
        let v = (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    RGBColor(channel(3.0), channel(2.0), channel(1.0))
}

fn value_range(values: &[f32]) -> (f64, f64) {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v as f64), hi.max(v as f64))
        });
    if min.is_finite() && max.is_finite() {
        (min, max)
    } else {
        (0.0, 1.0)
    }
}

fn draw_field<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    field: &[f32],
    n: usize,
) -> Result<(), Box<dyn std::error::Error>>
where
    DB::ErrorType: 'static,
{
    let (width, height) = area.dim_in_pixel();
    let margin = 4i32;
    let bar_width = 10i32;
    let size = (width as i32 - 3 * margin - bar_width).min(height as i32 - 2 * margin).max(n as i32);
    let cell = (size / n as i32).max(1);
    let (lo, hi) = value_range(field);
    let span = if hi > lo { hi - lo } else { 1.0 };

    for (idx, &v) in field.iter().enumerate().take(n * n) {
        let (row, col) = ((idx / n) as i32, (idx % n) as i32);
        let x0 = margin + col * cell;
        let y0 = margin + row * cell;
        let color = jet((v as f64 - lo) / span);
        area.draw(&Rectangle::new([(x0, y0), (x0 + cell, y0 + cell)], color.filled()))?;
    }

    // カラーバー (上が最大値)
    let bar_x = 2 * margin + n as i32 * cell;
    let bar_height = n as i32 * cell;
    for y in 0..bar_height {
        let t = 1.0 - y as f64 / (bar_height - 1).max(1) as f64;
        area.draw(&Rectangle::new(
            [(bar_x, margin + y), (bar_x + bar_width, margin + y + 1)],
            jet(t).filled(),
        ))?;
    }
    Ok(())
}

/// 各行に拡散係数場と解の場を並べた等高線図を PNG に保存します。
pub fn plot_contours(
    path: &Path,
    rows: &[ContourRow],
    n: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows_count = rows.len().max(1) as u32;
    let root = BitMapBackend::new(path, (2 * 200, rows_count * 120)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((rows.len().max(1), 2));
    for (row, pair) in rows.iter().zip(panels.chunks(2)) {
        draw_field(&pair[0], &row.diffusivity, n)?;
        draw_field(&pair[1], &row.solution, n)?;
    }
    root.present()?;
    Ok(())
}

/// 学習過程のエポック平均損失をグラフとして PNG ファイルに出力します。
///
/// エネルギー形式の損失は負になり得るため、縦軸は線形スケールです。
pub fn plot_loss_history(
    path: &Path,
    loss_hist: &[f32],
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (lo, hi) = value_range(loss_hist);
    let pad = if hi > lo { 0.05 * (hi - lo) } else { 0.5 };
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0..loss_hist.len().max(1), (lo - pad)..(hi + pad))?;
    chart
        .configure_mesh()
        .y_desc("PDE Loss")
        .x_desc("Epochs")
        .draw()?;
    chart
        .draw_series(LineSeries::new(
            loss_hist
                .iter()
                .enumerate()
                .map(|(i, &val)| (i, val as f64)),
            &RED,
        ))?
        .label("PDE Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
