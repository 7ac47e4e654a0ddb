//! SVG Chart Generator
//!
//! Writes standalone SVG files for the training curves and the confusion
//! matrix. No plotting backend is required; the markup is built by hand.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::training::history::{EpochRecord, TrainingHistory};
use crate::utils::metrics::ConfusionMatrix;
use crate::Result;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

pub const COLOR_TRAIN: &str = "#3498db";
pub const COLOR_VALIDATION: &str = "#e67e22";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// A data series for line charts
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: &str, points: Vec<(f64, f64)>, color: &str) -> Self {
        Self {
            name: name.to_string(),
            points,
            color: color.to_string(),
        }
    }
}

/// Generate a line chart SVG.
///
/// The y axis spans the data range, padded by 5% and anchored at zero when
/// all values are non-negative.
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, y_min, y_max) = find_ranges(series);
    let x_span = if x_max > x_min { x_max - x_min } else { 1.0 };
    let y_span = if y_max > y_min { y_max - y_min } else { 1.0 };

    let sx = |x: f64| MARGIN_LEFT + ((x - x_min) / x_span) * plot_width;
    let sy = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / y_span) * plot_height;

    let mut svg = svg_header(CHART_WIDTH, CHART_HEIGHT);
    push_title(&mut svg, title);

    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * y_span;
        let y = sy(value);
        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.3}</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, COLOR_TEXT, value
        );
    }

    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP + plot_height, MARGIN_LEFT + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    );
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS
    );
    push_axis_labels(&mut svg, x_label, y_label, MARGIN_LEFT + plot_width / 2.0);

    for data in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = data
            .points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| format!("{} {} {}", if i == 0 { "M" } else { "L" }, sx(x), sy(y)))
            .collect();
        let _ = write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2.5"/>"#,
            path.join(" "),
            data.color
        );
        for &(x, y) in &data.points {
            let _ = write!(
                svg,
                r#"<circle cx="{}" cy="{}" r="3.5" fill="{}" stroke="white" stroke-width="1.5"/>"#,
                sx(x), sy(y), data.color
            );
        }
    }

    // x tick labels from the first series, thinned to at most ~12 ticks
    if let Some(first) = series.first() {
        let step = (first.points.len() / 12).max(1);
        for &(x, _) in first.points.iter().step_by(step) {
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
                sx(x), MARGIN_TOP + plot_height + 20.0, COLOR_TEXT, x
            );
        }
    }

    let mut legend_y = MARGIN_TOP + 10.0;
    for data in series {
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 130.0, legend_y, data.color
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 110.0, legend_y + 12.0, COLOR_TEXT, escape_xml(&data.name)
        );
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    fs::write(output_path, svg)
}

/// Render a confusion matrix as a green heat-map with per-cell counts
pub fn generate_confusion_matrix(
    cm: &ConfusionMatrix,
    class_names: &[String],
    output_path: &Path,
) -> std::io::Result<()> {
    let n = cm.num_classes.max(1);
    let cell = (520.0 / n as f64).clamp(14.0, 60.0);
    let label_space = 160.0;
    let grid = cell * n as f64;
    let width = label_space + grid + 60.0;
    let height = MARGIN_TOP + grid + label_space;
    let max = cm.max_cell().max(1) as f64;

    let mut svg = svg_header(width, height);
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">Confusion Matrix</text>"#,
        width / 2.0, COLOR_TEXT
    );

    for row in 0..cm.num_classes {
        for col in 0..cm.num_classes {
            let count = cm.get(row, col);
            let intensity = count as f64 / max;
            let x = label_space + col as f64 * cell;
            let y = MARGIN_TOP + row as f64 * cell;
            let _ = write!(
                svg,
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"#,
                x, y, cell, cell, green_shade(intensity)
            );
            if cell >= 20.0 {
                let text_color = if intensity > 0.5 { "white" } else { COLOR_TEXT };
                let _ = write!(
                    svg,
                    r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="{}" fill="{}">{}</text>"#,
                    x + cell / 2.0, y + cell / 2.0 + 4.0, (cell / 3.5).min(13.0), text_color, count
                );
            }
        }
    }

    let name = |i: usize| class_names.get(i).cloned().unwrap_or_else(|| i.to_string());
    for i in 0..cm.num_classes {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
            label_space - 6.0, MARGIN_TOP + i as f64 * cell + cell / 2.0 + 4.0, COLOR_TEXT, escape_xml(&name(i))
        );
        let cx = label_space + i as f64 * cell + cell / 2.0;
        let cy = MARGIN_TOP + grid + 8.0;
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}" transform="rotate(-60 {} {})">{}</text>"#,
            cx, cy, COLOR_TEXT, cx, cy, escape_xml(&name(i))
        );
    }

    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">Predicted</text>"#,
        label_space + grid / 2.0, height - 15.0, COLOR_TEXT
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">Actual</text>"#,
        MARGIN_TOP + grid / 2.0, COLOR_TEXT, MARGIN_TOP + grid / 2.0
    );

    svg.push_str("</svg>");
    fs::write(output_path, svg)
}

/// Plot accuracy and loss curves from a training log CSV.
///
/// Writes `accuracy.svg` and `loss.svg` next to the log and returns their paths.
pub fn plot_log(log_path: &Path) -> Result<Vec<PathBuf>> {
    let history = TrainingHistory::load_csv(log_path)?;
    let out_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    plot_history(&history, out_dir)
}

/// Plot accuracy and loss curves from an in-memory history
pub fn plot_history(history: &TrainingHistory, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let accuracy_path = out_dir.join("accuracy.svg");
    generate_line_chart(
        "Accuracy",
        "Epoch",
        "Accuracy",
        &[
            DataSeries::new("train", curve(history, |r| r.accuracy), COLOR_TRAIN),
            DataSeries::new("validation", curve(history, |r| r.val_accuracy), COLOR_VALIDATION),
        ],
        &accuracy_path,
    )?;

    let loss_path = out_dir.join("loss.svg");
    generate_line_chart(
        "Loss",
        "Epoch",
        "Loss",
        &[
            DataSeries::new("train", curve(history, |r| r.loss), COLOR_TRAIN),
            DataSeries::new("validation", curve(history, |r| r.val_loss), COLOR_VALIDATION),
        ],
        &loss_path,
    )?;

    Ok(vec![accuracy_path, loss_path])
}

fn curve(history: &TrainingHistory, value: impl Fn(&EpochRecord) -> f64) -> Vec<(f64, f64)> {
    history
        .records
        .iter()
        .map(|r| (r.epoch as f64, value(r)))
        .collect()
}

fn svg_header(width: f64, height: f64) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}"><rect width="{w}" height="{h}" fill="white"/>"#,
        w = width,
        h = height
    )
}

fn push_title(svg: &mut String, title: &str) {
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0, COLOR_TEXT, escape_xml(title)
    );
}

fn push_axis_labels(svg: &mut String, x_label: &str, y_label: &str, x_center: f64) {
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        x_center, CHART_HEIGHT - 20.0, COLOR_TEXT, escape_xml(x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0, COLOR_TEXT, CHART_HEIGHT / 2.0, escape_xml(y_label)
    );
}

/// Interpolate from near-white to dark green
fn green_shade(intensity: f64) -> String {
    let t = intensity.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(247.0, 0.0), lerp(252.0, 68.0), lerp(245.0, 27.0))
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let points = series.iter().flat_map(|s| s.points.iter());
    let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if !x_min.is_finite() {
        return (0.0, 1.0, 0.0, 1.0);
    }
    if y_min >= 0.0 {
        y_min = 0.0;
    }
    let pad = (y_max - y_min).abs() * 0.05;
    (x_min, x_max, y_min, y_max + pad)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
