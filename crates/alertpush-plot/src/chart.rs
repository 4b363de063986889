use crate::error::{PlotError, Result};
use crate::expr::Operator;
use crate::matrix::Series;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{register_font, FontStyle};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 20x10 cm at 96 DPI.
pub const WIDTH: u32 = 756;
pub const HEIGHT: u32 = 378;
/// 6 mm.
const MARGIN: u32 = 23;

const FONT_FAMILY: &str = "sans-serif";

/// The brewer "Dark2" palette.
const PALETTE: [RGBColor; 8] = [
    RGBColor(27, 158, 119),
    RGBColor(217, 95, 2),
    RGBColor(117, 112, 179),
    RGBColor(231, 41, 138),
    RGBColor(102, 166, 30),
    RGBColor(230, 171, 2),
    RGBColor(166, 118, 29),
    RGBColor(102, 102, 102),
];

/// Path of the font currently registered with plotters.
static REGISTERED_FONT: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Draws a metric matrix against a threshold and returns PNG bytes.
pub trait ChartRender: Send + Sync {
    fn render(&self, matrix: &[Series], level: f64, direction: Operator) -> Result<Vec<u8>>;
}

/// Chart renderer backed by plotters' bitmap backend.
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    font: PathBuf,
}

impl ChartRenderer {
    /// Loads the TTF/OTF font at `path` and registers it for chart text.
    ///
    /// Registration is process-wide; loading the same path again is a no-op.
    pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut registered = REGISTERED_FONT
            .lock()
            .map_err(|_| PlotError::Font("font registry poisoned".to_string()))?;

        if registered.as_deref() != Some(path) {
            let bytes = std::fs::read(path)
                .map_err(|e| PlotError::Font(format!("read {}: {e}", path.display())))?;
            // plotters keeps a 'static reference to registered font data.
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            register_font(FONT_FAMILY, FontStyle::Normal, bytes)
                .map_err(|_| PlotError::Font(format!("parse {}: not a usable TTF/OTF font", path.display())))?;
            tracing::info!(font = %path.display(), "Registered chart font");
            *registered = Some(path.to_path_buf());
        }

        Ok(Self {
            font: path.to_path_buf(),
        })
    }

    pub fn font(&self) -> &Path {
        &self.font
    }
}

impl ChartRender for ChartRenderer {
    fn render(&self, matrix: &[Series], level: f64, direction: Operator) -> Result<Vec<u8>> {
        let layout = Layout::build(matrix, level)?;
        let mut buf = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
        draw(&mut buf, &layout, level, direction)?;

        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(&buf, WIDTH, HEIGHT, ColorType::Rgb8)?;
        Ok(png)
    }
}

/// A polyline piece of one series, between two gaps.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Segment {
    pub series: usize,
    pub points: Vec<(f64, f64)>,
}

/// Everything needed to draw, computed without touching a backend.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Layout {
    pub segments: Vec<Segment>,
    /// One entry per series when there is more than one series.
    pub legends: Vec<Option<String>>,
    pub x: (f64, f64),
    pub y: (f64, f64),
    /// Last numeric value drawn.
    pub latest: f64,
}

impl Layout {
    pub(crate) fn build(matrix: &[Series], level: f64) -> Result<Self> {
        let mut segments = Vec::new();
        let mut latest = None;
        let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut y_min, mut y_max) = (level, level);

        for (idx, series) in matrix.iter().enumerate() {
            let mut current = Vec::new();
            for sample in &series.samples {
                if sample.value.is_nan() {
                    if !current.is_empty() {
                        segments.push(Segment {
                            series: idx,
                            points: std::mem::take(&mut current),
                        });
                    }
                    continue;
                }
                x_min = x_min.min(sample.timestamp);
                x_max = x_max.max(sample.timestamp);
                y_min = y_min.min(sample.value);
                y_max = y_max.max(sample.value);
                latest = Some(sample.value);
                current.push((sample.timestamp, sample.value));
            }
            if !current.is_empty() {
                segments.push(Segment {
                    series: idx,
                    points: current,
                });
            }
        }

        let latest = latest.ok_or(PlotError::NoData)?;

        if x_max <= x_min {
            x_min -= 1.0;
            x_max += 1.0;
        }
        let pad = if y_max > y_min {
            (y_max - y_min) * 0.05
        } else {
            1.0
        };

        let legends = if matrix.len() > 1 {
            matrix.iter().map(Series::legend).collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            segments,
            legends,
            x: (x_min, x_max),
            y: (y_min - pad, y_max + pad),
            latest,
        })
    }
}

fn draw_err<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Draw(e.to_string())
}

fn format_time(ts: &f64) -> String {
    chrono::DateTime::from_timestamp(*ts as i64, 0)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Background of the latest-value label. Opaque so the text stays legible
/// over the threshold band and the series lines.
pub(crate) fn label_box_style() -> ShapeStyle {
    WHITE.filled()
}

fn draw(buf: &mut [u8], layout: &Layout, level: f64, direction: Operator) -> Result<()> {
    let root = BitMapBackend::with_buffer(buf, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;
    let area = root.margin(MARGIN, MARGIN, MARGIN, MARGIN);

    let (x_min, x_max) = layout.x;
    let (y_min, y_max) = layout.y;
    let mut chart = ChartBuilder::on(&area)
        .x_label_area_size(20)
        .y_label_area_size(48)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .light_line_style(RGBColor(235, 235, 235))
        .bold_line_style(RGBColor(210, 210, 210))
        .x_labels(6)
        .x_label_formatter(&format_time)
        .label_style((FONT_FAMILY, 11))
        .draw()
        .map_err(draw_err)?;

    let (top, bottom) = match direction {
        Operator::Less => (level, y_min),
        Operator::Greater => (y_max, level),
    };
    chart
        .draw_series(std::iter::once(Rectangle::new(
            [(x_min, top), (x_max, bottom)],
            RED.mix(0.16).filled(),
        )))
        .map_err(draw_err)?;

    let mut labelled = vec![false; layout.legends.len()];
    for segment in &layout.segments {
        let color = PALETTE[segment.series % PALETTE.len()];
        let drawn = chart
            .draw_series(LineSeries::new(
                segment.points.iter().copied(),
                color.stroke_width(1),
            ))
            .map_err(draw_err)?;

        let legend = layout.legends.get(segment.series).and_then(Option::as_ref);
        if let Some(text) = legend {
            if !labelled[segment.series] {
                labelled[segment.series] = true;
                drawn
                    .label(text.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], color));
            }
        }
    }

    if labelled.iter().any(|l| *l) {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .label_font((FONT_FAMILY, 11))
            .background_style(WHITE.mix(0.8))
            .border_style(RGBColor(200, 200, 200))
            .draw()
            .map_err(draw_err)?;
    }

    let text = format!("latest evaluation: {:.2}", layout.latest);
    let text_color = BLACK.mix(0.6);
    let style = TextStyle::from((FONT_FAMILY, 18).into_font())
        .color(&text_color)
        .pos(Pos::new(HPos::Right, VPos::Bottom));
    let (w, h) = root.estimate_text_size(&text, &style).map_err(draw_err)?;
    let (w, h) = (w as i32, h as i32);

    let (px, py) = chart.plotting_area().map_coordinate(&(x_max, layout.latest));
    // Keep the label inside the plot when the latest value sits on an edge.
    let anchor = (px - 8, py.clamp(h + MARGIN as i32, (HEIGHT - MARGIN) as i32));
    root.draw(&Rectangle::new(
        [(anchor.0 - w - 4, anchor.1 - h - 4), (anchor.0 + 4, anchor.1 + 4)],
        label_box_style(),
    ))
    .map_err(draw_err)?;
    root.draw(&Text::new(text, anchor, style)).map_err(draw_err)?;

    root.present().map_err(draw_err)?;
    Ok(())
}
