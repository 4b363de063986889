//! Alert visualization.
//!
//! [`expr::decompose`] splits an alerting PromQL expression into threshold
//! comparisons, and [`chart::ChartRenderer`] draws a metric [`matrix::Matrix`]
//! against one of those thresholds as a PNG image.

pub mod chart;
pub mod error;
pub mod expr;
pub mod matrix;


pub use chart::{ChartRender, ChartRenderer};
pub use error::{PlotError, Result};
pub use expr::{decompose, Operator, PlotExpr};
pub use matrix::{Matrix, Sample, Series};
