use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("chart font: {0}")]
    Font(String),

    #[error("no numeric samples to plot")]
    NoData,

    #[error("draw chart: {0}")]
    Draw(String),

    #[error("encode png: {0}")]
    Encode(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, PlotError>;
