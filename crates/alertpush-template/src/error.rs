use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template glob {pattern}: {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("template glob: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("read template {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parse template {name}: {source}")]
    Parse {
        name: String,
        source: Box<handlebars::TemplateError>,
    },

    #[error("render: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("build render context: {0}")]
    Context(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TemplateError>;
