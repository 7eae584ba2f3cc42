use thiserror::Error;

#[derive(Error, Debug)]
pub enum BqVizError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Render spec error: {0}")]
    RenderSpec(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{failed} of {total} pipelines failed")]
    PipelineFailures { failed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BqVizError {
    pub fn code(&self) -> &'static str {
        match self {
            BqVizError::Authentication(_) => "AUTHENTICATION",
            BqVizError::Query(_) => "QUERY",
            BqVizError::Transport(_) => "TRANSPORT",
            BqVizError::RenderSpec(_) => "RENDER_SPEC",
            BqVizError::InvalidRequest(_) => "INVALID_REQUEST",
            BqVizError::Config(_) => "CONFIG",
            BqVizError::PipelineFailures { .. } => "PIPELINE_FAILURES",
            BqVizError::Io(_) => "IO",
            BqVizError::Yaml(_) => "YAML",
            BqVizError::Json(_) => "JSON",
        }
    }
}

pub type Result<T> = std::result::Result<T, BqVizError>;
