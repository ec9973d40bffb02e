use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config section not found: {0}")]
    MissingSection(String),

    #[error("Missing required path in config: {0}")]
    MissingPath(String),

    #[error("Invalid period encoding: {0}")]
    InvalidPeriod(i64),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<ChurnError>,
    },

    #[error("{0}")]
    General(String),
}

impl ChurnError {
    /// Attach the failing stage name to an error raised inside it.
    pub fn in_stage(stage: impl Into<String>, source: ChurnError) -> Self {
        ChurnError::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(feature = "python")]
impl From<ChurnError> for pyo3::PyErr {
    fn from(err: ChurnError) -> pyo3::PyErr {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}

#[cfg(feature = "python")]
impl From<pyo3::PyErr> for ChurnError {
    fn from(err: pyo3::PyErr) -> Self {
        ChurnError::General(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChurnError>;
