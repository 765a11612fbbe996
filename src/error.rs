use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Required table '{table}' is missing from the extract")]
    MissingRequiredTable { table: String },

    #[error("Table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("Could not parse column '{column}' in table '{table}': {reason}")]
    ParseError {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Model fit failed for {series} series: {reason}")]
    ModelFitFailure { series: String, reason: String },

    #[error("Anomaly model requires at least {required} rows, got {rows}")]
    InsufficientAnomalyData { rows: usize, required: usize },

    #[error("Forecast series is not strictly chronological at week {week}")]
    NonChronologicalSeries { week: chrono::NaiveDate },

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
