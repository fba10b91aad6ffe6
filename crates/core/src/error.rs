pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("invalid phase: {value:?}")]
    InvalidPhase { value: String },

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("http error: {message}")]
    Http { message: String },

    #[error("no tokio runtime: {message}")]
    NoRuntime { message: String },

    #[error("delivery disabled after repeated failures")]
    CircuitOpen,
}
