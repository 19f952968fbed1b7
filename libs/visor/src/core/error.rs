use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisorError {
    #[error("Video mapping config error: {0}")]
    ConfigParse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No buffer available: {0}")]
    NoBufferAvailable(String),

    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Engine is busy: {0}")]
    Busy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VisorError>;
