use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Freeze primitive error: {0}")]
    Primitive(String),

    #[error("CPU monitor unavailable: {0}")]
    CpuMonitorUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Freezer worker stopped")]
    WorkerStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
