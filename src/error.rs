use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid job payload: {0}")]
    InvalidJob(String),

    #[error("channel {0} is full")]
    ChannelFull(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("process not found: {0}")]
    ProcessNotFound(String),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("initialization failed: {0}")]
    Init(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
