use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("job id {0} is already registered")]
    DuplicateJob(String),

    #[error("invalid cron expression {0:?}: {1}")]
    InvalidCronExpression(String, String),
}

impl ErrorKind for SchedulerError {
    fn kind(&self) -> Kind {
        match self {
            SchedulerError::DuplicateJob(_) | SchedulerError::InvalidCronExpression(_, _) => {
                Kind::ValidationError
            }
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
