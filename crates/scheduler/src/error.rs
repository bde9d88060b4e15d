use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("invalid schedule: {message}")]
    Schedule { message: String },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("no schedule record for job: {job_id}")]
    RecordNotFound { job_id: String },

    #[error("job is already running: {job_id}")]
    AlreadyRunning { job_id: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn schedule(message: impl Into<String>) -> Self {
        Self::Schedule {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    #[must_use]
    pub fn record_not_found(job_id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            job_id: job_id.into(),
        }
    }

    #[must_use]
    pub fn already_running(job_id: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            job_id: job_id.into(),
        }
    }

    /// Whether the error came from the persistence layer.
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Sqlx(_) | Self::Migrate(_) | Self::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
