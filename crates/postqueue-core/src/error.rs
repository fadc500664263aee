use std::fmt;

/// Main error type for postqueue
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),

    /// Database errors (SQLx wrapped)
    Database(sqlx::Error),

    /// Storage errors (file backend, serialization of stored jobs)
    Storage(String),

    /// Validation errors (blocking rule violations)
    Validation(String),

    /// Scheduled time outside the allowed window
    InvalidScheduleTime(String),

    /// Another live job already carries the same content
    DuplicateContent {
        /// Prefix of the existing job's id
        existing: String,
        /// Status of the existing job at detection time
        status: String,
    },

    /// Job lookup failed
    JobNotFound(String),

    /// Scheduler lifecycle errors
    Scheduler(String),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),

    /// IO errors
    Io(std::io::Error),

    /// Generic errors with description
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::InvalidScheduleTime(msg) => write!(f, "Invalid schedule time: {}", msg),
            Error::DuplicateContent { existing, status } => write!(
                f,
                "Content already exists in job {}... (status: {})",
                existing, status
            ),
            Error::JobNotFound(id) => write!(f, "Job not found: {}", id),
            Error::Scheduler(msg) => write!(f, "Scheduler error: {}", msg),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new invalid schedule time error
    pub fn invalid_schedule_time<T: Into<String>>(msg: T) -> Self {
        Error::InvalidScheduleTime(msg.into())
    }

    /// Create a new storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a new job-not-found error
    pub fn job_not_found<T: Into<String>>(id: T) -> Self {
        Error::JobNotFound(id.into())
    }

    /// Create a new scheduler error
    pub fn scheduler<T: Into<String>>(msg: T) -> Self {
        Error::Scheduler(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 422,
            Error::InvalidScheduleTime(_) => 422,
            Error::DuplicateContent { .. } => 409,
            Error::JobNotFound(_) => 404,
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Storage(_) => 500,
            Error::Scheduler(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Get stable error code for API payloads
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::InvalidScheduleTime(_) => "INVALID_SCHEDULE_TIME",
            Error::DuplicateContent { .. } => "DUPLICATE_CONTENT",
            Error::JobNotFound(_) => "JOB_NOT_FOUND",
            Error::Database(_) | Error::Storage(_) => "STORAGE_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Storage(_) => "storage",
            Error::Validation(_) => "validation",
            Error::InvalidScheduleTime(_) => "validation",
            Error::DuplicateContent { .. } => "duplicate",
            Error::JobNotFound(_) => "not_found",
            Error::Scheduler(_) => "scheduler",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}
