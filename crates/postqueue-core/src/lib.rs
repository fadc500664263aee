//! Postqueue core library
//!
//! Durable, priority-aware job scheduling for time-triggered social posting:
//! - Job model with a strict lifecycle state machine
//! - Business-rule validation (errors block, warnings are logged)
//! - Transactional storage (MySQL or partitioned JSON files)
//! - Single-writer scheduler loop with retry, expiry and crash recovery
//! - Room-scoped websocket fan-out of lifecycle events

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod sanitize;
pub mod scheduler;
pub mod storage;
pub mod timeutil;
pub mod validator;
pub mod websocket;

pub use cache::JobCache;
pub use config::Config;
pub use error::{Error, Result};
pub use models::{Job, JobPriority, JobStatus, Platform, PostResult};
pub use scheduler::{JobManager, JobRecovery, PostCallback, PostCallbackFactory, Scheduler};
pub use storage::{JobSaver, JobStore};
pub use validator::{JobValidator, ValidationReport, ValidationSeverity};
pub use websocket::FanOutHub;
