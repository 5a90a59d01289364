use thiserror::Error;

#[derive(Error, Debug)]
pub enum OvcError {
    #[error("Overdrive backend not available: {0}")]
    BackendUnavailable(String),
    #[error("Driver error: {0}")]
    Backend(String),
    #[error("Adapter {0} out of range")]
    AdapterOutOfRange(usize),
    #[error("Can't parse parameters: {0} error(s)")]
    InvalidParameters(usize),
    #[error("No settings applied: {0} error(s) in parameters")]
    ValidationFailed(usize),
    #[error("Permission denied writing {0}")]
    PermissionDenied(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type OvcResult<T> = Result<T, OvcError>;

pub mod adapters;
pub mod apply;
pub mod backend;
pub mod baseline;
pub mod config;
pub mod error_messages;
pub mod logger;
pub mod param;
pub mod report;
pub mod session;
pub mod sysfs_backend;
pub mod validation;

// Re-export commonly used types
pub use adapters::{AdapterSelector, parse_adapter_list};
pub use apply::ApplyPlan;
pub use backend::{OverdriveBackend, SharedBackend};
pub use config::Config;
pub use param::{ParamRequest, parse_params};
pub use session::OverdriveSession;
pub use validation::{CapabilitySnapshot, ValidationReport, validate};
