// Application Layer - Use Cases and Business Logic

pub mod engine;
pub mod runas;

// Re-exports
pub use engine::{EngineOptions, ProcessEngine, RunRequest};
pub use runas::{Elevation, RunAsConfig, RunAsOutcome, RunAsService};
