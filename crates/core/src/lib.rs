// Procrun Core - Domain Logic, Ports & the Supervised Execution Engine
// NO infrastructure dependencies (ADR-001: Hexagonal Architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{ProcessEngine, RunRequest};
pub use domain::split_command;
pub use error::{AppError, Result, RunError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
