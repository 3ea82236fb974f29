// Domain Layer - Pure types, no OS access

pub mod command;
pub mod error;
pub mod status;

// Re-exports
pub use command::{split_command, CommandSpec};
pub use error::DomainError;
pub use status::{Pid, StreamLiveness, TerminationStatus};
