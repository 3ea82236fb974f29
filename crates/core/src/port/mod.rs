// Port Layer - Interfaces for external dependencies

pub mod command_executor;
pub mod identity;
pub mod process_platform;
pub mod script_stager;

// Re-exports
pub use command_executor::{
    CommandExecutor, CommandRequest, ExecutionError, ExecutionResult, ExecutionStatus,
};
pub use identity::IdentityProbe;
pub use process_platform::{
    Channel, ChannelEvents, ChildPipes, Interest, KillOutcome, LaunchRequest, LaunchedChild,
    OutputChannel, ProcessPlatform, Readiness, WaitMode,
};
pub use script_stager::ScriptStager;
