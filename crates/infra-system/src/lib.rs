// Procrun Infrastructure - System Adapters
// Implements: ProcessPlatform, CommandExecutor, IdentityProbe, ScriptStager (ADR-002)

#[cfg(unix)]
pub mod identity;
#[cfg(unix)]
pub mod script_stager;
pub mod supervised_executor;
#[cfg(unix)]
pub mod unix_platform;

#[cfg(unix)]
pub use identity::UnixIdentity;
#[cfg(unix)]
pub use script_stager::TempScriptStager;
pub use supervised_executor::SupervisedExecutor;
#[cfg(unix)]
pub use unix_platform::{UnixPipes, UnixPlatform};
