// Effective-user identity probe
use nix::unistd::geteuid;

use procrun_core::port::IdentityProbe;

/// Reports whether this process runs with an effective uid of 0
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixIdentity;

impl IdentityProbe for UnixIdentity {
    fn is_root(&self) -> bool {
        geteuid().is_root()
    }
}
