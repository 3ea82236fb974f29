// Identity Port
// Who the engine runs as (root checks for the RunAs policy)

/// Identity probe interface (allows mocking in tests)
pub trait IdentityProbe: Send + Sync {
    /// True if the effective user is the superuser
    fn is_root(&self) -> bool;
}

pub mod mocks {
    use super::*;

    /// Fixed answer
    pub struct FixedIdentity(pub bool);

    impl IdentityProbe for FixedIdentity {
        fn is_root(&self) -> bool {
            self.0
        }
    }
}
