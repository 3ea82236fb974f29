// Script Stager Port
// Materializes script bodies as executable files for ExecuteScript

use std::io;
use std::path::{Path, PathBuf};

pub trait ScriptStager: Send + Sync {
    /// Write `body` to a new file with the owner-execute bit set
    fn stage(&self, body: &str) -> io::Result<PathBuf>;

    /// Remove a previously staged file
    fn discard(&self, path: &Path) -> io::Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records script bodies instead of touching the filesystem
    #[derive(Default)]
    pub struct MemoryStager {
        pub staged: Mutex<Vec<(PathBuf, String)>>,
        pub discarded: Mutex<Vec<PathBuf>>,
        pub fail: bool,
    }

    impl MemoryStager {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    impl ScriptStager for MemoryStager {
        fn stage(&self, body: &str) -> io::Result<PathBuf> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only tmp"));
            }
            let mut staged = self.staged.lock().unwrap();
            let path = PathBuf::from(format!("/tmp/procrun-script-{}", staged.len()));
            staged.push((path.clone(), body.to_string()));
            Ok(path)
        }

        fn discard(&self, path: &Path) -> io::Result<()> {
            self.discarded.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }
}
