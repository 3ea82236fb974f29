// Temp-file script stager
// reason: tempfile for unique, race-free script paths
use std::fs::Permissions;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use procrun_core::port::ScriptStager;

const SCRIPT_PREFIX: &str = "procrun-script-";
/// Owner read/write/execute only
const SCRIPT_MODE: u32 = 0o700;

/// Writes scripts into a directory (the system temp dir by default)
#[derive(Debug, Clone)]
pub struct TempScriptStager {
    dir: PathBuf,
}

impl TempScriptStager {
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for TempScriptStager {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptStager for TempScriptStager {
    fn stage(&self, body: &str) -> io::Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(SCRIPT_PREFIX)
            .tempfile_in(&self.dir)?;
        file.write_all(body.as_bytes())?;
        file.as_file().set_permissions(Permissions::from_mode(SCRIPT_MODE))?;

        // The handle must be closed before exec, or the kernel reports ETXTBSY
        let (handle, path) = file.keep()?;
        drop(handle);

        debug!(path = %path.display(), bytes = body.len(), "Script staged");
        Ok(path)
    }

    fn discard(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}
