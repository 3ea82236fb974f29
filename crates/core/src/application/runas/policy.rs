// RunAs Policy - configuration and privilege elevation

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::{CommandSpec, DomainError};

/// Sandbox and privilege settings applied to every RunAs execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunAsConfig {
    /// Whether commands may run when the service itself is root
    pub allow_root: bool,
    /// Working directory for launched commands
    pub cwd: Option<PathBuf>,
    /// Root directory launched commands are confined to
    pub chroot_path: Option<PathBuf>,
}

impl Default for RunAsConfig {
    fn default() -> Self {
        Self {
            allow_root: true,
            cwd: None,
            chroot_path: None,
        }
    }
}

/// Requested privilege elevation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    #[default]
    None,
    Sudo,
}

impl Elevation {
    /// Prefix `sudo` unless already running as root
    pub fn apply(self, command: CommandSpec, is_root: bool) -> CommandSpec {
        match self {
            Elevation::Sudo if !is_root => command.wrapped_with("sudo"),
            _ => command,
        }
    }
}

impl FromStr for Elevation {
    type Err = DomainError;

    /// Case-insensitive: `""` or `"sudo"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Ok(Elevation::None),
            "sudo" => Ok(Elevation::Sudo),
            _ => Err(DomainError::InvalidElevation(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_parsing_is_case_insensitive() {
        assert_eq!("".parse::<Elevation>().unwrap(), Elevation::None);
        assert_eq!("SuDo".parse::<Elevation>().unwrap(), Elevation::Sudo);
        assert_eq!(" sudo ".parse::<Elevation>().unwrap(), Elevation::Sudo);
        assert_eq!(
            "doas".parse::<Elevation>(),
            Err(DomainError::InvalidElevation("doas".to_string()))
        );
    }

    #[test]
    fn test_sudo_prefix_skipped_for_root() {
        let spec = CommandSpec::from_command_line("id -u").unwrap();
        assert_eq!(
            Elevation::Sudo.apply(spec.clone(), false).argv(),
            ["sudo", "id", "-u"]
        );
        assert_eq!(Elevation::Sudo.apply(spec.clone(), true).argv(), ["id", "-u"]);
        assert_eq!(Elevation::None.apply(spec, false).argv(), ["id", "-u"]);
    }

    #[test]
    fn test_config_defaults_allow_root() {
        let config: RunAsConfig = serde_json::from_str(r#"{"cwd": "/var/tmp"}"#).unwrap();
        assert!(config.allow_root);
        assert_eq!(config.cwd, Some(PathBuf::from("/var/tmp")));
        assert_eq!(config.chroot_path, None);
    }
}
