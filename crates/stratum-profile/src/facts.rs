use crate::ResolutionError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Observed host facts relevant to profile resolution.
///
/// `machine` is the kernel machine string (`uname -m`); `platform_version`
/// is the OS release version as reported by the platform, e.g. `"7.2"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    pub machine: String,
    pub platform_version: String,
}

impl HostFacts {
    pub fn new(machine: impl Into<String>, platform_version: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            platform_version: platform_version.into(),
        }
    }

    /// Gather facts from the running host.
    ///
    /// The architecture comes from the compile target; the platform version
    /// is read from `/etc/os-release` (`VERSION_ID`). Hosts without an
    /// os-release file report an empty version, which resolution will reject.
    pub fn detect() -> Self {
        let platform_version = read_os_release_version("/etc/os-release").unwrap_or_default();
        Self {
            machine: std::env::consts::ARCH.to_owned(),
            platform_version,
        }
    }

    /// Load facts from a TOML override file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ResolutionError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

fn read_os_release_version(path: impl AsRef<Path>) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("VERSION_ID=") {
            return Some(value.trim_matches('"').to_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn facts_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.toml");
        fs::write(&path, "machine = \"x86_64\"\nplatform_version = \"7.2\"\n").unwrap();

        let facts = HostFacts::from_file(&path).unwrap();
        assert_eq!(facts.machine, "x86_64");
        assert_eq!(facts.platform_version, "7.2");
    }

    #[test]
    fn facts_file_missing_field_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.toml");
        fs::write(&path, "machine = \"x86_64\"\n").unwrap();

        assert!(HostFacts::from_file(&path).is_err());
    }

    #[test]
    fn os_release_version_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "NAME=\"CentOS Linux\"").unwrap();
        writeln!(file, "VERSION_ID=\"7\"").unwrap();

        assert_eq!(
            read_os_release_version(file.path()),
            Some("7".to_owned())
        );
    }

    #[test]
    fn os_release_missing_version_is_none() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "NAME=\"CentOS Linux\"").unwrap();

        assert_eq!(read_os_release_version(file.path()), None);
    }
}
