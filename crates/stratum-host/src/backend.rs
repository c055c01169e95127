use crate::HostError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Observed attributes of an existing directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryState {
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

/// Observed attributes and content of an existing regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub content: Vec<u8>,
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

pub trait PackageManager: Send + Sync {
    fn is_installed(&self, name: &str) -> Result<bool, HostError>;

    fn install(&self, name: &str, version: Option<&str>) -> Result<(), HostError>;
}

/// Filesystem observation and mutation.
///
/// `stat_*` methods return `Ok(None)` for a missing path (or a path of the
/// wrong type, which the executor treats the same as missing: divergent).
pub trait Filesystem: Send + Sync {
    fn stat_directory(&self, path: &Path) -> Result<Option<DirectoryState>, HostError>;

    /// Returns the link target when `path` is a symlink.
    fn stat_symlink(&self, path: &Path) -> Result<Option<PathBuf>, HostError>;

    fn stat_file(&self, path: &Path) -> Result<Option<FileState>, HostError>;

    fn path_exists(&self, path: &Path) -> Result<bool, HostError>;

    fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>, HostError>;

    fn create_directory(
        &self,
        path: &Path,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), HostError>;

    fn create_symlink(&self, path: &Path, target: &Path) -> Result<(), HostError>;

    fn write_file(
        &self,
        path: &Path,
        content: &[u8],
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), HostError>;

    fn remove_recursive(&self, path: &Path) -> Result<(), HostError>;

    fn remove_symlink(&self, path: &Path) -> Result<(), HostError>;

    /// Remove a directory's contents, keeping the directory itself.
    fn purge_directory(&self, path: &Path) -> Result<(), HostError>;
}

pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template_id: &str,
        variables: &BTreeMap<String, Value>,
    ) -> Result<Vec<u8>, HostError>;
}

/// Service supervision.
///
/// `create_service` and `delete_service` are the platform-specific override
/// points: the engine calls them after a successful create or delete run,
/// and the defaults deliberately do nothing.
pub trait ServiceSupervisor: Send + Sync {
    fn reload(&self, name: &str) -> Result<(), HostError>;

    fn restart(&self, name: &str) -> Result<(), HostError>;

    fn is_running(&self, name: &str) -> Result<bool, HostError>;

    fn create_service(&self, name: &str) -> Result<(), HostError> {
        let _ = name;
        Ok(())
    }

    fn delete_service(&self, name: &str) -> Result<(), HostError> {
        let _ = name;
        Ok(())
    }
}

/// The four collaborator capabilities bundled for injection into the engine.
pub struct Host {
    pub packages: Box<dyn PackageManager>,
    pub fs: Box<dyn Filesystem>,
    pub templates: Box<dyn TemplateRenderer>,
    pub services: Box<dyn ServiceSupervisor>,
}

impl Host {
    pub fn live() -> Self {
        Self {
            packages: Box::new(crate::live::YumPackages::new()),
            fs: Box::new(crate::live::LiveFilesystem::new()),
            templates: Box::new(crate::render::ConfRenderer::new()),
            services: Box::new(crate::live::LiveSupervisor::detect()),
        }
    }
}

pub fn select_host(name: &str) -> Result<Host, HostError> {
    match name {
        "live" => Ok(Host::live()),
        "mock" => Ok(crate::mock::MockHost::new().host()),
        other => Err(HostError::BackendUnavailable(other.to_owned())),
    }
}
