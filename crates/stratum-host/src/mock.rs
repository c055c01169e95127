use crate::backend::{
    DirectoryState, FileState, Filesystem, Host, PackageManager, ServiceSupervisor,
};
use crate::render::ConfRenderer;
use crate::HostError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// One filesystem node in the mock host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockNode {
    Directory {
        owner: String,
        group: String,
        mode: u32,
    },
    File {
        content: Vec<u8>,
        owner: String,
        group: String,
        mode: u32,
    },
    Symlink {
        target: PathBuf,
    },
}

#[derive(Debug, Default)]
struct MockState {
    nodes: BTreeMap<PathBuf, MockNode>,
    installed: BTreeSet<String>,
    running: BTreeSet<String>,
    /// Every supervisor invocation, in call order, as "verb name".
    service_calls: Vec<String>,
    fail_paths: BTreeSet<PathBuf>,
    fail_packages: BTreeSet<String>,
}

/// In-memory host backend.
///
/// The `MockHost` handle stays with the test while [`MockHost::host`] hands
/// cloned views of the same state to the engine, so tests can seed host state
/// up front and inspect the effect of a run afterwards. Mutations named in
/// `fail_on_*` return an injected command failure instead of applying.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

fn injected(what: impl Into<String>) -> HostError {
    HostError::CommandFailed {
        command: "mock".to_owned(),
        detail: what.into(),
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this mock into a [`Host`] for the engine.
    pub fn host(&self) -> Host {
        Host {
            packages: Box::new(self.clone()),
            fs: Box::new(self.clone()),
            templates: Box::new(ConfRenderer::new()),
            services: Box::new(self.clone()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, HostError> {
        self.state
            .lock()
            .map_err(|e| injected(format!("mutex poisoned: {e}")))
    }

    fn lock_expect(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state mutex poisoned")
    }

    // Seeding helpers for tests.

    pub fn seed_installed(&self, name: &str) {
        self.lock_expect().installed.insert(name.to_owned());
    }

    pub fn seed_file(&self, path: impl Into<PathBuf>, node: MockNode) {
        self.lock_expect().nodes.insert(path.into(), node);
    }

    pub fn fail_on_path(&self, path: impl Into<PathBuf>) {
        self.lock_expect().fail_paths.insert(path.into());
    }

    pub fn fail_on_package(&self, name: &str) {
        self.lock_expect().fail_packages.insert(name.to_owned());
    }

    /// Withdraw every injected failure, for tests that recover from one.
    pub fn clear_failures(&self) {
        let mut state = self.lock_expect();
        state.fail_paths.clear();
        state.fail_packages.clear();
    }

    // Introspection helpers for tests.

    pub fn node(&self, path: impl AsRef<Path>) -> Option<MockNode> {
        self.lock_expect().nodes.get(path.as_ref()).cloned()
    }

    pub fn has_path(&self, path: impl AsRef<Path>) -> bool {
        self.lock_expect().nodes.contains_key(path.as_ref())
    }

    pub fn is_package_installed(&self, name: &str) -> bool {
        self.lock_expect().installed.contains(name)
    }

    pub fn service_calls(&self) -> Vec<String> {
        self.lock_expect().service_calls.clone()
    }

    fn check_fail(state: &MockState, path: &Path) -> Result<(), HostError> {
        if state.fail_paths.contains(path) {
            Err(injected(format!("injected failure for {}", path.display())))
        } else {
            Ok(())
        }
    }
}

impl PackageManager for MockHost {
    fn is_installed(&self, name: &str) -> Result<bool, HostError> {
        Ok(self.lock()?.installed.contains(name))
    }

    fn install(&self, name: &str, _version: Option<&str>) -> Result<(), HostError> {
        let mut state = self.lock()?;
        if state.fail_packages.contains(name) {
            return Err(injected(format!("injected failure for package {name}")));
        }
        state.installed.insert(name.to_owned());
        Ok(())
    }
}

impl Filesystem for MockHost {
    fn stat_directory(&self, path: &Path) -> Result<Option<DirectoryState>, HostError> {
        Ok(match self.lock()?.nodes.get(path) {
            Some(MockNode::Directory { owner, group, mode }) => Some(DirectoryState {
                owner: owner.clone(),
                group: group.clone(),
                mode: *mode,
            }),
            _ => None,
        })
    }

    fn stat_symlink(&self, path: &Path) -> Result<Option<PathBuf>, HostError> {
        Ok(match self.lock()?.nodes.get(path) {
            Some(MockNode::Symlink { target }) => Some(target.clone()),
            _ => None,
        })
    }

    fn stat_file(&self, path: &Path) -> Result<Option<FileState>, HostError> {
        Ok(match self.lock()?.nodes.get(path) {
            Some(MockNode::File {
                content,
                owner,
                group,
                mode,
            }) => Some(FileState {
                content: content.clone(),
                owner: owner.clone(),
                group: group.clone(),
                mode: *mode,
            }),
            _ => None,
        })
    }

    fn path_exists(&self, path: &Path) -> Result<bool, HostError> {
        let state = self.lock()?;
        MockHost::check_fail(&state, path)?;
        Ok(state.nodes.contains_key(path))
    }

    fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>, HostError> {
        Ok(self
            .lock()?
            .nodes
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect())
    }

    fn create_directory(
        &self,
        path: &Path,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), HostError> {
        let mut state = self.lock()?;
        MockHost::check_fail(&state, path)?;
        state.nodes.insert(
            path.to_path_buf(),
            MockNode::Directory {
                owner: owner.to_owned(),
                group: group.to_owned(),
                mode,
            },
        );
        Ok(())
    }

    fn create_symlink(&self, path: &Path, target: &Path) -> Result<(), HostError> {
        let mut state = self.lock()?;
        MockHost::check_fail(&state, path)?;
        state.nodes.insert(
            path.to_path_buf(),
            MockNode::Symlink {
                target: target.to_path_buf(),
            },
        );
        Ok(())
    }

    fn write_file(
        &self,
        path: &Path,
        content: &[u8],
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), HostError> {
        let mut state = self.lock()?;
        MockHost::check_fail(&state, path)?;
        state.nodes.insert(
            path.to_path_buf(),
            MockNode::File {
                content: content.to_vec(),
                owner: owner.to_owned(),
                group: group.to_owned(),
                mode,
            },
        );
        Ok(())
    }

    fn remove_recursive(&self, path: &Path) -> Result<(), HostError> {
        let mut state = self.lock()?;
        MockHost::check_fail(&state, path)?;
        state
            .nodes
            .retain(|p, _| !(p == path || p.starts_with(path)));
        Ok(())
    }

    fn remove_symlink(&self, path: &Path) -> Result<(), HostError> {
        let mut state = self.lock()?;
        MockHost::check_fail(&state, path)?;
        if matches!(state.nodes.get(path), Some(MockNode::Symlink { .. })) {
            state.nodes.remove(path);
        }
        Ok(())
    }

    fn purge_directory(&self, path: &Path) -> Result<(), HostError> {
        let mut state = self.lock()?;
        MockHost::check_fail(&state, path)?;
        state
            .nodes
            .retain(|p, _| !(p.starts_with(path) && p != path));
        Ok(())
    }
}

impl ServiceSupervisor for MockHost {
    fn reload(&self, name: &str) -> Result<(), HostError> {
        self.lock()?.service_calls.push(format!("reload {name}"));
        Ok(())
    }

    fn restart(&self, name: &str) -> Result<(), HostError> {
        self.lock()?.service_calls.push(format!("restart {name}"));
        Ok(())
    }

    fn is_running(&self, name: &str) -> Result<bool, HostError> {
        Ok(self.lock()?.running.contains(name))
    }

    fn create_service(&self, name: &str) -> Result<(), HostError> {
        let mut state = self.lock()?;
        state.service_calls.push(format!("create {name}"));
        state.running.insert(name.to_owned());
        Ok(())
    }

    fn delete_service(&self, name: &str) -> Result<(), HostError> {
        let mut state = self.lock()?;
        state.service_calls.push(format!("delete {name}"));
        state.running.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_install_is_visible() {
        let mock = MockHost::new();
        assert!(!mock.is_installed("httpd").unwrap());
        mock.install("httpd", None).unwrap();
        assert!(mock.is_installed("httpd").unwrap());
    }

    #[test]
    fn injected_package_failure() {
        let mock = MockHost::new();
        mock.fail_on_package("httpd");
        assert!(mock.install("httpd", None).is_err());
        assert!(!mock.is_package_installed("httpd"));
    }

    #[test]
    fn purge_removes_children_only() {
        let mock = MockHost::new();
        let dir = PathBuf::from("/etc/httpd/conf.d");
        mock.create_directory(&dir, "root", "root", 0o755).unwrap();
        mock.write_file(&dir.join("a.conf"), b"x", "root", "root", 0o644)
            .unwrap();

        mock.purge_directory(&dir).unwrap();
        assert!(mock.has_path(&dir));
        assert!(!mock.has_path(dir.join("a.conf")));
    }

    #[test]
    fn remove_recursive_takes_subtree() {
        let mock = MockHost::new();
        mock.create_directory(Path::new("/etc/httpd"), "root", "root", 0o755)
            .unwrap();
        mock.create_directory(Path::new("/etc/httpd/conf"), "root", "root", 0o755)
            .unwrap();
        mock.create_directory(Path::new("/etc/httpd-other"), "root", "root", 0o755)
            .unwrap();

        mock.remove_recursive(Path::new("/etc/httpd")).unwrap();
        assert!(!mock.has_path("/etc/httpd"));
        assert!(!mock.has_path("/etc/httpd/conf"));
        assert!(mock.has_path("/etc/httpd-other"));
    }

    #[test]
    fn remove_symlink_leaves_non_links_alone() {
        let mock = MockHost::new();
        mock.create_directory(Path::new("/etc/httpd"), "root", "root", 0o755)
            .unwrap();
        mock.remove_symlink(Path::new("/etc/httpd")).unwrap();
        assert!(mock.has_path("/etc/httpd"));
    }

    #[test]
    fn service_calls_are_ordered() {
        let mock = MockHost::new();
        mock.reload("httpd").unwrap();
        mock.restart("httpd").unwrap();
        assert_eq!(mock.service_calls(), vec!["reload httpd", "restart httpd"]);
    }

    #[test]
    fn supervisor_hooks_track_running_state() {
        let mock = MockHost::new();
        assert!(!mock.is_running("httpd").unwrap());
        mock.create_service("httpd").unwrap();
        assert!(mock.is_running("httpd").unwrap());
        mock.delete_service("httpd").unwrap();
        assert!(!mock.is_running("httpd").unwrap());
    }
}
