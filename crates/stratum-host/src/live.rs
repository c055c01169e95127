use crate::backend::{
    DirectoryState, FileState, Filesystem, PackageManager, ServiceSupervisor,
};
use crate::HostError;
use std::ffi::CString;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

fn run_checked(program: &str, args: &[&str]) -> Result<std::process::Output, HostError> {
    let output = Command::new(program).args(args).output()?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(HostError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Package manager backed by rpm/yum.
#[derive(Debug, Default)]
pub struct YumPackages;

impl YumPackages {
    pub fn new() -> Self {
        Self
    }
}

impl PackageManager for YumPackages {
    fn is_installed(&self, name: &str) -> Result<bool, HostError> {
        let status = Command::new("rpm").args(["-q", name]).output()?;
        Ok(status.status.success())
    }

    fn install(&self, name: &str, version: Option<&str>) -> Result<(), HostError> {
        let spec = match version {
            Some(v) => format!("{name}-{v}"),
            None => name.to_owned(),
        };
        debug!("installing package {spec}");
        run_checked("yum", &["-y", "install", &spec])?;
        Ok(())
    }
}

fn uid_for(owner: &str) -> Result<libc::uid_t, HostError> {
    let c_owner =
        CString::new(owner).map_err(|_| HostError::UnknownPrincipal(owner.to_owned()))?;
    // SAFETY: getpwnam with a valid NUL-terminated string; the result is
    // only dereferenced after a null check.
    #[allow(unsafe_code)]
    let entry = unsafe { libc::getpwnam(c_owner.as_ptr()) };
    if entry.is_null() {
        return Err(HostError::UnknownPrincipal(owner.to_owned()));
    }
    // SAFETY: non-null result from getpwnam points at a valid passwd record.
    #[allow(unsafe_code)]
    Ok(unsafe { (*entry).pw_uid })
}

fn gid_for(group: &str) -> Result<libc::gid_t, HostError> {
    let c_group =
        CString::new(group).map_err(|_| HostError::UnknownPrincipal(group.to_owned()))?;
    // SAFETY: getgrnam with a valid NUL-terminated string; the result is
    // only dereferenced after a null check.
    #[allow(unsafe_code)]
    let entry = unsafe { libc::getgrnam(c_group.as_ptr()) };
    if entry.is_null() {
        return Err(HostError::UnknownPrincipal(group.to_owned()));
    }
    // SAFETY: non-null result from getgrnam points at a valid group record.
    #[allow(unsafe_code)]
    Ok(unsafe { (*entry).gr_gid })
}

fn name_of_uid(uid: libc::uid_t) -> String {
    // SAFETY: getpwuid takes any uid; the result is only dereferenced after
    // a null check, and pw_name points at a NUL-terminated string.
    #[allow(unsafe_code)]
    unsafe {
        let entry = libc::getpwuid(uid);
        if entry.is_null() {
            uid.to_string()
        } else {
            std::ffi::CStr::from_ptr((*entry).pw_name)
                .to_string_lossy()
                .into_owned()
        }
    }
}

fn name_of_gid(gid: libc::gid_t) -> String {
    // SAFETY: getgrgid takes any gid; the result is only dereferenced after
    // a null check, and gr_name points at a NUL-terminated string.
    #[allow(unsafe_code)]
    unsafe {
        let entry = libc::getgrgid(gid);
        if entry.is_null() {
            gid.to_string()
        } else {
            std::ffi::CStr::from_ptr((*entry).gr_name)
                .to_string_lossy()
                .into_owned()
        }
    }
}

fn chown(path: &Path, owner: &str, group: &str) -> Result<(), HostError> {
    let uid = uid_for(owner)?;
    let gid = gid_for(group)?;
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| {
        HostError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "path contains interior NUL",
        ))
    })?;
    // SAFETY: chown with a valid path and ids resolved above.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if ret == 0 {
        Ok(())
    } else {
        Err(HostError::Io(std::io::Error::last_os_error()))
    }
}

/// Filesystem backend for the live host.
#[derive(Debug, Default)]
pub struct LiveFilesystem;

impl LiveFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn missing(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::NotFound
}

impl Filesystem for LiveFilesystem {
    fn stat_directory(&self, path: &Path) -> Result<Option<DirectoryState>, HostError> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(Some(DirectoryState {
                owner: name_of_uid(meta.uid()),
                group: name_of_gid(meta.gid()),
                mode: meta.permissions().mode() & 0o7777,
            })),
            Ok(_) => Ok(None),
            Err(e) if missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn stat_symlink(&self, path: &Path) -> Result<Option<PathBuf>, HostError> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(Some(fs::read_link(path)?)),
            Ok(_) => Ok(None),
            Err(e) if missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn stat_file(&self, path: &Path) -> Result<Option<FileState>, HostError> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(FileState {
                content: fs::read(path)?,
                owner: name_of_uid(meta.uid()),
                group: name_of_gid(meta.gid()),
                mode: meta.permissions().mode() & 0o7777,
            })),
            Ok(_) => Ok(None),
            Err(e) if missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn path_exists(&self, path: &Path) -> Result<bool, HostError> {
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>, HostError> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths: Vec<PathBuf> = entries
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn create_directory(
        &self,
        path: &Path,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), HostError> {
        fs::create_dir_all(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        chown(path, owner, group)
    }

    fn create_symlink(&self, path: &Path, target: &Path) -> Result<(), HostError> {
        // Replace a wrong-target link rather than failing on EEXIST.
        if self.stat_symlink(path)?.is_some() {
            fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(target, path)?;
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
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        chown(path, owner, group)
    }

    fn remove_recursive(&self, path: &Path) -> Result<(), HostError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if missing(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_symlink(&self, path: &Path) -> Result<(), HostError> {
        if self.stat_symlink(path)?.is_some() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn purge_directory(&self, path: &Path) -> Result<(), HostError> {
        for entry in self.list_directory(path)? {
            let meta = fs::symlink_metadata(&entry)?;
            if meta.is_dir() {
                fs::remove_dir_all(&entry)?;
            } else {
                fs::remove_file(&entry)?;
            }
        }
        Ok(())
    }
}

/// Service supervisor using systemctl when the host runs systemd, falling
/// back to the SysV `service` wrapper on EL5/EL6.
#[derive(Debug)]
pub struct LiveSupervisor {
    systemd: bool,
}

impl LiveSupervisor {
    pub fn detect() -> Self {
        Self {
            systemd: Path::new("/run/systemd/system").exists(),
        }
    }

    fn invoke(&self, name: &str, action: &str) -> Result<(), HostError> {
        debug!("service {name}: {action}");
        if self.systemd {
            run_checked("systemctl", &[action, name])?;
        } else {
            run_checked("service", &[name, action])?;
        }
        Ok(())
    }
}

impl ServiceSupervisor for LiveSupervisor {
    fn reload(&self, name: &str) -> Result<(), HostError> {
        self.invoke(name, "reload")
    }

    fn restart(&self, name: &str) -> Result<(), HostError> {
        self.invoke(name, "restart")
    }

    fn is_running(&self, name: &str) -> Result<bool, HostError> {
        let output = if self.systemd {
            Command::new("systemctl")
                .args(["is-active", "--quiet", name])
                .output()?
        } else {
            Command::new("service").args([name, "status"]).output()?
        };
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_owner() -> (String, String) {
        // SAFETY: geteuid/getegid have no preconditions.
        #[allow(unsafe_code)]
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        (name_of_uid(uid), name_of_gid(gid))
    }

    #[test]
    fn directory_roundtrip_with_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let fs_backend = LiveFilesystem::new();
        let path = dir.path().join("managed");
        let (owner, group) = current_owner();

        fs_backend
            .create_directory(&path, &owner, &group, 0o750)
            .unwrap();
        let observed = fs_backend.stat_directory(&path).unwrap().unwrap();
        assert_eq!(observed.owner, owner);
        assert_eq!(observed.group, group);
        assert_eq!(observed.mode, 0o750);
    }

    #[test]
    fn missing_paths_observe_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let fs_backend = LiveFilesystem::new();
        let path = dir.path().join("absent");

        assert!(fs_backend.stat_directory(&path).unwrap().is_none());
        assert!(fs_backend.stat_symlink(&path).unwrap().is_none());
        assert!(fs_backend.stat_file(&path).unwrap().is_none());
        assert!(!fs_backend.path_exists(&path).unwrap());
    }

    #[test]
    fn symlink_create_read_replace_remove() {
        let dir = tempfile::tempdir().unwrap();
        let fs_backend = LiveFilesystem::new();
        let link = dir.path().join("run");

        fs_backend
            .create_symlink(&link, Path::new("../../var/run/"))
            .unwrap();
        assert_eq!(
            fs_backend.stat_symlink(&link).unwrap(),
            Some(PathBuf::from("../../var/run/"))
        );

        fs_backend
            .create_symlink(&link, Path::new("../../var/run/httpd"))
            .unwrap();
        assert_eq!(
            fs_backend.stat_symlink(&link).unwrap(),
            Some(PathBuf::from("../../var/run/httpd"))
        );

        fs_backend.remove_symlink(&link).unwrap();
        assert!(!fs_backend.path_exists(&link).unwrap());
    }

    #[test]
    fn file_write_and_stat_content() {
        let dir = tempfile::tempdir().unwrap();
        let fs_backend = LiveFilesystem::new();
        let path = dir.path().join("conf/httpd.conf");
        let (owner, group) = current_owner();

        fs_backend
            .write_file(&path, b"Listen 80\n", &owner, &group, 0o644)
            .unwrap();
        let observed = fs_backend.stat_file(&path).unwrap().unwrap();
        assert_eq!(observed.content, b"Listen 80\n");
        assert_eq!(observed.mode, 0o644);
    }

    #[test]
    fn purge_keeps_the_directory_itself() {
        let dir = tempfile::tempdir().unwrap();
        let fs_backend = LiveFilesystem::new();
        let target = dir.path().join("conf.d");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("a.conf"), "x").unwrap();
        fs::create_dir(target.join("sub")).unwrap();

        fs_backend.purge_directory(&target).unwrap();
        assert!(target.exists());
        assert!(fs_backend.list_directory(&target).unwrap().is_empty());
    }

    #[test]
    fn unknown_owner_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs_backend = LiveFilesystem::new();
        let err = fs_backend
            .create_directory(&dir.path().join("d"), "no-such-user-xyz", "root", 0o755)
            .unwrap_err();
        assert!(matches!(err, HostError::UnknownPrincipal(_)));
    }
}
