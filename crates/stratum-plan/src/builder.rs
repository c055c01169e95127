use crate::resource::{
    ActionVerb, DesiredState, Guard, Notification, Resource, ResourceId, ResourceSet, Timing,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use stratum_profile::Profile;

/// Base package installed for every instance; instances share the package.
const BASE_PACKAGE: &str = "httpd";
/// Utility package the installation expects to be present.
const UTILITY_PACKAGE: &str = "net-tools";

const ROOT: &str = "root";
const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Delete => f.write_str("delete"),
        }
    }
}

/// Build the ordered resource set for a top-level action.
///
/// Pure and deterministic: the same profile and MPM choice always produce an
/// identical set, which is what makes idempotence testable at all.
pub fn build(action: Action, profile: &Profile, mpm: &str) -> ResourceSet {
    match action {
        Action::Create => build_create(profile, mpm),
        Action::Delete => build_delete(profile),
    }
}

fn service_id(profile: &Profile) -> ResourceId {
    ResourceId::new("service", &profile.service_name)
}

fn directory(path: PathBuf) -> Resource {
    Resource::new(
        ResourceId::new("directory", path.display()),
        DesiredState::Directory {
            path,
            owner: ROOT.to_owned(),
            group: ROOT.to_owned(),
            mode: DIR_MODE,
            recursive: true,
        },
        ActionVerb::Create,
    )
}

fn directory_delete(path: PathBuf) -> Resource {
    Resource::new(
        ResourceId::new("directory", path.display()),
        DesiredState::Directory {
            path,
            owner: ROOT.to_owned(),
            group: ROOT.to_owned(),
            mode: DIR_MODE,
            recursive: true,
        },
        ActionVerb::Delete,
    )
}

fn symlink(path: PathBuf, target: PathBuf, verb: ActionVerb) -> Resource {
    Resource::new(
        ResourceId::new("symlink", path.display()),
        DesiredState::Symlink { path, target },
        verb,
    )
}

fn module(profile: &Profile, name: &str) -> Resource {
    Resource::new(
        ResourceId::new("module", name),
        DesiredState::Module {
            name: name.to_owned(),
            load_file: module_load_file(profile, name),
        },
        ActionVerb::Create,
    )
    .notifying(service_id(profile), ActionVerb::Reload, Timing::Delayed)
}

/// Where a module's load directive is written for the profile's version
/// family: `conf.modules.d/<name>.conf` on 2.4+, `conf.d/<name>.load` before.
fn module_load_file(profile: &Profile, name: &str) -> PathBuf {
    if profile.version.is_modern() {
        profile.server_root.join(format!("conf.modules.d/{name}.conf"))
    } else {
        profile.server_root.join(format!("conf.d/{name}.load"))
    }
}

fn non_default_guard(profile: &Profile) -> Guard {
    Guard::NonDefaultInstance {
        instance: profile.instance.clone(),
    }
}

fn main_config_variables(profile: &Profile) -> BTreeMap<String, Value> {
    let mut vars = BTreeMap::new();
    vars.insert(
        "server_root".to_owned(),
        Value::String(profile.server_root.display().to_string()),
    );
    vars.insert(
        "error_log".to_owned(),
        Value::String(profile.error_log().display().to_string()),
    );
    vars.insert(
        "pid_file".to_owned(),
        Value::String(profile.pid_file.display().to_string()),
    );
    // Not parameterized by the profile yet; rendered as absent.
    vars.insert("lock_file".to_owned(), Value::Null);
    vars.insert("mutex".to_owned(), Value::Null);
    vars.insert(
        "includes".to_owned(),
        Value::Array(profile.includes.iter().cloned().map(Value::String).collect()),
    );
    vars.insert(
        "include_optionals".to_owned(),
        Value::Array(
            profile
                .include_optionals
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );
    vars
}

#[allow(clippy::too_many_lines)]
fn build_create(profile: &Profile, mpm: &str) -> ResourceSet {
    let svc = service_id(profile);
    let mut resources = Vec::new();

    // Software installation. A fresh package drags in distribution config
    // that must not survive into the managed layout, so the install
    // immediately notifies a purge of the package-owned directories.
    let purge_conf_d = ResourceId::new("purge", "/etc/httpd/conf.d");
    let purge_modules_d = ResourceId::new("purge", "/etc/httpd/conf.modules.d");
    resources.push(
        Resource::new(
            ResourceId::new("package", BASE_PACKAGE),
            DesiredState::Package {
                name: BASE_PACKAGE.to_owned(),
                version: None,
            },
            ActionVerb::Create,
        )
        .notifying(purge_conf_d.clone(), ActionVerb::Purge, Timing::Immediate)
        .notifying(purge_modules_d.clone(), ActionVerb::Purge, Timing::Immediate),
    );
    resources.push(
        Resource::new(
            purge_conf_d,
            DesiredState::Directory {
                path: PathBuf::from("/etc/httpd/conf.d"),
                owner: ROOT.to_owned(),
                group: ROOT.to_owned(),
                mode: DIR_MODE,
                recursive: true,
            },
            ActionVerb::Purge,
        )
        .passive(),
    );
    resources.push(
        Resource::new(
            purge_modules_d,
            DesiredState::Directory {
                path: PathBuf::from("/etc/httpd/conf.modules.d"),
                owner: ROOT.to_owned(),
                group: ROOT.to_owned(),
                mode: DIR_MODE,
                recursive: true,
            },
            ActionVerb::Purge,
        )
        .passive(),
    );
    resources.push(Resource::new(
        ResourceId::new("package", UTILITY_PACKAGE),
        DesiredState::Package {
            name: UTILITY_PACKAGE.to_owned(),
            version: None,
        },
        ActionVerb::Create,
    ));

    // Parity with modules statically compiled in on Debian-family builds.
    for name in &profile.modules {
        resources.push(module(profile, name));
    }

    // Binary symlinks only exist for suffixed instances.
    resources.push(
        symlink(
            profile.binary_path(),
            PathBuf::from("/usr/sbin/httpd"),
            ActionVerb::Create,
        )
        .with_guard(non_default_guard(profile)),
    );

    // MPM loading: pre-2.4 ships alternate binaries, 2.4+ loads a module.
    if profile.version.is_modern() {
        resources.push(module(profile, &format!("mpm_{mpm}")));
    } else {
        for alt in ["worker", "event"] {
            resources.push(
                symlink(
                    PathBuf::from(format!("/usr/sbin/{}.{alt}", profile.service_name)),
                    PathBuf::from(format!("/usr/sbin/httpd.{alt}")),
                    ActionVerb::Create,
                )
                .with_guard(non_default_guard(profile)),
            );
        }
    }

    // MPM configuration.
    let mut mpm_vars = BTreeMap::new();
    mpm_vars.insert("mpm".to_owned(), Value::String(mpm.to_owned()));
    resources.push(
        Resource::new(
            ResourceId::new(
                "template",
                profile.server_root.join(format!("conf.d/mpm_{mpm}.conf")).display(),
            ),
            DesiredState::Template {
                path: profile.server_root.join(format!("conf.d/mpm_{mpm}.conf")),
                template_id: "mpm.conf".to_owned(),
                owner: ROOT.to_owned(),
                group: ROOT.to_owned(),
                mode: FILE_MODE,
                variables: mpm_vars,
            },
            ActionVerb::Create,
        )
        .notifying(svc.clone(), ActionVerb::Reload, Timing::Delayed),
    );

    // Configuration directory skeleton.
    resources.push(directory(profile.server_root.clone()));
    resources.push(directory(profile.server_root.join("conf")));
    resources.push(directory(profile.server_root.join("conf.d")));
    if profile.version.is_modern() {
        resources.push(directory(profile.server_root.join("conf.modules.d")));
    }

    // Support directories.
    resources.push(directory(profile.module_dir()));
    resources.push(directory(profile.log_dir()));

    // Convenience symlinks.
    resources.push(symlink(
        profile.server_root.join("logs"),
        PathBuf::from(format!("../../var/log/{}", profile.service_name)),
        ActionVerb::Create,
    ));
    resources.push(symlink(
        profile.server_root.join("modules"),
        PathBuf::from(format!("../../usr/{}/httpd/modules", profile.lib_arch_dir)),
        ActionVerb::Create,
    ));

    // Runtime directory: EL6/EL7 get a dedicated /var/run subdirectory,
    // EL5 links straight at the shared /var/run.
    if profile.channel.has_runtime_dir() {
        resources.push(directory(profile.runtime_dir()));
        resources.push(symlink(
            profile.server_root.join("run"),
            PathBuf::from(format!("../../var/run/{}", profile.service_name)),
            ActionVerb::Create,
        ));
    } else {
        resources.push(symlink(
            profile.server_root.join("run"),
            PathBuf::from("../../var/run/"),
            ActionVerb::Create,
        ));
    }

    // Configuration files.
    resources.push(Resource::new(
        ResourceId::new("template", profile.server_root.join("conf/magic").display()),
        DesiredState::Template {
            path: profile.server_root.join("conf/magic"),
            template_id: "magic".to_owned(),
            owner: ROOT.to_owned(),
            group: ROOT.to_owned(),
            mode: FILE_MODE,
            variables: BTreeMap::new(),
        },
        ActionVerb::Create,
    ));
    // A changed main config needs a full restart: core directives may have
    // changed, not just loaded modules.
    resources.push(
        Resource::new(
            ResourceId::new(
                "template",
                profile.server_root.join("conf/httpd.conf").display(),
            ),
            DesiredState::Template {
                path: profile.server_root.join("conf/httpd.conf"),
                template_id: "httpd.conf".to_owned(),
                owner: ROOT.to_owned(),
                group: ROOT.to_owned(),
                mode: FILE_MODE,
                variables: main_config_variables(profile),
            },
            ActionVerb::Create,
        )
        .notifying(svc.clone(), ActionVerb::Restart, Timing::Delayed),
    );

    // The service node exists so notification edges resolve; starting and
    // enabling it belongs to the supervisor's create hook.
    resources.push(
        Resource::new(
            svc,
            DesiredState::Service {
                name: profile.service_name.clone(),
            },
            ActionVerb::Create,
        )
        .passive(),
    );

    ResourceSet::new(resources)
}

fn build_delete(profile: &Profile) -> ResourceSet {
    let mut resources = Vec::new();

    resources.push(
        symlink(
            profile.binary_path(),
            PathBuf::from("/usr/sbin/httpd"),
            ActionVerb::Delete,
        )
        .with_guard(non_default_guard(profile)),
    );

    if !profile.version.is_modern() {
        for alt in ["worker", "event"] {
            resources.push(
                symlink(
                    PathBuf::from(format!("/usr/sbin/{}.{alt}", profile.service_name)),
                    PathBuf::from(format!("/usr/sbin/httpd.{alt}")),
                    ActionVerb::Delete,
                )
                .with_guard(non_default_guard(profile)),
            );
        }
    }

    resources.push(directory_delete(profile.server_root.clone()));
    resources.push(directory_delete(profile.log_dir()));

    // Mirrors create's runtime-directory branching.
    if profile.channel.has_runtime_dir() {
        resources.push(directory_delete(profile.runtime_dir()));
    }
    resources.push(symlink(
        profile.server_root.join("run"),
        if profile.channel.has_runtime_dir() {
            PathBuf::from(format!("../../var/run/{}", profile.service_name))
        } else {
            PathBuf::from("../../var/run/")
        },
        ActionVerb::Delete,
    ));

    ResourceSet::new(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;
    use stratum_profile::{resolve, HostFacts};

    fn el7_profile(version: &str, instance: &str) -> Profile {
        resolve(&HostFacts::new("x86_64", "7.2"), version, instance).unwrap()
    }

    fn el5_profile(version: &str) -> Profile {
        resolve(&HostFacts::new("x86_64", "5.11"), version, "default").unwrap()
    }

    #[test]
    fn build_is_deterministic() {
        let profile = el7_profile("2.4.6", "default");
        let a = build(Action::Create, &profile, "event");
        let b = build(Action::Create, &profile, "event");
        assert_eq!(a, b);
    }

    #[test]
    fn modern_default_create_layout() {
        let profile = el7_profile("2.4.6", "default");
        let set = build(Action::Create, &profile, "event");

        assert!(set.contains(&ResourceId::new("directory", "/etc/httpd/conf.modules.d")));
        assert!(set.contains(&ResourceId::new("module", "mpm_event")));
        assert!(set.contains(&ResourceId::new("directory", "/var/run/httpd")));
        assert!(set.contains(&ResourceId::new("symlink", "/etc/httpd/run")));

        // 2.4+ never ships alternate MPM binaries.
        assert!(!set.contains(&ResourceId::new("symlink", "/usr/sbin/httpd.worker")));
        assert!(!set.contains(&ResourceId::new("symlink", "/usr/sbin/httpd.event")));
    }

    #[test]
    fn package_purges_distribution_config_immediately() {
        let profile = el7_profile("2.4.6", "default");
        let set = build(Action::Create, &profile, "event");

        let pkg = set.get(&ResourceId::new("package", "httpd")).unwrap();
        assert_eq!(pkg.notifies.len(), 2);
        for n in &pkg.notifies {
            assert_eq!(n.verb, ActionVerb::Purge);
            assert_eq!(n.timing, Timing::Immediate);
            assert!(set.contains(&n.target));
        }

        let purge = set.get(&ResourceId::new("purge", "/etc/httpd/conf.d")).unwrap();
        assert!(purge.passive);
        assert_eq!(purge.kind(), Kind::Directory);
    }

    #[test]
    fn modules_reload_service_delayed() {
        let profile = el7_profile("2.4.6", "default");
        let set = build(Action::Create, &profile, "event");

        for name in &profile.modules {
            let m = set.get(&ResourceId::new("module", name)).unwrap();
            assert_eq!(
                m.notifies,
                vec![Notification {
                    target: ResourceId::new("service", "httpd"),
                    verb: ActionVerb::Reload,
                    timing: Timing::Delayed,
                }]
            );
            // Modern load files live under conf.modules.d.
            if let DesiredState::Module { load_file, .. } = &m.state {
                assert!(load_file.starts_with("/etc/httpd/conf.modules.d"));
            } else {
                panic!("module resource has non-module state");
            }
        }
    }

    #[test]
    fn legacy_create_has_alternate_binaries_and_no_modules_dir() {
        let profile = el7_profile("2.2.15", "default");
        let set = build(Action::Create, &profile, "prefork");

        assert!(set.contains(&ResourceId::new("symlink", "/usr/sbin/httpd.worker")));
        assert!(set.contains(&ResourceId::new("symlink", "/usr/sbin/httpd.event")));
        assert!(!set.contains(&ResourceId::new("directory", "/etc/httpd/conf.modules.d")));
        assert!(!set.contains(&ResourceId::new("module", "mpm_prefork")));

        let worker = set
            .get(&ResourceId::new("symlink", "/usr/sbin/httpd.worker"))
            .unwrap();
        assert_eq!(
            worker.guard,
            Some(Guard::NonDefaultInstance {
                instance: "default".to_owned()
            })
        );
        // Legacy load files live under conf.d.
        let m = set.get(&ResourceId::new("module", "logio")).unwrap();
        if let DesiredState::Module { load_file, .. } = &m.state {
            assert_eq!(load_file, &PathBuf::from("/etc/httpd/conf.d/logio.load"));
        } else {
            panic!("module resource has non-module state");
        }
    }

    #[test]
    fn el5_runtime_symlink_points_at_shared_var_run() {
        let profile = el5_profile("2.2.15");
        let set = build(Action::Create, &profile, "prefork");

        assert!(!set.contains(&ResourceId::new("directory", "/var/run/httpd")));
        let run = set.get(&ResourceId::new("symlink", "/etc/httpd/run")).unwrap();
        assert_eq!(
            run.state,
            DesiredState::Symlink {
                path: PathBuf::from("/etc/httpd/run"),
                target: PathBuf::from("../../var/run/"),
            }
        );
    }

    #[test]
    fn main_config_restarts_rather_than_reloads() {
        let profile = el7_profile("2.4.6", "default");
        let set = build(Action::Create, &profile, "event");

        let conf = set
            .get(&ResourceId::new("template", "/etc/httpd/conf/httpd.conf"))
            .unwrap();
        assert_eq!(
            conf.notifies,
            vec![Notification {
                target: ResourceId::new("service", "httpd"),
                verb: ActionVerb::Restart,
                timing: Timing::Delayed,
            }]
        );

        let magic = set
            .get(&ResourceId::new("template", "/etc/httpd/conf/magic"))
            .unwrap();
        assert!(magic.notifies.is_empty());
    }

    #[test]
    fn instance_paths_flow_through_create() {
        let profile = el7_profile("2.4.6", "staging");
        let set = build(Action::Create, &profile, "worker");

        assert!(set.contains(&ResourceId::new("symlink", "/usr/sbin/httpd-staging")));
        assert!(set.contains(&ResourceId::new("directory", "/etc/httpd-staging/conf.d")));
        assert!(set.contains(&ResourceId::new("directory", "/var/run/httpd-staging")));
        assert!(set.contains(&ResourceId::new("service", "httpd-staging")));
        // Purge always targets the package-owned base paths.
        assert!(set.contains(&ResourceId::new("purge", "/etc/httpd/conf.d")));
    }

    #[test]
    fn delete_mirrors_runtime_branching() {
        let el7 = build(Action::Delete, &el7_profile("2.4.6", "default"), "event");
        assert!(el7.contains(&ResourceId::new("directory", "/var/run/httpd")));
        assert!(el7.contains(&ResourceId::new("symlink", "/etc/httpd/run")));
        assert!(el7.contains(&ResourceId::new("directory", "/etc/httpd")));
        assert!(el7.contains(&ResourceId::new("directory", "/var/log/httpd")));

        let el5 = build(Action::Delete, &el5_profile("2.2.15"), "prefork");
        assert!(!el5.contains(&ResourceId::new("directory", "/var/run/httpd")));
        assert!(el5.contains(&ResourceId::new("symlink", "/etc/httpd/run")));
    }

    #[test]
    fn delete_includes_legacy_alternate_symlinks() {
        let set = build(Action::Delete, &el7_profile("2.2.15", "web1"), "prefork");
        assert!(set.contains(&ResourceId::new("symlink", "/usr/sbin/httpd-web1.worker")));
        assert!(set.contains(&ResourceId::new("symlink", "/usr/sbin/httpd-web1.event")));

        let modern = build(Action::Delete, &el7_profile("2.4.6", "web1"), "event");
        assert!(!modern.contains(&ResourceId::new("symlink", "/usr/sbin/httpd-web1.worker")));
    }
}
