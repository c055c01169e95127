use crate::{HostFacts, ProductVersion, ResolutionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_INSTANCE: &str = "default";
pub const BASE_SERVICE_NAME: &str = "httpd";

/// Enterprise Linux major-version channel.
///
/// The channel drives layout branching: EL5 has no per-instance runtime
/// directory and uses a flat PID file path, EL6/EL7 get a dedicated
/// `/var/run/<name>` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    El5,
    El6,
    El7,
}

impl Channel {
    pub fn major(self) -> u32 {
        match self {
            Channel::El5 => 5,
            Channel::El6 => 6,
            Channel::El7 => 7,
        }
    }

    /// Whether this channel uses a per-instance runtime directory.
    pub fn has_runtime_dir(self) -> bool {
        self != Channel::El5
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "el{}", self.major())
    }
}

/// Fully resolved configuration profile.
///
/// Immutable once resolved; every field is a pure function of the host facts,
/// product version, and instance name. Two profiles resolved concurrently for
/// different instances share nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub lib_arch_dir: String,
    pub channel: Channel,
    pub version: ProductVersion,
    pub instance: String,
    /// Process and service name: `httpd` for the default instance,
    /// `httpd-<instance>` otherwise.
    pub service_name: String,
    pub server_root: PathBuf,
    pub pid_file: PathBuf,
    /// Base module set for the resolved version family, MPM excluded.
    pub modules: Vec<String>,
    /// Hard include patterns: a missing match is a configuration error.
    pub includes: Vec<String>,
    /// Optional include patterns: zero matching files is acceptable.
    pub include_optionals: Vec<String>,
}

impl Profile {
    pub fn is_default_instance(&self) -> bool {
        self.instance == DEFAULT_INSTANCE
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(format!("/var/log/{}", self.service_name))
    }

    pub fn module_dir(&self) -> PathBuf {
        PathBuf::from(format!("/usr/{}/httpd/modules", self.lib_arch_dir))
    }

    pub fn runtime_dir(&self) -> PathBuf {
        PathBuf::from(format!("/var/run/{}", self.service_name))
    }

    pub fn binary_path(&self) -> PathBuf {
        PathBuf::from(format!("/usr/sbin/{}", self.service_name))
    }

    pub fn error_log(&self) -> PathBuf {
        self.log_dir().join("error_log")
    }
}

/// Resolve a configuration profile from host facts and caller parameters.
///
/// Unmapped architectures and platform versions fail here, before any
/// resource plan exists — a profile with an unset arch or channel would only
/// produce malformed paths downstream.
pub fn resolve(
    facts: &HostFacts,
    product_version: &str,
    instance: &str,
) -> Result<Profile, ResolutionError> {
    let lib_arch_dir = match facts.machine.as_str() {
        "x86_64" => "lib64",
        "i686" => "lib",
        other => return Err(ResolutionError::UnsupportedArchitecture(other.to_owned())),
    };

    let channel = resolve_channel(&facts.platform_version)?;
    let version = ProductVersion::parse(product_version)?;

    let service_name = if instance == DEFAULT_INSTANCE {
        BASE_SERVICE_NAME.to_owned()
    } else {
        format!("{BASE_SERVICE_NAME}-{instance}")
    };

    let pid_file = match channel {
        Channel::El5 => PathBuf::from(format!("/var/run/{service_name}.pid")),
        Channel::El6 | Channel::El7 => {
            PathBuf::from(format!("/var/run/{service_name}/httpd.pid"))
        }
    };

    let (modules, includes, include_optionals) = if version.is_modern() {
        (
            vec![
                "log_config".to_owned(),
                "logio".to_owned(),
                "unixd".to_owned(),
                "version".to_owned(),
                "watchdog".to_owned(),
            ],
            Vec::new(),
            vec![
                "conf.d/*.conf".to_owned(),
                "conf.d/*.load".to_owned(),
                "conf.modules.d/*.conf".to_owned(),
                "conf.modules.d/*.load".to_owned(),
            ],
        )
    } else {
        (
            vec!["log_config".to_owned(), "logio".to_owned()],
            vec!["conf.d/*.conf".to_owned(), "conf.d/*.load".to_owned()],
            Vec::new(),
        )
    };

    let profile = Profile {
        lib_arch_dir: lib_arch_dir.to_owned(),
        channel,
        version,
        instance: instance.to_owned(),
        server_root: PathBuf::from(format!("/etc/{service_name}")),
        service_name,
        pid_file,
        modules,
        includes,
        include_optionals,
    };
    debug!(
        "resolved profile: {} {} on {} ({})",
        profile.service_name, profile.version, profile.channel, profile.lib_arch_dir
    );
    Ok(profile)
}

/// Map a platform version string onto a channel.
///
/// The version is truncated to its leading integer. 2013 and 2014 are
/// historical Amazon Linux releases that track the EL6 layout.
fn resolve_channel(platform_version: &str) -> Result<Channel, ResolutionError> {
    let major: u32 = platform_version
        .split('.')
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ResolutionError::UnsupportedPlatform(platform_version.to_owned()))?;

    match major {
        5 => Ok(Channel::El5),
        6 | 2013 | 2014 => Ok(Channel::El6),
        7 => Ok(Channel::El7),
        _ => Err(ResolutionError::UnsupportedPlatform(
            platform_version.to_owned(),
        )),
    }
}
