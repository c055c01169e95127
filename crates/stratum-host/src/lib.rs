//! Host collaborator backends for Stratum.
//!
//! The convergence core never touches the host directly: it observes and
//! mutates state through four capabilities — package manager, filesystem,
//! template renderer, and service supervisor. This crate defines those
//! capability traits, a live backend for EL hosts, and an in-memory mock
//! backend used throughout the test suites.

pub mod backend;
pub mod live;
pub mod mock;
pub mod render;

pub use backend::{
    select_host, DirectoryState, FileState, Filesystem, Host, PackageManager, ServiceSupervisor,
    TemplateRenderer,
};
pub use mock::{MockHost, MockNode};
pub use render::ConfRenderer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command '{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("unknown template: '{0}'")]
    UnknownTemplate(String),
    #[error("template '{template}' missing variable '{name}'")]
    MissingVariable { template: String, name: String },
    #[error("unknown user or group: '{0}'")]
    UnknownPrincipal(String),
    #[error("unknown host backend: '{0}'")]
    BackendUnavailable(String),
}
