//! Convergence core for Stratum.
//!
//! Ties profile resolution, resource-set construction, and host backends into
//! the `Engine` — the per-action entry point that walks a resource set in
//! declaration order, converges each divergent resource exactly once, and
//! dispatches change notifications (immediate inline, delayed deduplicated
//! after the walk).

pub mod concurrency;
pub mod dispatcher;
pub mod engine;
pub mod executor;

pub use concurrency::RunLock;
pub use dispatcher::NotificationDispatcher;
pub use engine::Engine;
pub use executor::{ConvergenceReport, Executor, Outcome, RunFailure, RunOutcome};

use stratum_plan::{ActionVerb, ResourceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("resolution error: {0}")]
    Resolution(#[from] stratum_profile::ResolutionError),
    #[error("host error: {0}")]
    Host(#[from] stratum_host::HostError),
    /// A declared notification edge points at an identity absent from the
    /// resource set: a builder/profile inconsistency, detected before any
    /// resource is touched.
    #[error("notification from {notifier} targets unknown resource {target}")]
    DanglingNotification {
        notifier: ResourceId,
        target: ResourceId,
    },
    #[error("resource {id} does not support action '{verb}'")]
    UnsupportedAction { id: ResourceId, verb: ActionVerb },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
