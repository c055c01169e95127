//! Resource data model and resource-set construction for Stratum.
//!
//! A [`ResourceSet`] is an ordered list of resource declarations with guards
//! and notification edges. Declaration order is the only ordering guarantee
//! the executor honors, so the builder emits a fixed declaration sequence and
//! is fully deterministic for a given profile.

pub mod builder;
pub mod resource;

pub use builder::{build, Action};
pub use resource::{
    ActionVerb, DesiredState, Guard, Kind, Notification, Resource, ResourceId, ResourceSet, Timing,
};
