use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Stable identity of a resource within one run: `label[target]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(label: &str, target: impl fmt::Display) -> Self {
        Self(format!("{label}[{target}]"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Package,
    Directory,
    Symlink,
    Template,
    Module,
    Service,
}

/// Action applied to a resource, either by the main walk or a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionVerb {
    Create,
    Delete,
    /// Remove the contents of a directory, keeping the directory itself.
    Purge,
    Reload,
    Restart,
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionVerb::Create => "create",
            ActionVerb::Delete => "delete",
            ActionVerb::Purge => "purge",
            ActionVerb::Reload => "reload",
            ActionVerb::Restart => "restart",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    /// Dispatched synchronously, inline, before the walk advances.
    Immediate,
    /// Queued, deduplicated, and fired after the main walk completes.
    Delayed,
}

/// Outgoing notification edge: apply `verb` to `target` when this resource
/// is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub target: ResourceId,
    pub verb: ActionVerb,
    pub timing: Timing,
}

/// Predicate gating whether a resource is evaluated at all this run.
///
/// Guards are data, not closures, so resource sets stay comparable and
/// serializable. Path guards consult the host filesystem and are fallible;
/// a guard that cannot be evaluated aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Guard {
    /// True when the instance name differs from the default instance.
    NonDefaultInstance { instance: String },
    /// True when the path exists on the host.
    PathPresent(PathBuf),
    /// True when the path is absent from the host.
    PathAbsent(PathBuf),
}

/// Kind-specific desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredState {
    Package {
        name: String,
        version: Option<String>,
    },
    Directory {
        path: PathBuf,
        owner: String,
        group: String,
        mode: u32,
        recursive: bool,
    },
    Symlink {
        path: PathBuf,
        target: PathBuf,
    },
    Template {
        path: PathBuf,
        template_id: String,
        owner: String,
        group: String,
        mode: u32,
        variables: BTreeMap<String, serde_json::Value>,
    },
    Module {
        name: String,
        load_file: PathBuf,
    },
    Service {
        name: String,
    },
}

impl DesiredState {
    pub fn kind(&self) -> Kind {
        match self {
            DesiredState::Package { .. } => Kind::Package,
            DesiredState::Directory { .. } => Kind::Directory,
            DesiredState::Symlink { .. } => Kind::Symlink,
            DesiredState::Template { .. } => Kind::Template,
            DesiredState::Module { .. } => Kind::Module,
            DesiredState::Service { .. } => Kind::Service,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub state: DesiredState,
    /// Verb the main walk applies when the resource diverges.
    pub verb: ActionVerb,
    /// Passive resources are skipped by the main walk and act only when
    /// notified.
    pub passive: bool,
    pub guard: Option<Guard>,
    pub notifies: Vec<Notification>,
}

impl Resource {
    pub fn new(id: ResourceId, state: DesiredState, verb: ActionVerb) -> Self {
        Self {
            id,
            state,
            verb,
            passive: false,
            guard: None,
            notifies: Vec::new(),
        }
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn notifying(mut self, target: ResourceId, verb: ActionVerb, timing: Timing) -> Self {
        self.notifies.push(Notification {
            target,
            verb,
            timing,
        });
        self
    }

    pub fn kind(&self) -> Kind {
        self.state.kind()
    }
}

/// Ordered resource declarations for one top-level action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.get(id).is_some()
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}
