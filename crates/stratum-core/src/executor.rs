use crate::dispatcher::NotificationDispatcher;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use stratum_host::Host;
use stratum_plan::{
    Action, ActionVerb, DesiredState, Guard, Resource, ResourceId, ResourceSet, Timing,
};
use stratum_profile::profile::DEFAULT_INSTANCE;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Guard was false (or the resource is passive): nothing was observed
    /// and nothing fired.
    Skipped,
    /// Observed state already matched; no notifications fire.
    Noop,
    Applied,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Skipped => "skipped",
            Outcome::Noop => "no-op",
            Outcome::Applied => "applied",
            Outcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One convergence event. A resource can appear more than once when it is
/// revisited through a notification edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub id: ResourceId,
    pub verb: ActionVerb,
    pub outcome: Outcome,
}

/// Why a run aborted. Resources after the point of failure were never
/// attempted and have no outcome entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunFailure {
    /// A guard predicate could not be evaluated; neither true nor false is a
    /// safe substitute.
    Guard { id: ResourceId, message: String },
    /// A collaborator call failed while observing or applying.
    Apply { id: ResourceId, message: String },
    /// An immediate notification reached an identity already being
    /// dispatched.
    Cycle { id: ResourceId },
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Guard { id, message } => {
                write!(f, "guard evaluation failed for {id}: {message}")
            }
            RunFailure::Apply { id, message } => write!(f, "apply failed for {id}: {message}"),
            RunFailure::Cycle { id } => {
                write!(f, "immediate notification cycle detected at {id}")
            }
        }
    }
}

/// Outcome log of one convergence run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub action: Action,
    pub outcomes: Vec<RunOutcome>,
    pub failure: Option<RunFailure>,
    pub started_at: String,
    pub finished_at: String,
}

impl ConvergenceReport {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// Most recent outcome recorded for an identity, if it was reached.
    pub fn outcome_of(&self, id: &ResourceId) -> Option<Outcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|o| &o.id == id)
            .map(|o| o.outcome)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|o| o.outcome == outcome).count()
    }
}

struct RunState {
    outcomes: Vec<RunOutcome>,
    dispatcher: NotificationDispatcher,
    /// Identities currently being converged; immediate dispatch into a
    /// member of this stack is a cycle.
    dispatching: Vec<ResourceId>,
}

impl RunState {
    fn record(&mut self, id: &ResourceId, verb: ActionVerb, outcome: Outcome) {
        self.outcomes.push(RunOutcome {
            id: id.clone(),
            verb,
            outcome,
        });
    }
}

/// Walks a resource set strictly in declaration order, converging each
/// resource at most once per visit and managing notification dispatch for
/// the whole run.
pub struct Executor<'a> {
    host: &'a Host,
}

impl<'a> Executor<'a> {
    pub fn new(host: &'a Host) -> Self {
        Self { host }
    }

    pub fn run(&self, set: &ResourceSet, action: Action) -> Result<ConvergenceReport, CoreError> {
        // Every declared edge must resolve before anything is touched.
        for resource in set {
            for n in &resource.notifies {
                if !set.contains(&n.target) {
                    return Err(CoreError::DanglingNotification {
                        notifier: resource.id.clone(),
                        target: n.target.clone(),
                    });
                }
            }
        }

        let started_at = chrono::Utc::now().to_rfc3339();
        let mut run = RunState {
            outcomes: Vec::new(),
            dispatcher: NotificationDispatcher::new(),
            dispatching: Vec::new(),
        };

        let mut failure = None;
        for resource in set {
            if resource.passive {
                run.record(&resource.id, resource.verb, Outcome::Skipped);
                continue;
            }
            if let Err(f) = self.converge(set, resource, resource.verb, &mut run) {
                warn!("run aborted: {f}");
                failure = Some(f);
                break;
            }
        }

        // Deferred notifications fire only once the main walk completed.
        if failure.is_none() {
            let mut index = 0;
            while let Some((target, verb)) = run.dispatcher.get(index) {
                index += 1;
                let Some(resource) = set.get(&target) else {
                    // Unreachable after pre-flight validation.
                    continue;
                };
                debug!("flushing delayed notification: {verb} {target}");
                if let Err(f) = self.converge(set, resource, verb, &mut run) {
                    warn!("run aborted during notification flush: {f}");
                    failure = Some(f);
                    break;
                }
            }
        }

        Ok(ConvergenceReport {
            action,
            outcomes: run.outcomes,
            failure,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn converge(
        &self,
        set: &ResourceSet,
        resource: &Resource,
        verb: ActionVerb,
        run: &mut RunState,
    ) -> Result<(), RunFailure> {
        run.dispatching.push(resource.id.clone());
        let result = self.converge_inner(set, resource, verb, run);
        run.dispatching.pop();
        result
    }

    fn converge_inner(
        &self,
        set: &ResourceSet,
        resource: &Resource,
        verb: ActionVerb,
        run: &mut RunState,
    ) -> Result<(), RunFailure> {
        if let Some(guard) = &resource.guard {
            match self.eval_guard(guard) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("{}: guard false, skipping", resource.id);
                    run.record(&resource.id, verb, Outcome::Skipped);
                    return Ok(());
                }
                Err(e) => {
                    run.record(&resource.id, verb, Outcome::Failed);
                    return Err(RunFailure::Guard {
                        id: resource.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        match self.diverged(resource, verb) {
            Ok(false) => {
                debug!("{}: up to date", resource.id);
                run.record(&resource.id, verb, Outcome::Noop);
                Ok(())
            }
            Ok(true) => match self.apply(resource, verb) {
                Ok(()) => {
                    debug!("{}: {verb} applied", resource.id);
                    run.record(&resource.id, verb, Outcome::Applied);
                    self.fire_notifications(set, resource, run)
                }
                Err(e) => {
                    run.record(&resource.id, verb, Outcome::Failed);
                    Err(RunFailure::Apply {
                        id: resource.id.clone(),
                        message: e.to_string(),
                    })
                }
            },
            Err(e) => {
                run.record(&resource.id, verb, Outcome::Failed);
                Err(RunFailure::Apply {
                    id: resource.id.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn fire_notifications(
        &self,
        set: &ResourceSet,
        resource: &Resource,
        run: &mut RunState,
    ) -> Result<(), RunFailure> {
        for n in &resource.notifies {
            match n.timing {
                Timing::Delayed => {
                    if run.dispatcher.register(n.target.clone(), n.verb) {
                        debug!("queued delayed notification: {} {}", n.verb, n.target);
                    }
                }
                Timing::Immediate => {
                    if run.dispatching.contains(&n.target) {
                        return Err(RunFailure::Cycle {
                            id: n.target.clone(),
                        });
                    }
                    let Some(target) = set.get(&n.target) else {
                        // Unreachable after pre-flight validation.
                        continue;
                    };
                    debug!("immediate notification: {} {}", n.verb, n.target);
                    self.converge(set, target, n.verb, run)?;
                }
            }
        }
        Ok(())
    }

    fn eval_guard(&self, guard: &Guard) -> Result<bool, CoreError> {
        match guard {
            Guard::NonDefaultInstance { instance } => Ok(instance != DEFAULT_INSTANCE),
            Guard::PathPresent(path) => Ok(self.host.fs.path_exists(path)?),
            Guard::PathAbsent(path) => Ok(!self.host.fs.path_exists(path)?),
        }
    }

    fn render_module(&self, name: &str) -> Result<Vec<u8>, CoreError> {
        let mut vars = BTreeMap::new();
        vars.insert("module".to_owned(), Value::String(name.to_owned()));
        Ok(self.host.templates.render("module.load", &vars)?)
    }

    /// Compare desired against observed state for the given verb.
    fn diverged(&self, resource: &Resource, verb: ActionVerb) -> Result<bool, CoreError> {
        let fs = &*self.host.fs;
        match (&resource.state, verb) {
            (DesiredState::Package { name, .. }, ActionVerb::Create) => {
                Ok(!self.host.packages.is_installed(name)?)
            }
            (
                DesiredState::Directory {
                    path,
                    owner,
                    group,
                    mode,
                    ..
                },
                ActionVerb::Create,
            ) => Ok(match fs.stat_directory(path)? {
                Some(observed) => {
                    observed.owner != *owner || observed.group != *group || observed.mode != *mode
                }
                None => true,
            }),
            (DesiredState::Directory { path, .. }, ActionVerb::Delete) => {
                Ok(fs.stat_directory(path)?.is_some())
            }
            (DesiredState::Directory { path, .. }, ActionVerb::Purge) => {
                Ok(!fs.list_directory(path)?.is_empty())
            }
            (DesiredState::Symlink { path, target }, ActionVerb::Create) => {
                Ok(fs.stat_symlink(path)?.as_deref() != Some(target.as_path()))
            }
            (DesiredState::Symlink { path, .. }, ActionVerb::Delete) => {
                Ok(fs.stat_symlink(path)?.is_some())
            }
            (
                DesiredState::Template {
                    path,
                    template_id,
                    owner,
                    group,
                    mode,
                    variables,
                },
                ActionVerb::Create,
            ) => {
                let desired = self.host.templates.render(template_id, variables)?;
                Ok(match fs.stat_file(path)? {
                    Some(observed) => {
                        observed.content != desired
                            || observed.owner != *owner
                            || observed.group != *group
                            || observed.mode != *mode
                    }
                    None => true,
                })
            }
            (DesiredState::Module { name, load_file }, ActionVerb::Create) => {
                let desired = self.render_module(name)?;
                Ok(match fs.stat_file(load_file)? {
                    Some(observed) => observed.content != desired,
                    None => true,
                })
            }
            (DesiredState::Service { name }, ActionVerb::Create) => {
                Ok(!self.host.services.is_running(name)?)
            }
            (DesiredState::Service { name }, ActionVerb::Delete) => {
                Ok(self.host.services.is_running(name)?)
            }
            // Action verbs on services are imperative: a notified reload or
            // restart always runs.
            (DesiredState::Service { .. }, ActionVerb::Reload | ActionVerb::Restart) => Ok(true),
            _ => Err(CoreError::UnsupportedAction {
                id: resource.id.clone(),
                verb,
            }),
        }
    }

    fn apply(&self, resource: &Resource, verb: ActionVerb) -> Result<(), CoreError> {
        let fs = &*self.host.fs;
        match (&resource.state, verb) {
            (DesiredState::Package { name, version }, ActionVerb::Create) => {
                self.host.packages.install(name, version.as_deref())?;
            }
            (
                DesiredState::Directory {
                    path,
                    owner,
                    group,
                    mode,
                    ..
                },
                ActionVerb::Create,
            ) => fs.create_directory(path, owner, group, *mode)?,
            (DesiredState::Directory { path, .. }, ActionVerb::Delete) => {
                fs.remove_recursive(path)?;
            }
            (DesiredState::Directory { path, .. }, ActionVerb::Purge) => {
                fs.purge_directory(path)?;
            }
            (DesiredState::Symlink { path, target }, ActionVerb::Create) => {
                fs.create_symlink(path, target)?;
            }
            (DesiredState::Symlink { path, .. }, ActionVerb::Delete) => fs.remove_symlink(path)?,
            (
                DesiredState::Template {
                    path,
                    template_id,
                    owner,
                    group,
                    mode,
                    variables,
                },
                ActionVerb::Create,
            ) => {
                let content = self.host.templates.render(template_id, variables)?;
                debug!(
                    "rendered {template_id}: {} bytes, digest {}",
                    content.len(),
                    &blake3::hash(&content).to_hex()[..12]
                );
                fs.write_file(path, &content, owner, group, *mode)?;
            }
            (DesiredState::Module { name, load_file }, ActionVerb::Create) => {
                let content = self.render_module(name)?;
                fs.write_file(load_file, &content, "root", "root", 0o644)?;
            }
            (DesiredState::Service { name }, ActionVerb::Reload) => {
                self.host.services.reload(name)?;
            }
            (DesiredState::Service { name }, ActionVerb::Restart) => {
                self.host.services.restart(name)?;
            }
            (DesiredState::Service { name }, ActionVerb::Create) => {
                self.host.services.create_service(name)?;
            }
            (DesiredState::Service { name }, ActionVerb::Delete) => {
                self.host.services.delete_service(name)?;
            }
            _ => {
                return Err(CoreError::UnsupportedAction {
                    id: resource.id.clone(),
                    verb,
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use stratum_host::MockHost;
    use stratum_plan::Notification;

    fn svc(name: &str) -> Resource {
        Resource::new(
            ResourceId::new("service", name),
            DesiredState::Service {
                name: name.to_owned(),
            },
            ActionVerb::Create,
        )
        .passive()
    }

    fn dir(path: &str) -> Resource {
        Resource::new(
            ResourceId::new("directory", path),
            DesiredState::Directory {
                path: PathBuf::from(path),
                owner: "root".to_owned(),
                group: "root".to_owned(),
                mode: 0o755,
                recursive: true,
            },
            ActionVerb::Create,
        )
    }

    #[test]
    fn dangling_notification_is_fatal_before_any_outcome() {
        let mock = MockHost::new();
        let host = mock.host();
        let set = ResourceSet::new(vec![dir("/etc/httpd").notifying(
            ResourceId::new("service", "ghost"),
            ActionVerb::Reload,
            Timing::Delayed,
        )]);

        let err = Executor::new(&host)
            .run(&set, Action::Create)
            .unwrap_err();
        assert!(matches!(err, CoreError::DanglingNotification { .. }));
        assert!(!mock.has_path("/etc/httpd"));
    }

    #[test]
    fn immediate_cycle_detected() {
        let mock = MockHost::new();
        let host = mock.host();
        let a_id = ResourceId::new("directory", "/a");
        let b_id = ResourceId::new("directory", "/b");
        let mut a = dir("/a");
        a.notifies.push(Notification {
            target: b_id.clone(),
            verb: ActionVerb::Create,
            timing: Timing::Immediate,
        });
        let mut b = dir("/b");
        b.notifies.push(Notification {
            target: a_id.clone(),
            verb: ActionVerb::Create,
            timing: Timing::Immediate,
        });

        let report = Executor::new(&host)
            .run(&ResourceSet::new(vec![a, b]), Action::Create)
            .unwrap();
        assert_eq!(report.failure, Some(RunFailure::Cycle { id: a_id }));
    }

    #[test]
    fn guard_error_aborts_with_guard_failure() {
        let mock = MockHost::new();
        let host = mock.host();
        mock.fail_on_path("/probe");
        let set = ResourceSet::new(vec![
            dir("/a"),
            dir("/b").with_guard(Guard::PathPresent(PathBuf::from("/probe"))),
            dir("/c"),
        ]);

        let report = Executor::new(&host).run(&set, Action::Create).unwrap();
        assert!(matches!(report.failure, Some(RunFailure::Guard { .. })));
        assert_eq!(
            report.outcome_of(&ResourceId::new("directory", "/a")),
            Some(Outcome::Applied)
        );
        // The walk never reached /c.
        assert_eq!(report.outcome_of(&ResourceId::new("directory", "/c")), None);
    }

    #[test]
    fn notified_service_actions_always_apply() {
        let mock = MockHost::new();
        let host = mock.host();
        let svc_id = ResourceId::new("service", "httpd");
        let set = ResourceSet::new(vec![
            dir("/etc/httpd").notifying(svc_id.clone(), ActionVerb::Reload, Timing::Delayed),
            svc("httpd"),
        ]);

        let report = Executor::new(&host).run(&set, Action::Create).unwrap();
        assert!(report.success());
        assert_eq!(mock.service_calls(), vec!["reload httpd"]);
        assert_eq!(report.outcome_of(&svc_id), Some(Outcome::Applied));
    }

    #[test]
    fn noop_resources_fire_nothing() {
        let mock = MockHost::new();
        let host = mock.host();
        let svc_id = ResourceId::new("service", "httpd");
        let set = ResourceSet::new(vec![
            dir("/etc/httpd").notifying(svc_id, ActionVerb::Reload, Timing::Delayed),
            svc("httpd"),
        ]);

        let executor = Executor::new(&host);
        executor.run(&set, Action::Create).unwrap();
        let second = executor.run(&set, Action::Create).unwrap();

        assert_eq!(
            second.outcome_of(&ResourceId::new("directory", "/etc/httpd")),
            Some(Outcome::Noop)
        );
        // One reload from the first run, none from the second.
        assert_eq!(mock.service_calls(), vec!["reload httpd"]);
    }
}
