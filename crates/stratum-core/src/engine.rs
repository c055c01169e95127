use crate::concurrency::RunLock;
use crate::executor::{ConvergenceReport, Executor, Outcome};
use crate::CoreError;
use std::path::PathBuf;
use stratum_host::Host;
use stratum_plan::{build, Action, ResourceSet};
use stratum_profile::{resolve, HostFacts, Profile};
use tracing::{debug, info};

/// Entry point for top-level convergence actions.
///
/// One engine holds one injected host backend; each `create`/`delete` call
/// resolves a fresh profile, builds a fresh resource set, and runs exactly
/// one convergence pass over it. No state survives between calls — an
/// aborted run is recovered by re-invoking it.
pub struct Engine {
    host: Host,
    lock_dir: PathBuf,
}

impl Engine {
    pub fn new(host: Host) -> Self {
        Self {
            host,
            lock_dir: std::env::temp_dir(),
        }
    }

    /// Override where per-instance lock files live.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Converge the host toward a fully realized installation.
    pub fn create(
        &self,
        facts: &HostFacts,
        product_version: &str,
        instance: &str,
        mpm: &str,
    ) -> Result<ConvergenceReport, CoreError> {
        self.run_action(Action::Create, facts, product_version, instance, mpm)
    }

    /// Converge the host toward the installation being absent.
    pub fn delete(
        &self,
        facts: &HostFacts,
        product_version: &str,
        instance: &str,
        mpm: &str,
    ) -> Result<ConvergenceReport, CoreError> {
        self.run_action(Action::Delete, facts, product_version, instance, mpm)
    }

    /// Resolve and build without touching the host.
    pub fn plan(
        &self,
        action: Action,
        facts: &HostFacts,
        product_version: &str,
        instance: &str,
        mpm: &str,
    ) -> Result<(Profile, ResourceSet), CoreError> {
        let profile = resolve(facts, product_version, instance)?;
        let set = build(action, &profile, mpm);
        Ok((profile, set))
    }

    fn run_action(
        &self,
        action: Action,
        facts: &HostFacts,
        product_version: &str,
        instance: &str,
        mpm: &str,
    ) -> Result<ConvergenceReport, CoreError> {
        let profile = resolve(facts, product_version, instance)?;
        let set = build(action, &profile, mpm);
        info!(
            "converging {action} for {} ({} resources)",
            profile.service_name,
            set.len()
        );

        let lock_path = self
            .lock_dir
            .join(format!("stratum-{}.lock", profile.service_name));
        let _lock = RunLock::acquire(&lock_path)?;
        debug!("holding run lock {}", lock_path.display());

        let report = Executor::new(&self.host).run(&set, action)?;

        // Platform-specific service lifecycle is the supervisor's override
        // point; it only runs once the resource walk fully converged.
        if report.success() {
            match action {
                Action::Create => self.host.services.create_service(&profile.service_name)?,
                Action::Delete => self.host.services.delete_service(&profile.service_name)?,
            }
        }

        info!(
            "{action} for {}: {} applied, {} up to date, {} skipped{}",
            profile.service_name,
            report.count(Outcome::Applied),
            report.count(Outcome::Noop),
            report.count(Outcome::Skipped),
            report
                .failure
                .as_ref()
                .map(|f| format!(", aborted: {f}"))
                .unwrap_or_default()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_host::MockHost;

    fn test_engine() -> (MockHost, Engine, tempfile::TempDir) {
        let mock = MockHost::new();
        let lock_dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(mock.host()).with_lock_dir(lock_dir.path());
        (mock, engine, lock_dir)
    }

    fn el7() -> HostFacts {
        HostFacts::new("x86_64", "7.2")
    }

    #[test]
    fn create_converges_and_starts_service() {
        let (mock, engine, _lock) = test_engine();
        let report = engine.create(&el7(), "2.4.6", "default", "event").unwrap();

        assert!(report.success());
        assert!(mock.is_package_installed("httpd"));
        assert!(mock.has_path("/etc/httpd/conf/httpd.conf"));
        assert!(mock.has_path("/var/run/httpd"));
        // Supervisor hook runs after a successful walk.
        assert!(mock.service_calls().contains(&"create httpd".to_owned()));
    }

    #[test]
    fn second_create_is_all_noop() {
        let (mock, engine, _lock) = test_engine();
        engine.create(&el7(), "2.4.6", "default", "event").unwrap();
        let calls_after_first = mock.service_calls().len();

        let second = engine.create(&el7(), "2.4.6", "default", "event").unwrap();
        assert!(second.success());
        assert_eq!(second.count(Outcome::Applied), 0);
        assert_eq!(second.count(Outcome::Failed), 0);
        // No further service activity either.
        assert_eq!(mock.service_calls().len(), calls_after_first + 1); // create hook only
    }

    #[test]
    fn delete_tears_down_created_instance() {
        let (mock, engine, _lock) = test_engine();
        engine.create(&el7(), "2.4.6", "default", "event").unwrap();
        let report = engine.delete(&el7(), "2.4.6", "default", "event").unwrap();

        assert!(report.success());
        assert!(!mock.has_path("/etc/httpd"));
        assert!(!mock.has_path("/var/log/httpd"));
        assert!(!mock.has_path("/var/run/httpd"));
        assert!(mock.service_calls().contains(&"delete httpd".to_owned()));
    }

    #[test]
    fn unsupported_platform_fails_before_locking() {
        let (_mock, engine, lock) = test_engine();
        let err = engine
            .create(&HostFacts::new("x86_64", "8.0"), "2.4.6", "default", "event")
            .unwrap_err();
        assert!(matches!(err, CoreError::Resolution(_)));
        assert!(std::fs::read_dir(lock.path()).unwrap().next().is_none());
    }

    #[test]
    fn plan_does_not_touch_host() {
        let (mock, engine, _lock) = test_engine();
        let (profile, set) = engine
            .plan(Action::Create, &el7(), "2.4.6", "web1", "worker")
            .unwrap();
        assert_eq!(profile.service_name, "httpd-web1");
        assert!(!set.is_empty());
        assert!(!mock.has_path("/etc/httpd-web1"));
        assert!(mock.service_calls().is_empty());
    }
}
