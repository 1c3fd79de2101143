//! The container state reconciler.

use crate::context::{AlertSink, NoAlerts, NoopObserver, ProgressCallback, ReconcileObserver};
use crate::error::{Error, InfrastructureError, Result, Stage};
use crate::executor::{Convergence, PassState};
use crate::planner::{DependencyLevels, build_plan, prune_candidates};
use crate::redirector;
use crate::types::{
    ContainerOutcome, DesiredApplication, ReconcileOptions, ReconcilePlan, ReconcileSummary,
};
use dockerkit::{ControlPlane, ObservedContainerState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Converges running containers onto a desired set of applications.
///
/// A pass provisions redirectors, orders the desired set by dependencies,
/// prunes undesired containers, then converges level by level. Structural
/// problems (a cycle, an unknown dependency) abort the pass before anything is
/// touched; a failing container is alerted and only blocks its dependents.
pub struct ContainerStateReconciler {
    control: Arc<dyn ControlPlane>,
    observer: Arc<dyn ReconcileObserver>,
    alerts: Arc<dyn AlertSink>,
    options: ReconcileOptions,
    in_progress: AtomicBool,
}

/// Clears the in-progress flag when the pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ContainerStateReconciler {
    pub fn new(control: Arc<dyn ControlPlane>, options: ReconcileOptions) -> Self {
        Self {
            control,
            observer: Arc::new(NoopObserver),
            alerts: Arc::new(NoAlerts),
            options,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReconcileObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn control(&self) -> &dyn ControlPlane {
        self.control.as_ref()
    }

    /// Fresh snapshot of every container.
    pub fn observe(&self) -> Result<ObservedContainerState> {
        Ok(self.control.list()?)
    }

    /// What a pass over `desired` would prune and in which order it would
    /// converge, redirectors included.
    pub fn plan(
        &self,
        observed: &ObservedContainerState,
        desired: Vec<DesiredApplication>,
    ) -> Result<ReconcilePlan> {
        let desired = redirector::provision(desired);
        build_plan(observed, &desired, self.options.prune)
    }

    /// Run one pass.
    ///
    /// `observed` should be fresh; it is the baseline every start decision is
    /// made against.
    pub fn reconcile<P: ProgressCallback>(
        &self,
        observed: &ObservedContainerState,
        desired: Vec<DesiredApplication>,
        progress: &mut P,
    ) -> Result<ReconcileSummary> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            return Err(Error::PassInProgress);
        }
        let _guard = PassGuard(&self.in_progress);

        let desired = redirector::provision(desired);
        let levels = DependencyLevels::compute(&desired)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        let mut summary = ReconcileSummary::default();
        if self.options.prune {
            self.prune(prune_candidates(observed, &desired), &mut summary, progress);
        }

        let convergence = Convergence {
            control: self.control.as_ref(),
            observer: self.observer.as_ref(),
            options: &self.options,
            observed,
        };
        let mut state = PassState::default();

        for (number, level) in levels.levels.iter().enumerate() {
            let names: Vec<String> = level.iter().map(|i| desired[*i].1.name.clone()).collect();
            progress.on_level_start(number, &names);

            for converged in convergence.converge_level(&pool, &desired, level, &mut state) {
                if let ContainerOutcome::Failed(error) = &converged.outcome {
                    self.alert(error);
                }
                if converged.built {
                    summary.built.push(converged.name.clone());
                }
                progress.on_container_complete(&converged.name, &converged.outcome);
                summary.add_outcome(&converged.name, &converged.outcome);
            }
            progress.on_level_complete();
        }

        log::info!(
            "Reconciliation finished: {} pruned, {} built, {} started, {} unchanged, {} skipped, {} failed",
            summary.pruned.len(),
            summary.built.len(),
            summary.started.len(),
            summary.unchanged.len(),
            summary.skipped.len(),
            summary.failures.len()
        );
        Ok(summary)
    }

    fn prune<P: ProgressCallback>(
        &self,
        names: Vec<String>,
        summary: &mut ReconcileSummary,
        progress: &mut P,
    ) {
        if names.is_empty() {
            return;
        }
        progress.on_prune_start(names.len());

        for name in names {
            log::info!("Pruning {name}");
            let result = self
                .control
                .stop(&name)
                .and_then(|()| self.control.remove(&name));
            match result {
                Ok(()) => summary.pruned.push(name),
                Err(e) => {
                    let error = InfrastructureError::new(&name, Stage::Prune, e);
                    log::error!("{error}");
                    self.alert(&error);
                    summary.failures.push(error);
                }
            }
        }
    }

    fn alert(&self, error: &InfrastructureError) {
        self.alerts.alerting_error(
            &format!("container {} failed to {}", error.container, error.stage),
            &error.message,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{NoProgress, ObserverDecision};
    use crate::redirector::ENTRY_REDIRECTOR;
    use crate::types::{ApplicationDefinition, FileSource, OutputContext, PostStartAction};
    use dockerkit::{Action, ContainerRecord, ContainerStatus, InMemoryControlPlane, RetryConfig};
    use std::sync::{Mutex, mpsc};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        plane: Arc<InMemoryControlPlane>,
        reconciler: ContainerStateReconciler,
        _volumes: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let volumes = TempDir::new().unwrap();
            let plane = Arc::new(InMemoryControlPlane::new());
            let options = ReconcileOptions {
                jobs: 2,
                volumes_root: volumes.path().to_path_buf(),
                start_timeout: Duration::ZERO,
                poll_interval: Duration::ZERO,
                retry: RetryConfig {
                    max_attempts: 1,
                    ..RetryConfig::default()
                },
                ..ReconcileOptions::default()
            };
            Self {
                reconciler: ContainerStateReconciler::new(plane.clone(), options),
                plane,
                _volumes: volumes,
            }
        }

        fn pass(&self, desired: Vec<DesiredApplication>) -> Result<ReconcileSummary> {
            let observed = self.reconciler.observe()?;
            self.reconciler.reconcile(&observed, desired, &mut NoProgress)
        }
    }

    fn app(definition: ApplicationDefinition) -> DesiredApplication {
        (OutputContext::new("core", "m1"), definition)
    }

    fn stack() -> Vec<DesiredApplication> {
        vec![
            app(ApplicationDefinition::new("web", "FROM nginx").depends_on("db")),
            app(ApplicationDefinition::new("db", "FROM postgres").with_volume("db", "/var/lib/postgresql")),
        ]
    }

    #[derive(Default)]
    struct CollectedAlerts(Mutex<Vec<String>>);

    impl AlertSink for CollectedAlerts {
        fn alerting_error(&self, subject: &str, _detail: &str) {
            self.0.lock().unwrap().push(subject.to_string());
        }
    }

    #[test]
    fn test_first_pass_builds_and_starts_in_order() {
        let fx = Fixture::new();
        let summary = fx.pass(stack()).unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.started, vec!["db", "web"]);
        assert_eq!(summary.built, vec!["db", "web"]);
        let runs: Vec<_> = fx
            .plane
            .actions()
            .into_iter()
            .filter(|a| matches!(a, Action::Run(_)))
            .collect();
        assert_eq!(
            runs,
            vec![Action::Run("db".to_string()), Action::Run("web".to_string())]
        );
        assert!(fx._volumes.path().join("db").is_dir());
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let fx = Fixture::new();
        fx.pass(stack()).unwrap();
        fx.plane.clear_actions();

        let summary = fx.pass(stack()).unwrap();
        assert_eq!(summary.total_changes(), 0);
        assert_eq!(summary.unchanged.len(), 2);
        assert!(fx.plane.actions().is_empty());
    }

    #[test]
    fn test_cycle_aborts_before_any_action() {
        let fx = Fixture::new();
        fx.plane.insert_container(ContainerRecord {
            name: "stale".to_string(),
            id: "1".to_string(),
            image: "old".to_string(),
            status: ContainerStatus::Running,
            ports: Vec::new(),
        });
        let desired = vec![
            app(ApplicationDefinition::new("a", "FROM x").depends_on("b")),
            app(ApplicationDefinition::new("b", "FROM x").depends_on("a")),
        ];

        assert!(matches!(fx.pass(desired), Err(Error::DependencyCycle { .. })));
        assert!(fx.plane.actions().is_empty());
    }

    #[test]
    fn test_undesired_containers_are_pruned() {
        let fx = Fixture::new();
        fx.plane.insert_container(ContainerRecord {
            name: "stale".to_string(),
            id: "1".to_string(),
            image: "old".to_string(),
            status: ContainerStatus::Running,
            ports: Vec::new(),
        });

        let summary = fx.pass(stack()).unwrap();
        assert_eq!(summary.pruned, vec!["stale"]);
        assert!(fx.plane.status("stale").unwrap().is_none());
    }

    #[test]
    fn test_changed_context_rebuilds_and_restarts_dependents() {
        let fx = Fixture::new();
        fx.pass(stack()).unwrap();

        let mut changed = stack();
        changed[1].1 = changed[1]
            .1
            .clone()
            .with_file("init.sql", FileSource::Inline(b"CREATE TABLE t ();".to_vec()));
        let summary = fx.pass(changed).unwrap();

        assert_eq!(summary.built, vec!["db"]);
        assert_eq!(summary.started, vec!["db", "web"]);
    }

    #[test]
    fn test_stopped_container_is_restarted() {
        let fx = Fixture::new();
        fx.pass(stack()).unwrap();
        fx.plane.set_status("db", ContainerStatus::Exited);

        let summary = fx.pass(stack()).unwrap();
        assert!(summary.built.is_empty());
        assert_eq!(summary.started, vec!["db", "web"]);
    }

    #[test]
    fn test_post_start_actions_run_in_order() {
        let fx = Fixture::new();
        let desired = vec![app(
            ApplicationDefinition::new("web", "FROM nginx")
                .with_post_start(PostStartAction::InjectFile {
                    path: "/etc/nginx/site.conf".to_string(),
                    content: b"listen 80;".to_vec(),
                })
                .with_post_start(PostStartAction::Exec(vec![
                    "nginx".to_string(),
                    "-s".to_string(),
                    "reload".to_string(),
                ])),
        )];

        fx.pass(desired).unwrap();
        let actions = fx.plane.actions();
        let tail = &actions[actions.len() - 2..];
        assert!(matches!(&tail[0], Action::Copy { path, .. } if path == "/etc/nginx/site.conf"));
        assert!(matches!(&tail[1], Action::Exec { command, .. } if command[0] == "nginx"));
        assert_eq!(
            fx.plane.file_content("web", "/etc/nginx/site.conf"),
            Some(b"listen 80;".to_vec())
        );
    }

    #[test]
    fn test_veto_skips_container_but_not_dependents() {
        struct VetoDb;
        impl ReconcileObserver for VetoDb {
            fn after_container_name_resolved(
                &self,
                _ctx: &OutputContext,
                name: &str,
                _existing: Option<&ContainerRecord>,
            ) -> ObserverDecision {
                if name == "db" {
                    ObserverDecision::veto("maintenance")
                } else {
                    ObserverDecision::Proceed
                }
            }
        }

        let mut fx = Fixture::new();
        fx.reconciler = fx.reconciler.with_observer(Arc::new(VetoDb));
        let summary = fx.pass(stack()).unwrap();

        assert_eq!(summary.skipped, vec![("db".to_string(), "maintenance".to_string())]);
        assert_eq!(summary.started, vec!["web"]);
        // The image is built before the name is resolved
        assert_eq!(summary.built, vec!["db", "web"]);
    }

    #[test]
    fn test_build_is_recorded_when_start_fails() {
        let fx = Fixture::new();
        fx.plane.fail_on("db");

        let summary = fx.pass(stack()).unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].stage, Stage::Start);
        assert_eq!(summary.built, vec!["db"]);
        assert!(summary.started.is_empty());
    }

    #[test]
    fn test_concurrent_pass_is_refused() {
        /// Holds the first definition it sees until released.
        struct Gate {
            entered: Mutex<mpsc::Sender<()>>,
            release: Mutex<mpsc::Receiver<()>>,
        }

        impl ReconcileObserver for Gate {
            fn after_definition_transformed(
                &self,
                _ctx: &OutputContext,
                _definition: &ApplicationDefinition,
                _fingerprint: &str,
            ) -> ObserverDecision {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
                ObserverDecision::Proceed
            }
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let mut fx = Fixture::new();
        fx.reconciler = fx.reconciler.with_observer(Arc::new(Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }));
        let desired = vec![app(ApplicationDefinition::new("web", "FROM nginx"))];

        thread::scope(|scope| {
            let first = scope.spawn(|| fx.pass(desired.clone()));
            entered_rx.recv().unwrap();

            assert!(matches!(fx.pass(desired.clone()), Err(Error::PassInProgress)));

            release_tx.send(()).unwrap();
            let summary = first.join().unwrap().unwrap();
            assert_eq!(summary.started, vec!["web"]);
        });
    }

    #[test]
    fn test_aborted_pass_releases_the_next_one() {
        let fx = Fixture::new();
        let cycle = vec![
            app(ApplicationDefinition::new("a", "FROM x").depends_on("b")),
            app(ApplicationDefinition::new("b", "FROM x").depends_on("a")),
        ];
        assert!(matches!(fx.pass(cycle), Err(Error::DependencyCycle { .. })));

        let summary = fx.pass(stack()).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.started, vec!["db", "web"]);
    }

    #[test]
    fn test_failed_dependency_skips_dependents_and_alerts() {
        let alerts = Arc::new(CollectedAlerts::default());
        let mut fx = Fixture::new();
        fx.reconciler = fx.reconciler.with_alerts(alerts.clone());
        fx.plane.fail_on("infragraph/db:latest");

        let desired = vec![
            app(ApplicationDefinition::new("db", "FROM postgres")),
            app(ApplicationDefinition::new("api", "FROM x").depends_on("db")),
            app(ApplicationDefinition::new("web", "FROM x").depends_on("api")),
            app(ApplicationDefinition::new("docs", "FROM x")),
        ];
        let summary = fx.pass(desired).unwrap();

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].stage, Stage::Build);
        let skipped: Vec<_> = summary.skipped.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(skipped, vec!["api", "web"]);
        assert_eq!(summary.started, vec!["docs"]);
        assert_eq!(
            *alerts.0.lock().unwrap(),
            vec!["container db failed to build".to_string()]
        );
    }

    #[test]
    fn test_external_endpoint_starts_entry_redirector_first() {
        let fx = Fixture::new();
        let desired = vec![app(ApplicationDefinition::new("web", "FROM nginx").with_endpoint(443, 443, true))];

        let plan = fx
            .reconciler
            .plan(&ObservedContainerState::default(), desired.clone())
            .unwrap();
        assert_eq!(plan.levels, vec![vec![ENTRY_REDIRECTOR.to_string()], vec!["web".to_string()]]);

        let summary = fx.pass(desired).unwrap();
        assert_eq!(summary.started, vec![ENTRY_REDIRECTOR, "web"]);
    }
}
