//! Process wiring: config, plugins, engine and collaborators

use crate::config::{InfragraphConfig, StoreBackendKind};
use crate::hooks::LogHook;
use crate::messaging::LogAlerts;
use crate::plugin::builtin::CorePlugin;
use crate::plugin::types::UnixUser;
use crate::plugin::{Plugin, PluginRegistry, load_plugins};
use crate::timers::cert_renewal::{CertificateRenewalTimer, OpensslAuthority};
use anyhow::{Context, Result};
use chrono::{Months, TimeDelta};
use declarative::{AlertSink, ContainerStateReconciler, ReconcileOptions};
use dockerkit::{ControlPlane, DockerCli, InMemoryControlPlane};
use graphstore::{
    ChangeExecutionEngine, EngineOptions, IdAllocator, IdAllocatorConfig, InMemoryStore, SqliteStore,
    StoreBackend, TypedResource,
};
use std::sync::Arc;
use std::time::Duration;

/// Everything a command needs, built once per process.
pub struct App {
    pub config: InfragraphConfig,
    pub registry: Arc<PluginRegistry>,
    pub engine: Arc<ChangeExecutionEngine>,
    pub alerts: Arc<dyn AlertSink>,
    /// Use the in-memory control plane instead of docker
    pub simulate: bool,
}

impl App {
    pub fn open(config: InfragraphConfig, simulate: bool) -> Result<Self> {
        let renewal = CertificateRenewalTimer::new(Arc::new(OpensslAuthority::default()))
            .with_renew_before(TimeDelta::days(config.timers.renew_before_days))
            .with_validity(Months::new(config.timers.validity_months));
        let core = CorePlugin::new(Duration::from_secs(config.timers.certificate_renewal_secs))
            .with_renewal_task(Arc::new(renewal));
        let registry = Arc::new(load_plugins(vec![Arc::new(core) as Arc<dyn Plugin>])?);

        let engine = match config.store.backend {
            StoreBackendKind::Memory => {
                log::warn!("Using the in-memory store; nothing will be persisted");
                build_engine(InMemoryStore::new(), &config, &registry)
            }
            StoreBackendKind::Sqlite => {
                let path = config.store.expanded_path();
                let store = SqliteStore::open(&path)
                    .with_context(|| format!("Could not open graph database {}", path.display()))?;
                build_engine(store, &config, &registry)
            }
        };

        Ok(Self {
            config,
            registry,
            engine: Arc::new(engine),
            alerts: Arc::new(LogAlerts),
            simulate,
        })
    }

    pub fn control_plane(&self) -> Result<Arc<dyn ControlPlane>> {
        if self.simulate {
            return Ok(Arc::new(InMemoryControlPlane::new()));
        }
        let docker = DockerCli::new().context("The docker CLI is not usable; try --simulate")?;
        Ok(Arc::new(docker))
    }

    pub fn reconcile_options(&self, jobs: Option<usize>) -> ReconcileOptions {
        let reconcile = &self.config.reconcile;
        ReconcileOptions {
            jobs: jobs.unwrap_or(reconcile.jobs).max(1),
            prune: reconcile.prune,
            volumes_root: reconcile.expanded_volumes_root(),
            start_timeout: reconcile.start_timeout(),
            network: reconcile.network.clone(),
            ..ReconcileOptions::default()
        }
    }

    pub fn reconciler(&self, jobs: Option<usize>) -> Result<ContainerStateReconciler> {
        Ok(
            ContainerStateReconciler::new(self.control_plane()?, self.reconcile_options(jobs))
                .with_alerts(Arc::clone(&self.alerts)),
        )
    }

    /// Allocator of `UnixUser.uid` over the configured range
    pub fn uid_allocator(&self) -> Result<IdAllocator> {
        let ids = &self.config.unix_ids;
        let mut config = IdAllocatorConfig::new(UnixUser::TYPE, "uid", ids.range_start, ids.range_end);
        config.window_size = ids.window_size;
        config.ttl = Duration::from_secs(ids.ttl_secs);

        let allocator = IdAllocator::new(self.engine.reader());
        allocator.configure(config)?;
        Ok(allocator)
    }
}

fn build_engine(
    backend: impl StoreBackend + 'static,
    config: &InfragraphConfig,
    registry: &Arc<PluginRegistry>,
) -> ChangeExecutionEngine {
    ChangeExecutionEngine::new(backend)
        .with_registry(Arc::clone(registry) as Arc<dyn graphstore::TypeRegistry>)
        .with_hook(Arc::new(LogHook))
        .with_options(EngineOptions {
            max_consecutive_failures: config.engine.max_consecutive_failures,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphstore::ChangesContext;

    fn memory_app() -> App {
        let mut config = InfragraphConfig::default();
        config.store.backend = StoreBackendKind::Memory;
        config.unix_ids.range_start = 2000;
        config.unix_ids.range_end = 2010;
        App::open(config, true).unwrap()
    }

    #[test]
    fn test_uid_allocator_skips_taken_ids() {
        let app = memory_app();
        let mut changes = ChangesContext::new();
        for (name, uid) in [("a", 2000), ("b", 2001)] {
            changes.resource_add(
                UnixUser {
                    name: name.to_string(),
                    uid,
                }
                .to_resource(),
            );
        }
        app.engine.apply(&mut changes).unwrap();

        let allocator = app.uid_allocator().unwrap();
        assert_eq!(allocator.get_next_available_id().unwrap(), 2002);
    }

    #[test]
    fn test_sqlite_store_is_created_on_open() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = InfragraphConfig::default();
        config.store.path = tmp.path().join("state/graph.db").display().to_string();
        let app = App::open(config, true).unwrap();
        assert_eq!(app.engine.reader().backend_name(), "sqlite");
        assert!(tmp.path().join("state/graph.db").exists());
    }

    #[test]
    fn test_reconcile_options_follow_config() {
        let app = memory_app();
        let options = app.reconcile_options(Some(0));
        assert_eq!(options.jobs, 1);
        assert_eq!(options.start_timeout, Duration::from_secs(30));
        assert!(app.reconciler(None).is_ok());
    }
}
