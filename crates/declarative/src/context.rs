//! Observer, alerting and progress traits
//!
//! These traits let callers steer and watch a reconciliation pass without
//! the reconciler depending on a UI, a messaging system or a plugin host.

use crate::types::{ApplicationDefinition, ContainerOutcome, OutputContext};
use dockerkit::ContainerRecord;

/// Answer of a [`ReconcileObserver`] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverDecision {
    Proceed,
    /// Leave this container untouched for the rest of the pass
    Veto { reason: String },
}

impl ObserverDecision {
    pub fn veto(reason: impl Into<String>) -> Self {
        Self::Veto {
            reason: reason.into(),
        }
    }
}

/// Extension points called for every desired container.
///
/// Both callbacks run on worker threads.
pub trait ReconcileObserver: Send + Sync {
    /// Called once the definition is final and its fingerprint known.
    fn after_definition_transformed(
        &self,
        _ctx: &OutputContext,
        _definition: &ApplicationDefinition,
        _fingerprint: &str,
    ) -> ObserverDecision {
        ObserverDecision::Proceed
    }

    /// Called once the container name is matched against the observed state.
    fn after_container_name_resolved(
        &self,
        _ctx: &OutputContext,
        _name: &str,
        _existing: Option<&ContainerRecord>,
    ) -> ObserverDecision {
        ObserverDecision::Proceed
    }
}

/// Observer that never vetoes
pub struct NoopObserver;

impl ReconcileObserver for NoopObserver {}

/// Receiver of per-container failure alerts
pub trait AlertSink: Send + Sync {
    fn alerting_error(&self, subject: &str, detail: &str);
}

/// Alert sink that drops everything
pub struct NoAlerts;

impl AlertSink for NoAlerts {
    fn alerting_error(&self, _subject: &str, _detail: &str) {}
}

/// Progress callback for a reconciliation pass
///
/// Implement this trait to receive progress updates. Containers of one level
/// converge in parallel, so completions are reported once the level is done.
pub trait ProgressCallback: Send {
    /// Called when pruning starts
    fn on_prune_start(&mut self, count: usize);

    /// Called when starting a dependency level
    fn on_level_start(&mut self, level: usize, names: &[String]);

    /// Called for every container of the level once it is done
    fn on_container_complete(&mut self, name: &str, outcome: &ContainerOutcome);

    /// Called when a level completes
    fn on_level_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_prune_start(&mut self, _count: usize) {}
    fn on_level_start(&mut self, _level: usize, _names: &[String]) {}
    fn on_container_complete(&mut self, _name: &str, _outcome: &ContainerOutcome) {}
    fn on_level_complete(&mut self) {}
}
