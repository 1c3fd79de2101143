//! Alert delivery

use declarative::AlertSink;
use std::sync::Mutex;

/// Sends alerts to the log
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alerting_error(&self, subject: &str, detail: &str) {
        log::error!("ALERT {subject}: {detail}");
    }
}

/// Keeps alerts in memory, for tests and end-of-command summaries.
#[derive(Debug, Default)]
pub struct CollectingAlerts {
    alerts: Mutex<Vec<(String, String)>>,
}

impl CollectingAlerts {
    /// Drain the recorded `(subject, detail)` pairs.
    pub fn take(&self) -> Vec<(String, String)> {
        match self.alerts.lock() {
            Ok(mut alerts) => std::mem::take(&mut *alerts),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AlertSink for CollectingAlerts {
    fn alerting_error(&self, subject: &str, detail: &str) {
        log::warn!("{subject}: {detail}");
        match self.alerts.lock() {
            Ok(mut alerts) => alerts.push((subject.to_string(), detail.to_string())),
            Err(poisoned) => poisoned
                .into_inner()
                .push((subject.to_string(), detail.to_string())),
        }
    }
}
