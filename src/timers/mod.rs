//! Periodic tasks
//!
//! Timers are declared by plugins ([`crate::plugin::TimerSpec`]) and run on
//! their own threads. Whatever they change goes through the engine.

pub mod cert_renewal;

use crate::plugin::TimerSpec;
use declarative::AlertSink;
use graphstore::ChangeExecutionEngine;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Granularity at which sleeping timers notice a stop request
const STOP_POLL: Duration = Duration::from_millis(200);

/// Work run by a timer.
pub trait TimerTask: Send + Sync {
    /// Run once; the returned line is logged.
    fn run(&self, engine: &ChangeExecutionEngine, alerts: &dyn AlertSink) -> anyhow::Result<String>;
}

/// Result of one timer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerReport {
    pub name: String,
    pub outcome: Result<String, String>,
    pub elapsed: Duration,
}

fn run_timer(timer: &TimerSpec, engine: &ChangeExecutionEngine, alerts: &dyn AlertSink) -> TimerReport {
    let started = Instant::now();
    let outcome = match timer.task.run(engine, alerts) {
        Ok(message) => {
            log::info!("Timer {}: {message}", timer.name);
            Ok(message)
        }
        Err(err) => {
            let detail = format!("{err:#}");
            log::error!("Timer {} failed: {detail}", timer.name);
            alerts.alerting_error(&format!("timer {} failed", timer.name), &detail);
            Err(detail)
        }
    };
    TimerReport {
        name: timer.name.clone(),
        outcome,
        elapsed: started.elapsed(),
    }
}

/// Run every timer once, in parallel. Reports keep the order of `timers`.
pub fn run_once(timers: &[TimerSpec], engine: &ChangeExecutionEngine, alerts: &dyn AlertSink) -> Vec<TimerReport> {
    timers
        .par_iter()
        .map(|timer| run_timer(timer, engine, alerts))
        .collect()
}

/// Runs each timer on its own thread until stopped.
pub struct TimerScheduler {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl TimerScheduler {
    /// Spawn one thread per timer. Each runs immediately, then every interval.
    pub fn start(
        timers: &[TimerSpec],
        engine: Arc<ChangeExecutionEngine>,
        alerts: Arc<dyn AlertSink>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(timers.len());

        for timer in timers {
            let timer = timer.clone();
            let engine = Arc::clone(&engine);
            let alerts = Arc::clone(&alerts);
            let stop = Arc::clone(&stop);

            let handle = thread::Builder::new()
                .name(format!("timer-{}", timer.name))
                .spawn(move || {
                    log::debug!("Timer {} every {:?}", timer.name, timer.interval);
                    while !stop.load(Ordering::SeqCst) {
                        run_timer(&timer, &engine, alerts.as_ref());
                        sleep_until_stopped(timer.interval, &stop);
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self { stop, handles })
    }

    /// Flag that makes every timer thread exit after its current run
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Block until every timer thread exits.
    pub fn wait(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                log::error!("A timer thread panicked");
            }
        }
    }

    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wait();
    }
}

fn sleep_until_stopped(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }
}
