//! Background loop that fires due phone check-ins.
//!
//! One pass runs immediately on start, then one every interval. Each due
//! check-in gets a single call attempt and is deleted afterwards whatever the
//! outcome. The next pass is always scheduled, even when a pass fails.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::check_in::{build_task_description, CheckInCaller};
use crate::database::TodoDatabase;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub due: usize,
    pub called: usize,
    pub failed: usize,
    pub deleted: usize,
}

pub struct CheckInScheduler {
    db: Arc<TodoDatabase>,
    caller: Arc<dyn CheckInCaller>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl CheckInScheduler {
    pub fn new(db: Arc<TodoDatabase>, caller: Arc<dyn CheckInCaller>, interval: Duration) -> Self {
        Self {
            db,
            caller,
            interval,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the polling loop. Returns false if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tracing::info!(
                "Check-in scheduler started (interval {}s)",
                scheduler.interval.as_secs()
            );
            loop {
                scheduler.run_pass(Utc::now()).await;

                tokio::select! {
                    _ = tokio::time::sleep(scheduler.interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::info!("Check-in scheduler stopped");
        });

        *worker = Some(Worker { handle, shutdown });
        true
    }

    /// Signal the loop to stop and wait for the current pass to finish.
    pub async fn stop(&self) {
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            tracing::error!("Check-in scheduler task ended abnormally: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        match self.worker.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|w| !w.handle.is_finished()),
            Err(_) => false,
        }
    }

    /// Fire everything due at or before `now`, one call at a time.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();

        let due = match self.db.due_check_ins(now) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Failed to query due check-ins: {:#}", e);
                return report;
            }
        };
        report.due = due.len();

        for check_in in due {
            match check_in.phone_number.as_deref() {
                Some(phone_number) => {
                    let task = build_task_description(&check_in);
                    match self.caller.place_call(phone_number, &task).await {
                        Ok(()) => {
                            report.called += 1;
                            tracing::info!("Placed check-in call {}", check_in.id);
                        }
                        Err(e) => {
                            report.failed += 1;
                            tracing::error!("Failed to process check-in {}: {:#}", check_in.id, e);
                        }
                    }
                }
                None => {
                    report.failed += 1;
                    tracing::error!(
                        "Check-in {} has no phone number on file; dropping it",
                        check_in.id
                    );
                }
            }

            match self.db.delete_check_in(&check_in.id) {
                Ok(true) => report.deleted += 1,
                Ok(false) => {
                    tracing::warn!("Check-in {} was already gone", check_in.id)
                }
                Err(e) => {
                    tracing::error!("Failed to delete check-in {}: {:#}", check_in.id, e)
                }
            }
        }

        tracing::debug!(
            "Check-in pass: {} due, {} called, {} failed, {} deleted",
            report.due,
            report.called,
            report.failed,
            report.deleted
        );
        report
    }
}
