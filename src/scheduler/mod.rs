//! Run lifecycle: submission, background dispatch, the unattended sweep
//! timer, and crash recovery.
//!
//! Runs execute concurrently, but every job across every run draws a permit
//! from one process-wide pool sized to `scheduler.workers`, so total
//! in-flight jobs never exceed the configured capacity no matter how many
//! runs overlap. The dedup ledger serialises work on individual assets, so
//! overlapping runs never write the same attachment twice.

mod worker;

use std::sync::Arc;
use std::time::Duration;

use altsmith_common::{Error, Result, RunId, RunScope, TriggerSource};
use altsmith_db::models::Run;
use altsmith_db::pool::{get_conn, DbPool};
use altsmith_db::queries::{clients, ledger, runs};
use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::providers::ProviderRouter;
use crate::ratelimit::RateLimiterSet;

/// Terminal runs older than this are deleted during maintenance.
const RUN_RETENTION_DAYS: i32 = 90;

/// Shared dependencies threaded through run execution.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub router: Arc<ProviderRouter>,
    pub wp_limits: Arc<RateLimiterSet>,
}

/// Handle for submitting and cancelling runs. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<(Run, CancellationToken)>,
    active: Arc<DashMap<RunId, CancellationToken>>,
    deps: SchedulerDeps,
}

impl SchedulerHandle {
    /// Create a run row and queue it for execution.
    ///
    /// Single-client runs are refused up front when the client is disabled
    /// or its credentials have been rejected; re-registering the client
    /// clears both flags.
    pub async fn submit(&self, trigger: TriggerSource, scope: RunScope) -> Result<Run> {
        if let RunScope::Client(id) = &scope {
            let conn = get_conn(&self.deps.db)?;
            let client = clients::get_client(&conn, id)?;
            if !client.enabled {
                return Err(Error::invalid_input(format!("client {id} is disabled")));
            }
            if !client.auth_ok {
                return Err(Error::invalid_input(format!(
                    "credentials for client {id} were rejected; update the registration to resume"
                )));
            }
        }

        let run = {
            let conn = get_conn(&self.deps.db)?;
            runs::create_run(&conn, trigger, &scope)?
        };
        let cancel = CancellationToken::new();
        self.active.insert(run.id, cancel.clone());

        if self.tx.send((run.clone(), cancel)).await.is_err() {
            self.active.remove(&run.id);
            let conn = get_conn(&self.deps.db)?;
            runs::fail_run(&conn, run.id, "scheduler is shutting down")?;
            return Err(Error::internal("scheduler is shutting down"));
        }

        info!(run_id = %run.id, trigger = %trigger, "run queued");
        Ok(run)
    }

    /// Request cancellation of an executing run. Returns `false` when the
    /// run is not currently active.
    pub fn cancel(&self, id: RunId) -> bool {
        match self.active.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of runs currently queued or executing.
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }
}

/// Start the run dispatcher. The returned handle submits work; the join
/// handle completes once `cancel` fires and the dispatcher has told every
/// active run to stop.
pub fn spawn(
    deps: SchedulerDeps,
    cancel: CancellationToken,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<(Run, CancellationToken)>(64);
    let active: Arc<DashMap<RunId, CancellationToken>> = Arc::new(DashMap::new());
    // Process-wide job capacity, shared by every run.
    let job_permits = Arc::new(Semaphore::new(deps.config.scheduler.workers.max(1)));

    let handle = SchedulerHandle {
        tx,
        active: active.clone(),
        deps: deps.clone(),
    };

    let task = tokio::spawn(async move {
        loop {
            let (run, run_cancel) = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };

            let deps = deps.clone();
            let active = active.clone();
            let job_permits = job_permits.clone();
            tokio::spawn(async move {
                let run_id = run.id;
                if let Err(e) = worker::execute_run(&deps, run, run_cancel, job_permits).await {
                    error!(run_id = %run_id, error = %e, "run execution failed");
                    if let Ok(conn) = get_conn(&deps.db) {
                        let _ = runs::fail_run(&conn, run_id, &e.to_string());
                    }
                }
                active.remove(&run_id);
            });
        }

        // Tell anything still executing to wind down.
        for entry in active.iter() {
            entry.value().cancel();
        }
        info!("scheduler dispatcher stopped");
    });

    (handle, task)
}

/// Unattended sweep timer. Submits an all-clients run every
/// `interval_hours`; 0 disables the timer.
pub async fn run_schedule_loop(
    handle: SchedulerHandle,
    interval_hours: u64,
    cancel: CancellationToken,
) {
    if interval_hours == 0 {
        info!("scheduled sweeps disabled");
        return;
    }

    let interval = Duration::from_secs(interval_hours * 3600);
    info!(interval_hours, "scheduled sweeps enabled");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => break,
        }

        match handle.submit(TriggerSource::Scheduled, RunScope::All).await {
            Ok(run) => info!(run_id = %run.id, "scheduled sweep started"),
            Err(e) => warn!(error = %e, "failed to start scheduled sweep"),
        }

        match prune_run_history(&handle.deps.db) {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned old run history"),
            Err(e) => warn!(error = %e, "failed to prune run history"),
        }
    }
}

fn prune_run_history(db: &DbPool) -> Result<usize> {
    let conn = get_conn(db)?;
    runs::prune_old_runs(&conn, RUN_RETENTION_DAYS)
}

/// Crash recovery at startup: clear stale ledger claims, fail runs that
/// were still executing when the previous process died, and drop run
/// history past the retention window.
pub fn recover_interrupted(db: &DbPool) -> Result<()> {
    let conn = get_conn(db)?;
    let claims = ledger::reset_in_flight(&conn)?;
    let interrupted = runs::fail_interrupted_runs(&conn)?;
    let pruned = runs::prune_old_runs(&conn, RUN_RETENTION_DAYS)?;
    if claims > 0 || interrupted > 0 || pruned > 0 {
        info!(claims, interrupted, pruned, "recovered state left by previous process");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use altsmith_db::pool::init_memory_pool;

    #[test]
    fn test_recovery_prunes_old_run_history() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        let old = runs::create_run(&conn, TriggerSource::Scheduled, &RunScope::All).unwrap();
        runs::complete_run(&conn, old.id, None).unwrap();
        conn.execute(
            "UPDATE runs SET completed_at = datetime('now', '-120 days') WHERE id = ?",
            [old.id.to_string()],
        )
        .unwrap();
        let recent = runs::create_run(&conn, TriggerSource::Manual, &RunScope::All).unwrap();
        runs::complete_run(&conn, recent.id, None).unwrap();
        drop(conn);

        recover_interrupted(&pool).unwrap();

        let conn = get_conn(&pool).unwrap();
        assert!(runs::get_run(&conn, old.id).is_err());
        assert!(runs::get_run(&conn, recent.id).is_ok());
    }
}
