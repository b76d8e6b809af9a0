//! Run execution: expansion against each site's media library, then a
//! worker pool that claims assets, generates metadata, and writes it back.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use altsmith_common::{ClientId, FailureKind, Result, RunId, RunScope};
use altsmith_db::models::{Client, Run};
use altsmith_db::pool::{get_conn, PooledConnection};
use altsmith_db::queries::runs::RunCounter;
use altsmith_db::queries::{clients, ledger, runs, stats};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::ratelimit::{wp_key, Acquire};
use crate::wordpress::{MediaAsset, WordPressClient, WpError};

use super::SchedulerDeps;

/// How long expansion waits for a listing permit before treating the site
/// as unavailable for this run.
const LIST_PATIENCE: Duration = Duration::from_secs(120);
/// How long a worker waits for a write-back permit before requeueing the
/// job at the tail.
const PERMIT_PATIENCE: Duration = Duration::from_secs(5);
/// Pause before re-checking an empty queue that still has work in flight.
const IDLE_POLL: Duration = Duration::from_millis(200);

struct ClientRuntime {
    client: Client,
    wp: WordPressClient,
    limiter_key: String,
}

struct Job {
    client_idx: usize,
    asset: MediaAsset,
    /// Whether this job has already been counted as deferred.
    deferred: bool,
}

struct RunShared {
    queue: Mutex<VecDeque<Job>>,
    runtimes: Vec<ClientRuntime>,
    /// Process-wide job permits; held for the duration of one job so total
    /// concurrency stays bounded when runs overlap.
    permits: Arc<Semaphore>,
    /// Jobs not yet terminal; workers exit when it reaches zero.
    pending: AtomicUsize,
    /// Clients whose credentials were rejected mid-run. Their remaining
    /// jobs fail without touching the site again.
    revoked: Mutex<HashSet<ClientId>>,
    cancel: CancellationToken,
}

fn with_conn<T>(
    deps: &SchedulerDeps,
    f: impl FnOnce(&PooledConnection) -> Result<T>,
) -> Result<T> {
    let conn = get_conn(&deps.db)?;
    f(&conn)
}

pub(crate) async fn execute_run(
    deps: &SchedulerDeps,
    run: Run,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
) -> Result<()> {
    let run_id = run.id;
    with_conn(deps, |conn| runs::mark_expanding(conn, run_id))?;

    let single = matches!(run.scope, RunScope::Client(_));
    let targets = match &run.scope {
        RunScope::Client(id) => {
            let conn = get_conn(&deps.db)?;
            let client = clients::get_client(&conn, id)?;
            if !client.enabled || !client.auth_ok {
                runs::fail_run(&conn, run_id, &format!("client {id} is not processable"))?;
                return Ok(());
            }
            vec![client]
        }
        RunScope::All => {
            let conn = get_conn(&deps.db)?;
            clients::list_processable_clients(&conn)?
        }
    };

    let mut runtimes: Vec<ClientRuntime> = Vec::with_capacity(targets.len());
    let mut queue: VecDeque<Job> = VecDeque::new();

    for client in targets {
        if cancel.is_cancelled() {
            with_conn(deps, |conn| runs::complete_run(conn, run_id, Some("cancelled")))?;
            info!(run_id = %run_id, "run cancelled during expansion");
            return Ok(());
        }

        let wp = WordPressClient::new(
            &client.base_url,
            &client.username,
            &client.app_password,
            &deps.config.wordpress,
        );
        let limiter_key = wp_key(&client.base_url);

        if matches!(
            deps.wp_limits.acquire_within(&limiter_key, LIST_PATIENCE).await,
            Acquire::Deferred
        ) {
            warn!(client = %client.id, "no listing permit within patience window, skipping client");
            if single {
                with_conn(deps, |conn| {
                    runs::fail_run(conn, run_id, "site rate limit left no room to list media")
                })?;
                return Ok(());
            }
            continue;
        }

        let assets = match wp.list_media().await {
            Ok(assets) => assets,
            Err(WpError::Auth(status)) => {
                warn!(client = %client.id, %status, "credentials rejected while listing media");
                let conn = get_conn(&deps.db)?;
                clients::set_auth_ok(&conn, &client.id, false)?;
                if single {
                    runs::fail_run(
                        &conn,
                        run_id,
                        &format!("wordpress rejected credentials for client {}", client.id),
                    )?;
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                warn!(client = %client.id, error = %e, "failed to list media");
                if single {
                    with_conn(deps, |conn| {
                        runs::fail_run(conn, run_id, &format!("failed to list media: {e}"))
                    })?;
                    return Ok(());
                }
                continue;
            }
        };

        let mut admitted = 0usize;
        let mut skipped = 0i64;
        {
            let conn = get_conn(&deps.db)?;
            let now = Utc::now();
            for asset in assets {
                let entry = ledger::get_entry(&conn, &client.id, asset.id)?;
                if ledger::eligible(entry.as_ref(), &asset.content_hash, now) {
                    queue.push_back(Job {
                        client_idx: runtimes.len(),
                        asset,
                        deferred: false,
                    });
                    admitted += 1;
                } else {
                    skipped += 1;
                }
            }
            if skipped > 0 {
                runs::bump_counter(&conn, run_id, RunCounter::Skipped, skipped)?;
                stats::record_skipped(&conn, &client.id, skipped)?;
            }
        }
        debug!(client = %client.id, admitted, skipped, "client expanded");
        runtimes.push(ClientRuntime {
            client,
            wp,
            limiter_key,
        });
    }

    let total = queue.len();
    with_conn(deps, |conn| runs::mark_running(conn, run_id, total as i64))?;

    if total == 0 {
        with_conn(deps, |conn| runs::complete_run(conn, run_id, None))?;
        info!(run_id = %run_id, "run complete, nothing eligible");
        return Ok(());
    }

    let shared = Arc::new(RunShared {
        queue: Mutex::new(queue),
        runtimes,
        permits,
        pending: AtomicUsize::new(total),
        revoked: Mutex::new(HashSet::new()),
        cancel: cancel.clone(),
    });

    let worker_count = deps.config.scheduler.workers.clamp(1, total);
    let mut handles = Vec::with_capacity(worker_count);
    for n in 0..worker_count {
        let deps = deps.clone();
        let shared = shared.clone();
        handles.push(tokio::spawn(worker_loop(deps, shared, run_id, n)));
    }
    for handle in handles {
        let _ = handle.await;
    }

    let conn = get_conn(&deps.db)?;
    if cancel.is_cancelled() {
        runs::complete_run(&conn, run_id, Some("cancelled"))?;
        info!(run_id = %run_id, "run cancelled");
    } else {
        runs::complete_run(&conn, run_id, None)?;
        let finished = runs::get_run(&conn, run_id)?;
        info!(
            run_id = %run_id,
            processed = finished.processed,
            skipped = finished.skipped,
            failed = finished.failed,
            "run complete"
        );
    }
    Ok(())
}

async fn worker_loop(deps: SchedulerDeps, shared: Arc<RunShared>, run_id: RunId, worker: usize) {
    debug!(run_id = %run_id, worker, "worker started");
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let job = shared.queue.lock().pop_front();
        let Some(job) = job else {
            if shared.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            // Another worker still holds a job that may come back deferred.
            tokio::select! {
                _ = sleep(IDLE_POLL) => {}
                _ = shared.cancel.cancelled() => break,
            }
            continue;
        };

        // Jobs from every active run compete for the same permit pool.
        let _permit = tokio::select! {
            permit = shared.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shared.cancel.cancelled() => break,
        };
        process_job(&deps, &shared, run_id, job).await;
    }
    debug!(run_id = %run_id, worker, "worker stopped");
}

async fn process_job(deps: &SchedulerDeps, shared: &RunShared, run_id: RunId, mut job: Job) {
    let rt = &shared.runtimes[job.client_idx];
    let client_id = &rt.client.id;
    let asset_id = job.asset.id;

    if shared.revoked.lock().contains(client_id) {
        finish_failed(deps, shared, run_id, &job, FailureKind::Auth);
        return;
    }

    let claimed = match with_conn(deps, |conn| {
        ledger::claim(conn, client_id, asset_id, &job.asset.content_hash)
    }) {
        Ok(claimed) => claimed,
        Err(e) => {
            warn!(run_id = %run_id, client = %client_id, asset = %asset_id, error = %e, "claim failed");
            finish_failed(deps, shared, run_id, &job, FailureKind::Transient);
            return;
        }
    };

    if !claimed {
        // Another run holds the claim, or the asset settled since expansion.
        debug!(run_id = %run_id, client = %client_id, asset = %asset_id, "claim lost, skipping");
        let _ = with_conn(deps, |conn| {
            runs::bump_counter(conn, run_id, RunCounter::Skipped, 1)?;
            stats::record_skipped(conn, client_id, 1)
        });
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    match deps
        .wp_limits
        .acquire_within(&rt.limiter_key, PERMIT_PATIENCE)
        .await
    {
        Acquire::Acquired => {}
        Acquire::Deferred => {
            let _ = with_conn(deps, |conn| ledger::release(conn, client_id, asset_id));
            if !job.deferred {
                job.deferred = true;
                let _ = with_conn(deps, |conn| {
                    runs::bump_counter(conn, run_id, RunCounter::Deferred, 1)
                });
            }
            debug!(run_id = %run_id, client = %client_id, asset = %asset_id, "no write-back permit, requeued");
            shared.queue.lock().push_back(job);
            sleep(IDLE_POLL).await;
            return;
        }
    }

    let started = Instant::now();
    let retries = deps.config.scheduler.job_retries.max(1);
    let mut outcome = attempt_job(deps, rt, &job.asset).await;
    let mut attempt = 1u32;
    while attempt < retries {
        match &outcome {
            Err(e) if e.kind == FailureKind::Transient && !shared.cancel.is_cancelled() => {
                let delay = in_run_backoff(&deps.config.scheduler, attempt);
                debug!(
                    run_id = %run_id,
                    client = %client_id,
                    asset = %asset_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shared.cancel.cancelled() => break,
                }
                outcome = attempt_job(deps, rt, &job.asset).await;
                attempt += 1;
            }
            _ => break,
        }
    }

    if shared.cancel.is_cancelled() && outcome.is_err() {
        // Leave the asset unclaimed so the next run picks it up.
        let _ = with_conn(deps, |conn| ledger::release(conn, client_id, asset_id));
        return;
    }

    match outcome {
        Ok(provider) => {
            let latency = started.elapsed().as_millis() as i64;
            let recorded = with_conn(deps, |conn| {
                ledger::record_success(conn, client_id, asset_id, &job.asset.content_hash, &provider)?;
                runs::bump_counter(conn, run_id, RunCounter::Processed, 1)?;
                stats::record_processed(conn, client_id, latency)
            });
            if let Err(e) = recorded {
                warn!(run_id = %run_id, client = %client_id, asset = %asset_id, error = %e, "failed to record success");
            }
            info!(
                run_id = %run_id,
                client = %client_id,
                asset = %asset_id,
                provider = %provider,
                latency_ms = latency,
                "metadata written"
            );
            shared.pending.fetch_sub(1, Ordering::SeqCst);
        }
        Err(err) => {
            if err.kind == FailureKind::Auth {
                warn!(client = %client_id, "credentials rejected, halting the client's remaining jobs");
                shared.revoked.lock().insert(client_id.clone());
                let _ = with_conn(deps, |conn| clients::set_auth_ok(conn, client_id, false));
            }
            warn!(
                run_id = %run_id,
                client = %client_id,
                asset = %asset_id,
                kind = %err.kind,
                error = %err.message,
                "job failed"
            );
            finish_failed(deps, shared, run_id, &job, err.kind);
        }
    }
}

fn finish_failed(
    deps: &SchedulerDeps,
    shared: &RunShared,
    run_id: RunId,
    job: &Job,
    kind: FailureKind,
) {
    let rt = &shared.runtimes[job.client_idx];
    let _ = with_conn(deps, |conn| {
        runs::bump_counter(conn, run_id, RunCounter::Failed, 1)?;
        stats::record_failed(conn, &rt.client.id)
    });
    // Jobs failed before claiming (revoked client) may have no ledger row.
    let _ = with_conn(deps, |conn| {
        ledger::record_failure(conn, &rt.client.id, job.asset.id, &job.asset.content_hash, kind)
    });
    shared.pending.fetch_sub(1, Ordering::SeqCst);
}

struct JobError {
    kind: FailureKind,
    message: String,
}

/// One end-to-end attempt: gather context, generate, write back.
async fn attempt_job(
    deps: &SchedulerDeps,
    rt: &ClientRuntime,
    asset: &MediaAsset,
) -> std::result::Result<String, JobError> {
    let context = rt.wp.fetch_context(asset).await;

    let language = if rt.client.language.is_empty() {
        deps.config.providers.language.as_str()
    } else {
        rt.client.language.as_str()
    };
    let order = rt.client.provider_order.as_deref();

    let generated = deps
        .router
        .generate(&context, language, order)
        .await
        .map_err(|e| JobError {
            kind: e.failure_kind(),
            message: e.to_string(),
        })?;

    rt.wp
        .update_metadata(asset, &generated.metadata)
        .await
        .map_err(|e| JobError {
            kind: e.failure_kind(),
            message: e.to_string(),
        })?;

    Ok(generated.provider)
}

fn in_run_backoff(config: &SchedulerConfig, attempt: u32) -> Duration {
    let base = config.retry_base_ms.max(1);
    let cap = config.retry_cap_ms.max(base);
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base.saturating_mul(1u64 << exp).min(cap))
}
