//! Job registry: one ticker task per scheduled rule feeding a bounded
//! queue drained by a fixed worker pool.
//!
//! The jobs lock guards only membership and is never held across an await
//! point. Two ticks of the same rule are serialized at the ticker, not at
//! the pool: a slow evaluation can overlap the next tick, which is safe
//! because detectors are stateless and cooldown dedupes alerts.

use crate::evaluator;
use dbmon_adapter::DataSourceAdapter;
use dbmon_common::{Limits, RuleSpec};
use dbmon_storage::RuleStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

const QUEUE_CAPACITY: usize = 128;

/// One queued evaluation of a rule.
pub struct JobRun {
    pub rule_id: Uuid,
    pub spec: RuleSpec,
    pub adapter: Arc<dyn DataSourceAdapter>,
}

struct Job {
    poll_interval_seconds: i64,
    ticker: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub rule_id: Uuid,
    pub poll_interval_seconds: i64,
}

pub struct Registry {
    jobs: Mutex<HashMap<Uuid, Job>>,
    queue_tx: mpsc::Sender<JobRun>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    pub fn new(
        store: Arc<dyn RuleStore>,
        limits: Limits,
        worker_count: usize,
        job_timeout: Duration,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<JobRun>(QUEUE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let queue_rx = queue_rx.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let store = store.clone();
            let limits = limits.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let run = {
                        let mut rx = queue_rx.lock().await;
                        tokio::select! {
                            _ = shutdown_rx.changed() => None,
                            run = rx.recv() => run,
                        }
                    };
                    let Some(run) = run else {
                        break;
                    };
                    let evaluation = tokio::time::timeout(
                        job_timeout,
                        evaluator::execute_run(store.as_ref(), &limits, &run),
                    )
                    .await;
                    if evaluation.is_err() {
                        tracing::warn!(
                            worker_id,
                            rule_id = %run.rule_id,
                            "Job evaluation exceeded timeout"
                        );
                    }
                }
                tracing::debug!(worker_id, "Worker stopped");
            }));
        }

        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            queue_tx,
            shutdown_tx,
            workers: Mutex::new(workers),
        })
    }

    /// Schedule (or reschedule) a rule. Any prior job for the same rule id
    /// is cancelled first; the registry holds at most one job per rule.
    pub fn schedule(&self, rule_id: Uuid, spec: RuleSpec, adapter: Arc<dyn DataSourceAdapter>) {
        let poll_interval_seconds = spec.poll_interval_seconds.max(1);
        let queue_tx = self.queue_tx.clone();
        let ticker = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(poll_interval_seconds as u64));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Consume the immediate first tick; the first evaluation
            // happens one full interval after scheduling.
            tick.tick().await;
            loop {
                tick.tick().await;
                let run = JobRun {
                    rule_id,
                    spec: spec.clone(),
                    adapter: adapter.clone(),
                };
                if queue_tx.send(run).await.is_err() {
                    break;
                }
            }
        });

        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(previous) = jobs.insert(
            rule_id,
            Job {
                poll_interval_seconds,
                ticker,
            },
        ) {
            previous.ticker.abort();
        }
    }

    pub fn unschedule(&self, rule_id: Uuid) {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.remove(&rule_id) {
            job.ticker.abort();
            tracing::info!(rule_id = %rule_id, "Job unscheduled");
        }
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.lock().expect("jobs lock");
        let mut infos: Vec<JobInfo> = jobs
            .iter()
            .map(|(rule_id, job)| JobInfo {
                rule_id: *rule_id,
                poll_interval_seconds: job.poll_interval_seconds,
            })
            .collect();
        infos.sort_by_key(|info| info.rule_id);
        infos
    }

    pub fn contains(&self, rule_id: Uuid) -> bool {
        self.jobs.lock().expect("jobs lock").contains_key(&rule_id)
    }

    /// Stop every ticker and let workers drain out. In-flight evaluations
    /// finish on their own deadline; they are not force-killed.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut jobs = self.jobs.lock().expect("jobs lock");
        for (_, job) in jobs.drain() {
            job.ticker.abort();
        }
        drop(jobs);
        self.workers.lock().expect("workers lock").clear();
    }
}
