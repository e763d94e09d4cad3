//! Automated trigger path.
//!
//! A [`Scheduler`] owns one job per transfer. Jobs are prepaid: every run
//! costs [`JOB_RUN_COST_LAMPORTS`] and a job that cannot pay is paused until
//! funded. [`LocalJobQueue`] is the in-process scheduler used in dev mode.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::RunOutcome;
use crate::clock::SharedClock;
use crate::error::{IntegrationError, VaultResult};

pub const JOB_RUN_COST_LAMPORTS: u64 = 5_000;

/// Delay before a failed run is attempted again.
const RETRY_AFTER_SECS: i64 = 60;

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub wallet: String,
    pub transfer_id: Pubkey,
    pub first_run: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    /// Out of funds.
    Paused,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub wallet: String,
    pub transfer_id: Pubkey,
    pub run_at: i64,
    pub balance: u64,
    pub runs: u64,
    pub status: JobStatus,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn create_job(&self, spec: JobSpec) -> Result<JobId, IntegrationError>;

    async fn fund_job(&self, id: JobId, lamports: u64) -> Result<(), IntegrationError>;

    async fn close_job(&self, id: JobId) -> Result<(), IntegrationError>;
}

/// What a job run reports back: the outcome and where the transfer's
/// schedule now points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStep {
    pub outcome: RunOutcome,
    pub next_execution: i64,
}

/// Runs one transfer on behalf of a job.
#[async_trait]
pub trait JobTarget: Send + Sync {
    async fn run_transfer(&self, transfer_id: &Pubkey) -> VaultResult<JobStep>;
}

/// Resolves a job to something allowed to run its transfer. `None` when
/// nothing currently holds that authority.
pub trait TargetSource: Send + Sync {
    type Target: JobTarget + ?Sized;

    fn target(&self, wallet: &str, transfer_id: &Pubkey) -> Option<Arc<Self::Target>>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueuePass {
    pub ran: usize,
    pub paused: usize,
    pub closed: usize,
    pub waiting: usize,
}

pub struct LocalJobQueue {
    jobs: Mutex<BTreeMap<JobId, Job>>,
    next_id: AtomicU64,
    clock: SharedClock,
}

impl LocalJobQueue {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    pub async fn jobs_for(&self, wallet: &str) -> Vec<Job> {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|j| j.wallet == wallet)
            .cloned()
            .collect()
    }

    /// Runs every scheduled job whose time has come. Jobs closed before
    /// this pass are dropped first.
    ///
    /// The queue lock is not held across runs, so `close_job` and
    /// `fund_job` stay responsive while transfers execute.
    pub async fn run_ready<S>(&self, source: &S) -> QueuePass
    where
        S: TargetSource + ?Sized,
    {
        let now = self.clock.now();
        let ready: Vec<Job> = {
            let mut jobs = self.jobs.lock().await;
            jobs.retain(|_, j| j.status != JobStatus::Closed);
            jobs.values()
                .filter(|j| j.status == JobStatus::Scheduled && j.run_at <= now)
                .cloned()
                .collect()
        };

        let mut pass = QueuePass::default();
        for job in ready {
            if job.balance < JOB_RUN_COST_LAMPORTS {
                warn!(job = job.id, balance = job.balance, "job out of funds, pausing");
                self.update(job.id, |j| j.status = JobStatus::Paused).await;
                pass.paused += 1;
                continue;
            }
            let Some(target) = source.target(&job.wallet, &job.transfer_id) else {
                debug!(job = job.id, transfer = %job.transfer_id, "no execution grant for job");
                pass.waiting += 1;
                continue;
            };

            match target.run_transfer(&job.transfer_id).await {
                Ok(JobStep {
                    outcome: RunOutcome::Closed { state },
                    ..
                }) => {
                    info!(job = job.id, transfer = %job.transfer_id, ?state, "transfer closed, closing job");
                    self.update(job.id, |j| j.status = JobStatus::Closed).await;
                    pass.closed += 1;
                }
                Ok(JobStep {
                    outcome: RunOutcome::AlreadyRunning,
                    ..
                }) => {
                    pass.waiting += 1;
                }
                Ok(JobStep {
                    outcome,
                    next_execution,
                }) => {
                    let charged = matches!(
                        outcome,
                        RunOutcome::Executed { .. } | RunOutcome::Skipped { .. }
                    );
                    self.update(job.id, |j| {
                        if charged {
                            j.balance -= JOB_RUN_COST_LAMPORTS;
                            j.runs += 1;
                        }
                        j.run_at = next_execution;
                    })
                    .await;
                    debug!(job = job.id, ?outcome, next_execution, "job requeued");
                    pass.ran += 1;
                }
                Err(e) => {
                    warn!(job = job.id, transfer = %job.transfer_id, error = %e, "job run failed");
                    self.update(job.id, |j| j.run_at = now + RETRY_AFTER_SECS)
                        .await;
                    pass.waiting += 1;
                }
            }
        }
        pass
    }

    /// Applies `f` unless the job was closed meanwhile.
    async fn update(&self, id: JobId, f: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&id) {
            if job.status != JobStatus::Closed {
                f(job);
            }
        }
    }
}

#[async_trait]
impl Scheduler for LocalJobQueue {
    async fn create_job(&self, spec: JobSpec) -> Result<JobId, IntegrationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            wallet: spec.wallet,
            transfer_id: spec.transfer_id,
            run_at: spec.first_run,
            balance: 0,
            runs: 0,
            status: JobStatus::Paused,
        };
        info!(job = id, transfer = %job.transfer_id, run_at = job.run_at, "job created");
        self.jobs.lock().await.insert(id, job);
        Ok(id)
    }

    async fn fund_job(&self, id: JobId, lamports: u64) -> Result<(), IntegrationError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(IntegrationError::UnknownJob(id))?;
        if job.status == JobStatus::Closed {
            return Err(IntegrationError::SchedulerUnavailable(format!(
                "job {id} is closed"
            )));
        }
        job.balance = job.balance.saturating_add(lamports);
        if job.status == JobStatus::Paused && job.balance >= JOB_RUN_COST_LAMPORTS {
            job.status = JobStatus::Scheduled;
        }
        Ok(())
    }

    async fn close_job(&self, id: JobId) -> Result<(), IntegrationError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(IntegrationError::UnknownJob(id))?;
        job.status = JobStatus::Closed;
        Ok(())
    }
}

/// Spawns the queue runner. Stops when `token` is cancelled.
pub fn spawn_job_queue<S>(
    queue: Arc<LocalJobQueue>,
    source: Arc<S>,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()>
where
    S: TargetSource + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("job queue started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("job queue shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let pass = queue.run_ready(source.as_ref()).await;
                    if pass.ran + pass.paused + pass.closed > 0 {
                        info!(
                            ran = pass.ran,
                            paused = pass.paused,
                            closed = pass.closed,
                            waiting = pass.waiting,
                            "job queue pass"
                        );
                    }
                }
            }
        }
    })
}
