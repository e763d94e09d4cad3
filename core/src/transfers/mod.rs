//! Scheduled transfers: setup, execution, skips, cancellation, the two
//! trigger paths (manual poller and automated job queue) and the execution
//! grants both of them run through.

pub mod automation;
pub mod cache;
pub mod client;
pub mod grants;
pub mod poller;
pub mod state;

pub use automation::{
    Job, JobId, JobSpec, JobStatus, JobStep, JobTarget, LocalJobQueue, Scheduler, TargetSource,
    spawn_job_queue,
};
pub use cache::{CacheStore, CachedTransfer, MemoryCacheStore, RocksCacheStore, TransferCache};
pub use client::{ExecutionReceipt, InFlight, RunOutcome, TransferClient, TransferSetup};
pub use grants::{ExecutionGrant, GrantRegistry};
pub use poller::{DueRunner, PollSummary, RunReport, RunnerSource, poll_once, spawn_poller};
pub use state::{TransferState, TransferView};
