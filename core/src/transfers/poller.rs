//! Manual trigger path: a ticker that runs every due transfer its
//! [`RunnerSource`] hands out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::RunOutcome;
use crate::error::{ErrorKind, VaultResult};

/// Result of running one due transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub transfer_id: Pubkey,
    pub result: VaultResult<RunOutcome>,
}

/// Something that can run its own due transfers.
#[async_trait]
pub trait DueRunner: Send + Sync {
    /// Short label for logs. Never key material.
    fn label(&self) -> String;

    async fn run_due(&self) -> VaultResult<Vec<RunReport>>;
}

/// Where the poller finds runners on each tick.
pub trait RunnerSource: Send + Sync {
    type Runner: DueRunner + ?Sized;

    fn runners(&self) -> Vec<Arc<Self::Runner>>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub runners: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// One pass over `runners`. A failing runner does not stop the others.
pub async fn poll_once<R: DueRunner + ?Sized>(runners: &[Arc<R>]) -> PollSummary {
    let mut summary = PollSummary {
        runners: runners.len(),
        ..PollSummary::default()
    };
    for runner in runners {
        let reports = match runner.run_due().await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(runner = %runner.label(), error = %e, "listing due transfers failed");
                summary.failed += 1;
                continue;
            }
        };
        for report in reports {
            match report.result {
                Ok(RunOutcome::Executed { execution_index }) => {
                    info!(transfer = %report.transfer_id, execution_index, "transfer executed");
                    summary.executed += 1;
                }
                Ok(RunOutcome::Skipped { execution_index }) => {
                    warn!(transfer = %report.transfer_id, execution_index, "insufficient balance, slot skipped");
                    summary.skipped += 1;
                }
                Ok(outcome) => {
                    debug!(transfer = %report.transfer_id, ?outcome, "nothing to do");
                }
                Err(e) if e.kind() == ErrorKind::Transient => {
                    debug!(transfer = %report.transfer_id, error = %e, "transient failure, next tick retries");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(transfer = %report.transfer_id, error = %e, "transfer run failed");
                    summary.failed += 1;
                }
            }
        }
    }
    summary
}

/// Spawns the ticker. Stops when `token` is cancelled.
pub fn spawn_poller<S>(source: Arc<S>, every: Duration, token: CancellationToken) -> JoinHandle<()>
where
    S: RunnerSource + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(every_secs = every.as_secs(), "transfer poller started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("transfer poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let runners = source.runners();
                    if runners.is_empty() {
                        continue;
                    }
                    let summary = poll_once(&runners).await;
                    if summary.executed + summary.skipped + summary.failed > 0 {
                        info!(
                            runners = summary.runners,
                            executed = summary.executed,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "poll finished"
                        );
                    }
                }
            }
        }
    })
}
