use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::collectors::MetricsSource;
use crate::exporters::{RetentionStore, TableNames};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Collecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Persisted,
    /// The source failed; persistence was not attempted.
    FetchFailed,
    PersistFailed,
}

pub struct CollectorLoop<S, R> {
    source: S,
    store: R,
    tables: TableNames,
    interval: Duration,
    state: LoopState,
}

impl<S: MetricsSource, R: RetentionStore> CollectorLoop<S, R> {
    pub fn new(source: S, store: R, tables: TableNames, interval: Duration) -> Self {
        CollectorLoop { source, store, tables, interval, state: LoopState::Idle }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs exactly one cycle, without the trailing sleep.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.state = LoopState::Collecting;
        let outcome = self.collect_and_persist().await;
        self.state = LoopState::Idle;
        debug!(state = ?self.state(), ?outcome, "Cycle finished");
        outcome
    }

    async fn collect_and_persist(&self) -> CycleOutcome {
        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => {
                info!(source = self.source.name(), "Fetched metrics");
                snapshot
            }
            Err(e) => {
                error!(source = self.source.name(), error = %e, "Error fetching metrics, skipping cycle");
                return CycleOutcome::FetchFailed;
            }
        };

        match self.store.persist(&self.tables, &snapshot).await {
            Ok(()) => CycleOutcome::Persisted,
            Err(e) => {
                error!(store = self.store.name(), host = self.tables.host(), error = %e, "Error inserting metrics");
                CycleOutcome::PersistFailed
            }
        }
    }

    /// Runs cycles back to back, sleeping `interval` after each, until
    /// `shutdown` resolves. A cycle in progress always completes. Returns the
    /// number of cycles run.
    pub async fn run_until<F>(&mut self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cycles = 0;

        loop {
            self.run_cycle().await;
            cycles += 1;

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.interval) => {}
            }
        }

        cycles
    }
}
