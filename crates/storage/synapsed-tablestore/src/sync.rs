//! In-process synchronization over the diff protocol
//!
//! [`DiffSync`] drives two replicas through the same exchange a network
//! synchronizer would: compare content hashes, then descend table → row →
//! cell only where hashes differ, transferring just the missing or newer
//! stamps. Each request/response pair counts as one round trip.

use crate::mergeable::{MergeableChanges, MergeableHandle, MergeableStore, TablesStamp, ValuesStamp};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Counters accumulated across synchronizations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Pulls run, in either direction
    pub total_pulls: u64,
    /// Pulls that changed the receiving replica
    pub changed_pulls: u64,
    /// Request/response exchanges
    pub round_trips: u64,
    /// Tables received whole
    pub tables_received: u64,
    /// Rows received whole or in part
    pub rows_received: u64,
    /// Cell stamps received
    pub cells_received: u64,
    /// Value stamps received
    pub values_received: u64,
    /// Serialized size of every response
    pub total_bytes_received: u64,
    /// Average duration of a pull
    pub avg_pull_duration: Duration,
}

/// Runs the diff protocol between mergeable stores in the same process
#[derive(Debug, Default)]
pub struct DiffSync {
    statistics: SyncStatistics,
}

impl DiffSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statistics(&self) -> &SyncStatistics {
        &self.statistics
    }

    /// Bring `local` up to date with `remote`. Returns whether anything
    /// was received.
    pub fn pull(&mut self, local: &mut MergeableStore, remote: &MergeableHandle) -> bool {
        let started = Instant::now();
        let received = self.pull_diffs(local, remote);
        self.record_pull(started.elapsed(), received);
        received
    }

    /// Bring `remote` up to date with `local`
    pub fn push(&mut self, local: &MergeableStore, remote: &mut MergeableStore) -> bool {
        self.pull(remote, &local.handle())
    }

    /// Pull in both directions so both replicas converge. Returns whether
    /// either one changed.
    pub fn synchronize(&mut self, a: &mut MergeableStore, b: &mut MergeableStore) -> bool {
        let a_changed = self.pull(a, &b.handle());
        let b_changed = self.pull(b, &a.handle());
        a_changed || b_changed
    }

    fn pull_diffs(&mut self, local: &mut MergeableStore, remote: &MergeableHandle) -> bool {
        let local_hashes = local.get_mergeable_content_hashes();
        let remote_hashes = self.exchange(remote.get_mergeable_content_hashes());
        if local_hashes == remote_hashes {
            trace!("replicas already in sync");
            return false;
        }
        let mut received = false;

        if local_hashes.0 != remote_hashes.0 {
            let table_diff = self.exchange(remote.get_mergeable_table_diff(&local.get_mergeable_table_hashes()));
            received |= self.apply_tables(local, table_diff.0, true);

            if !table_diff.1.is_empty() {
                let local_row_hashes = local.get_mergeable_row_hashes(&table_diff.1);
                let row_diff = self.exchange(remote.get_mergeable_row_diff(&local_row_hashes));
                received |= self.apply_tables(local, row_diff.0, false);

                if !row_diff.1.is_empty() {
                    let local_cell_hashes = local.get_mergeable_cell_hashes(&row_diff.1);
                    let cell_diff = self.exchange(remote.get_mergeable_cell_diff(&local_cell_hashes));
                    received |= self.apply_tables(local, cell_diff, false);
                }
            }
        }

        if local_hashes.1 != remote_hashes.1 {
            let value_diff = self.exchange(remote.get_mergeable_value_diff(&local.get_mergeable_value_hashes()));
            if !value_diff.value.is_empty() {
                self.statistics.values_received += value_diff.value.len() as u64;
                local.apply_mergeable_changes(MergeableChanges::new(TablesStamp::default(), value_diff));
                received = true;
            }
        }
        received
    }

    fn apply_tables(&mut self, local: &mut MergeableStore, tables: TablesStamp, whole_tables: bool) -> bool {
        if tables.value.is_empty() {
            return false;
        }
        if whole_tables {
            self.statistics.tables_received += tables.value.len() as u64;
        }
        for table in tables.value.values() {
            self.statistics.rows_received += table.value.len() as u64;
            self.statistics.cells_received += table.value.values().map(|row| row.value.len() as u64).sum::<u64>();
        }
        local.apply_mergeable_changes(MergeableChanges::new(tables, ValuesStamp::default()));
        true
    }

    /// Account for one response crossing the wire
    fn exchange<T: Serialize>(&mut self, response: T) -> T {
        self.statistics.round_trips += 1;
        let bytes = serde_json::to_vec(&response).map_or(0, |bytes| bytes.len());
        self.statistics.total_bytes_received += bytes as u64;
        response
    }

    fn record_pull(&mut self, duration: Duration, received: bool) {
        let stats = &mut self.statistics;
        stats.total_pulls += 1;
        if received {
            stats.changed_pulls += 1;
        }
        stats.avg_pull_duration = running_average(stats.avg_pull_duration, stats.total_pulls, duration);
        debug!(
            received,
            round_trips = stats.round_trips,
            duration_us = duration.as_micros() as u64,
            "pull finished"
        );
    }
}

/// Fold the `count`-th sample into an average of the previous `count - 1`
fn running_average(average: Duration, count: u64, sample: Duration) -> Duration {
    let count = u128::from(count.max(1));
    let total = average.as_nanos() * (count - 1) + sample.as_nanos();
    Duration::from_nanos(u64::try_from(total / count).unwrap_or(u64::MAX))
}
