//! Descriptor table: the single place where transfer state changes.
//!
//! Always accessed under the manager's mutex. A descriptor is moved out while
//! its attempt runs and moved back (or dropped, if terminal) when the outcome
//! is routed, so no transfer can be attempted by two workers at once.

use std::collections::BTreeMap;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::descriptor::{PayloadRef, TransferDescriptor, TransferId, TransferState};

use super::report::{FailureCause, ManagerSnapshot, TransferReport, TransferResult};

struct Entry {
    state: TransferState,
    endpoint: String,
    upload_id: String,
    /// `None` while the attempt runs and after the transfer is terminal.
    descriptor: Option<TransferDescriptor>,
    /// Attempt count as of the last checkout (used if a descriptor is lost).
    attempts: u32,
    report: watch::Sender<Option<TransferReport>>,
}

#[derive(Default)]
pub(super) struct Table {
    /// Per-manager prefix of wire upload ids, so ids from separate runs
    /// against the same endpoint never collide.
    nonce: u64,
    next_id: u64,
    entries: BTreeMap<TransferId, Entry>,
    in_flight: usize,
    peak_in_flight: usize,
}

impl Table {
    pub fn new(nonce: u64) -> Self {
        Self {
            nonce,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, endpoint: &str, payload: PayloadRef) -> TransferId {
        self.next_id += 1;
        let id = TransferId(self.next_id);
        let upload_id = format!("{:016x}-{}", self.nonce, id);
        let (report, _) = watch::channel(None);
        let descriptor =
            TransferDescriptor::new(id, endpoint, payload).with_upload_id(upload_id.clone());
        self.entries.insert(
            id,
            Entry {
                state: TransferState::Pending,
                endpoint: endpoint.to_string(),
                upload_id,
                descriptor: Some(descriptor),
                attempts: 0,
                report,
            },
        );
        id
    }

    pub fn subscribe(&self, id: TransferId) -> Option<watch::Receiver<Option<TransferReport>>> {
        self.entries.get(&id).map(|e| e.report.subscribe())
    }

    pub fn report(&self, id: TransferId) -> Option<TransferReport> {
        self.entries.get(&id).and_then(|e| e.report.borrow().clone())
    }

    pub fn ids(&self) -> Vec<TransferId> {
        self.entries.keys().copied().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    /// Promote due backoffs, then take the oldest eligible Pending descriptor
    /// and mark it InFlight.
    pub fn checkout_next(&mut self, now: Instant) -> Option<TransferDescriptor> {
        for entry in self.entries.values_mut() {
            if let Some(d) = entry.descriptor.as_mut() {
                if d.promote_if_due(now) {
                    entry.state = TransferState::Pending;
                }
            }
        }
        let entry = self
            .entries
            .values_mut()
            .find(|e| e.descriptor.as_ref().is_some_and(|d| d.is_eligible(now)))?;
        let mut d = entry.descriptor.take()?;
        d.state = TransferState::InFlight;
        d.next_eligible = None;
        entry.state = TransferState::InFlight;
        entry.attempts = d.attempt_count + 1;
        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
        Some(d)
    }

    /// Earliest instant a backed-off descriptor becomes eligible.
    pub fn next_wake(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|e| e.descriptor.as_ref())
            .filter(|d| d.state == TransferState::WaitingBackoff)
            .filter_map(|d| d.next_eligible)
            .min()
    }

    /// Return a descriptor whose attempt just ended; ends its in-flight period.
    fn check_in(&mut self, id: TransferId) -> Option<&mut Entry> {
        let entry = self.entries.get_mut(&id)?;
        if entry.state == TransferState::InFlight {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
        Some(entry)
    }

    /// Put a descriptor back to wait out its backoff.
    pub fn park(&mut self, mut d: TransferDescriptor, until: Instant) {
        d.state = TransferState::WaitingBackoff;
        d.next_eligible = Some(until);
        if let Some(entry) = self.check_in(d.id()) {
            entry.state = TransferState::WaitingBackoff;
            entry.descriptor = Some(d);
        }
    }

    /// Record a terminal result, drop the descriptor and notify waiters.
    pub fn finish(&mut self, mut d: TransferDescriptor, result: TransferResult) {
        d.state = if result.is_done() {
            TransferState::Done
        } else {
            TransferState::PermanentFailure
        };
        d.next_eligible = None;
        let report = TransferReport {
            id: d.id(),
            upload_id: d.upload_id().to_string(),
            endpoint: d.endpoint().to_string(),
            result,
            attempts: d.attempt_count(),
            bytes_sent: d.bytes_sent(),
            last_failure: d.last_failure(),
        };
        let state = d.state;
        if let Some(entry) = self.check_in(d.id()) {
            entry.state = state;
            entry.descriptor = None;
            entry.attempts = report.attempts;
            entry.report.send_replace(Some(report));
        }
    }

    /// Terminal failure for a transfer whose descriptor did not come back
    /// (its attempt task died).
    pub fn finish_lost(&mut self, id: TransferId, reason: String) {
        let Some(entry) = self.check_in(id) else {
            return;
        };
        if entry.state.is_terminal() {
            return;
        }
        entry.state = TransferState::PermanentFailure;
        entry.descriptor = None;
        let report = TransferReport {
            id,
            upload_id: entry.upload_id.clone(),
            endpoint: entry.endpoint.clone(),
            result: TransferResult::PermanentFailure {
                cause: FailureCause::Rejected,
                reason,
            },
            attempts: entry.attempts,
            bytes_sent: 0,
            last_failure: None,
        };
        entry.report.send_replace(Some(report));
    }

    /// Fail every Pending/WaitingBackoff transfer. In-flight ones are left to
    /// their attempt task. Returns how many were failed.
    pub fn fail_idle(&mut self, cause: FailureCause, reason: &str) -> usize {
        let idle: Vec<TransferDescriptor> = self
            .entries
            .values_mut()
            .filter(|e| matches!(e.state, TransferState::Pending | TransferState::WaitingBackoff))
            .filter_map(|e| e.descriptor.take())
            .collect();
        let n = idle.len();
        for d in idle {
            tracing::warn!(id = %d.id(), attempts = d.attempt_count(), "{}", reason);
            self.finish(
                d,
                TransferResult::PermanentFailure {
                    cause,
                    reason: reason.to_string(),
                },
            );
        }
        n
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let mut s = ManagerSnapshot {
            peak_in_flight: self.peak_in_flight,
            ..ManagerSnapshot::default()
        };
        for e in self.entries.values() {
            match e.state {
                TransferState::Pending => s.pending += 1,
                TransferState::InFlight => s.in_flight += 1,
                TransferState::WaitingBackoff => s.waiting_backoff += 1,
                TransferState::Done => s.done += 1,
                TransferState::PermanentFailure => s.failed += 1,
            }
        }
        s
    }
}
