//! Upload manager: owns all transfers and drives them to a terminal state.
//!
//! Per transfer: Pending → InFlight → {Done | PermanentFailure | WaitingBackoff},
//! and WaitingBackoff → Pending once the backoff delay has passed. A dispatcher
//! task hands eligible transfers to attempt tasks under the admission
//! controller, so at most `capacity` transfers are in flight at any instant.
//! Backoff waits are timers, never parked workers.

mod dispatch;
mod error;
mod report;
mod table;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::admission::{AdmissionController, DEFAULT_CAPACITY};
use crate::config::XferConfig;
use crate::control::CancelToken;
use crate::descriptor::{PayloadRef, TransferId};
use crate::endpoint::UploadEndpoint;
use crate::executor::TransferExecutor;
use crate::retry::BackoffPolicy;

pub use error::ManagerError;
pub use report::{FailureCause, ManagerSnapshot, TransferReport, TransferResult};

use report::FailureCause as Cause;
use table::Table;

/// Tunables for a manager instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerOptions {
    /// Admission capacity (max concurrent in-flight transfers).
    pub capacity: usize,
    pub backoff: BackoffPolicy,
    /// Overall deadline measured from `start`.
    pub deadline: Option<Duration>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            backoff: BackoffPolicy::default(),
            deadline: None,
        }
    }
}

impl ManagerOptions {
    pub fn from_config(cfg: &XferConfig) -> Self {
        Self {
            capacity: cfg.max_concurrent_transfers,
            backoff: cfg.backoff_policy(),
            deadline: cfg.deadline(),
        }
    }
}

/// State shared by the manager handle, the dispatcher and attempt tasks.
struct Shared {
    table: Mutex<Table>,
    admission: AdmissionController,
    executor: TransferExecutor,
    backoff: BackoffPolicy,
    rng: Mutex<StdRng>,
    /// Wakes the dispatcher (submit, attempt finished, deadline).
    wake: Notify,
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl Shared {
    fn lock_table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline_passed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Caller-facing handle. Dropping it cancels outstanding work.
pub struct UploadManager {
    shared: Arc<Shared>,
}

impl UploadManager {
    /// Start a manager on the current tokio runtime.
    pub fn start(opts: ManagerOptions, endpoint: Arc<dyn UploadEndpoint>) -> Self {
        Self::start_with_rng(opts, endpoint, StdRng::from_entropy())
    }

    /// Like `start`, with an explicit random source for backoff jitter.
    pub fn start_with_rng(
        opts: ManagerOptions,
        endpoint: Arc<dyn UploadEndpoint>,
        mut rng: StdRng,
    ) -> Self {
        let deadline = opts.deadline.map(|d| Instant::now() + d);
        let nonce: u64 = rng.gen();
        let shared = Arc::new(Shared {
            table: Mutex::new(Table::new(nonce)),
            admission: AdmissionController::new(opts.capacity),
            executor: TransferExecutor::new(endpoint),
            backoff: opts.backoff,
            rng: Mutex::new(rng),
            wake: Notify::new(),
            cancel: CancelToken::new(),
            deadline,
        });
        tracing::debug!(
            capacity = shared.admission.capacity(),
            deadline_ms = opts.deadline.map(|d| d.as_millis() as u64),
            "upload manager started"
        );
        tokio::spawn(dispatch::run_dispatcher(Arc::clone(&shared)));
        if let Some(deadline) = deadline {
            tokio::spawn(dispatch::run_deadline_watch(Arc::clone(&shared), deadline));
        }
        Self { shared }
    }

    /// Validate `cfg` and start a manager from it.
    pub fn from_config(
        cfg: &XferConfig,
        endpoint: Arc<dyn UploadEndpoint>,
    ) -> Result<Self, ManagerError> {
        cfg.validate()
            .map_err(|e| ManagerError::InvalidConfig(e.to_string()))?;
        Ok(Self::start(ManagerOptions::from_config(cfg), endpoint))
    }

    /// Queue an upload of `payload` to `endpoint`.
    pub fn submit(&self, payload: PayloadRef, endpoint: &str) -> Result<TransferId, ManagerError> {
        let id = {
            let mut table = self.shared.lock_table();
            // Under the lock, so the `cancel_all` sweep cannot miss this entry.
            if self.shared.cancel.is_cancelled() {
                return Err(ManagerError::ShutDown);
            }
            let id = table.insert(endpoint, payload);
            if self.shared.deadline_passed(Instant::now()) {
                table.fail_idle(Cause::DeadlineExceeded, "deadline exceeded");
            }
            id
        };
        tracing::info!(%id, endpoint, "transfer submitted");
        self.shared.wake.notify_one();
        Ok(id)
    }

    /// Wait for the terminal result of one transfer.
    pub async fn wait(&self, id: TransferId) -> Result<TransferResult, ManagerError> {
        Ok(self.wait_report(id).await?.result)
    }

    /// Wait for the full terminal report of one transfer.
    pub async fn wait_report(&self, id: TransferId) -> Result<TransferReport, ManagerError> {
        let mut rx = self
            .shared
            .lock_table()
            .subscribe(id)
            .ok_or(ManagerError::UnknownTransfer(id))?;
        let report = rx
            .wait_for(|r| r.is_some())
            .await
            .map_err(|_| ManagerError::ShutDown)?
            .clone();
        report.ok_or(ManagerError::ShutDown)
    }

    /// Wait until every transfer submitted so far is terminal; reports in submit order.
    pub async fn wait_all(&self) -> Result<Vec<TransferReport>, ManagerError> {
        let ids = self.shared.lock_table().ids();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            reports.push(self.wait_report(id).await?);
        }
        Ok(reports)
    }

    /// Cancel everything: idle transfers fail immediately, in-flight attempts
    /// are aborted and reported when they return. Later submits are refused.
    pub fn cancel_all(&self) {
        self.shared.cancel.cancel();
        let failed = self
            .shared
            .lock_table()
            .fail_idle(Cause::Cancelled, "cancelled");
        tracing::info!(failed, in_flight = self.in_flight(), "cancel requested");
        self.shared.wake.notify_one();
    }

    /// Transfers whose attempt is running right now.
    pub fn in_flight(&self) -> usize {
        self.shared.lock_table().in_flight()
    }

    /// Highest in-flight count observed since start.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.lock_table().peak_in_flight()
    }

    pub fn capacity(&self) -> usize {
        self.shared.admission.capacity()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.shared.lock_table().snapshot()
    }

    /// Terminal report, if the transfer has finished.
    pub fn report(&self, id: TransferId) -> Option<TransferReport> {
        self.shared.lock_table().report(id)
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
