//! The Splitter: one instance per pod, periodically reconciled against a
//! shared [`PodStore`] until the fleet converges on a unique, contiguous
//! ordinal assignment.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::{CallbackError, StoreError};
use crate::store::PodStore;

/// The fixed metrics handler name for every `sync` invocation, per the
/// metrics contract consumed by this codebase.
const HANDLER: &str = "Splitter.Sync";

/// Reasons a sync cycle can fail, as distinguished for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// `ActualizePod` reported the target record vanished or was already
    /// owned by someone else.
    ActualizeConflict,
    /// Any other failure from the store.
    StorageError,
}

impl FailReason {
    fn as_label(self) -> &'static str {
        match self {
            FailReason::ActualizeConflict => "actualize_conflict",
            FailReason::StorageError => "storage_error",
        }
    }
}

/// Tunables for a [`Splitter`] instance. `delay` must be strictly less than
/// `max_unused_duration`, or a pod risks timing out its own record between
/// syncs; callers are expected to validate this at configuration load time.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Sync cadence, used only to derive the refresh window passed to
    /// `actualize_pod` during steady state; the scheduler owns the interval.
    pub delay: Duration,
    /// Staleness threshold defining active/unused.
    pub max_unused_duration: Duration,
    /// Number of `sync` cycles an unclaimed pod must endure before creating
    /// a new record.
    pub full_scan_count_threshold: u32,
    /// Store namespace.
    pub group_name: String,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(15),
            max_unused_duration: Duration::from_secs(30),
            full_scan_count_threshold: 2,
            group_name: "splitter".to_string(),
        }
    }
}

/// Local, non-persisted per-pod state. `id == 0` means Unclaimed; otherwise
/// the pod is Claimed and `num` is guaranteed to be in `[1..count]`. Fields
/// are atomics because the hosting application's workload partitioner reads
/// `num`/`count` concurrently with `sync` mutating them.
#[derive(Default)]
struct SplitterState {
    id: AtomicI64,
    num: AtomicI32,
    count: AtomicI32,
    full_scan_count: AtomicU32,
}

/// Callback fired synchronously after every successful `num` change, so the
/// hosting application can re-shard its in-memory work before `sync`
/// returns. Returning `Err` is logged but does not roll back the adoption.
pub type AdoptionCallback = Box<dyn Fn(i32, i32) -> Result<(), CallbackError> + Send + Sync>;

/// One reusable coordinator instance, owned by a single pod process.
pub struct Splitter<S: PodStore> {
    store: Arc<S>,
    config: SplitterConfig,
    state: SplitterState,
    callback: Option<AdoptionCallback>,
}

impl<S: PodStore> Splitter<S> {
    pub fn new(store: Arc<S>, config: SplitterConfig) -> Self {
        Self {
            store,
            config,
            state: SplitterState::default(),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: AdoptionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Current ordinal, `0` when unclaimed. Safe to call concurrently with
    /// `sync`.
    pub fn num(&self) -> i32 {
        self.state.num.load(Ordering::Relaxed)
    }

    /// Last-observed fleet size, `0` when unclaimed. Safe to call
    /// concurrently with `sync`.
    pub fn count(&self) -> i32 {
        self.state.count.load(Ordering::Relaxed)
    }

    /// Run one reconciliation cycle. Never fails: every error is absorbed
    /// into a state transition and surfaced via metrics/logs. Emits at most
    /// one store-mutating call.
    pub async fn sync(&self) {
        let start = Instant::now();
        self.reconcile().await;
        let elapsed = start.elapsed().as_secs_f64();
        metrics::histogram!("splitter_sync_duration_seconds", "handler" => HANDLER)
            .record(elapsed);
    }

    async fn reconcile(&self) {
        let group = self.config.group_name.clone();

        let active_count = match self
            .store
            .get_active_pod_count(&group, self.config.max_unused_duration)
            .await
        {
            Ok(count) => count as i32,
            Err(error) => {
                self.record_fail(FailReason::StorageError, &error);
                self.reset();
                return;
            }
        };

        let count = self.state.count.load(Ordering::Relaxed);
        let num = self.state.num.load(Ordering::Relaxed);

        if count > 0 && active_count == count && num <= active_count {
            // Steady state: nothing changed, just keep our record fresh.
            self.refresh_self(None).await;
        } else if active_count < count || active_count < num {
            self.shrink(active_count, num).await;
        } else if active_count > count || active_count == 0 {
            self.grow_or_claim(active_count, num).await;
        }
    }

    async fn shrink(&self, active_count: i32, num: i32) {
        if num != 0 && num <= active_count {
            self.refresh_self(Some(active_count)).await;
            return;
        }

        match self.try_capture(active_count).await {
            CaptureOutcome::Adopted | CaptureOutcome::AlreadyReset => {}
            CaptureOutcome::NoCandidate | CaptureOutcome::Failed => self.reset(),
        }
    }

    async fn grow_or_claim(&self, active_count: i32, num: i32) {
        if num != 0 && num <= active_count {
            self.refresh_self(Some(active_count)).await;
            return;
        }

        let target_count = active_count + 1;
        match self.try_capture(target_count).await {
            CaptureOutcome::Adopted => return,
            CaptureOutcome::NoCandidate | CaptureOutcome::Failed | CaptureOutcome::AlreadyReset => {}
        }

        if self.state.full_scan_count.load(Ordering::Relaxed) >= self.config.full_scan_count_threshold
        {
            self.try_create(active_count + 1).await;
        } else {
            self.state.full_scan_count.fetch_add(1, Ordering::Relaxed);
            info!(group = %self.config.group_name, "splitter full-scan: waiting out hysteresis before creating a new record");
        }
    }

    /// Refresh our own record's `updated_at`. On success, update local
    /// `count` if `new_count` is given (shrink/grow keep `num` unchanged).
    /// On failure, reset.
    async fn refresh_self(&self, new_count: Option<i32>) {
        let id = self.state.id.load(Ordering::Relaxed);

        match self
            .store
            .actualize_pod(id, 0, self.config.delay / 2)
            .await
        {
            Ok(_) => {
                if let Some(new_count) = new_count {
                    self.state.count.store(new_count, Ordering::Relaxed);
                    info!(
                        group = %self.config.group_name,
                        id, num = self.state.num.load(Ordering::Relaxed), count = new_count,
                        "splitter refreshed ordinal, fleet size updated"
                    );
                }
            }
            Err(error) => {
                self.record_fail_for(&error);
                self.reset();
            }
        }
    }

    /// Attempt to capture the lowest-numbered unused record, adopting
    /// `target_count` as our local `count` on success.
    async fn try_capture(&self, target_count: i32) -> CaptureOutcome {
        let unused = match self
            .store
            .get_first_unused_pod(&self.config.group_name, self.config.max_unused_duration)
            .await
        {
            Ok(record) => record,
            Err(StoreError::NoEntries) => return CaptureOutcome::NoCandidate,
            Err(error @ StoreError::Storage(_)) => {
                self.record_fail(FailReason::StorageError, &error);
                self.reset();
                return CaptureOutcome::AlreadyReset;
            }
        };

        let own_id = self.state.id.load(Ordering::Relaxed);
        match self
            .store
            .actualize_pod(unused.id, own_id, self.config.max_unused_duration)
            .await
        {
            Ok(_) => {
                self.adopt(unused.id, unused.num, target_count);
                match self.invoke_callback(unused.num, target_count) {
                    Ok(()) => CaptureOutcome::Adopted,
                    // The adoption already committed via the store CAS; a
                    // callback failure must not roll it back locally.
                    Err(_) => CaptureOutcome::Adopted,
                }
            }
            Err(error @ StoreError::NoEntries) => {
                self.record_fail(FailReason::ActualizeConflict, &error);
                CaptureOutcome::Failed
            }
            Err(error @ StoreError::Storage(_)) => {
                self.record_fail(FailReason::StorageError, &error);
                CaptureOutcome::Failed
            }
        }
    }

    /// Create a fresh record at ordinal `num`, adopting it on success.
    async fn try_create(&self, num: i32) {
        match self.store.add_pod(num, &self.config.group_name).await {
            Ok(record) => {
                self.adopt(record.id, record.num, num);
                let _ = self.invoke_callback(record.num, num);
            }
            Err(error @ StoreError::NoEntries) => {
                self.record_fail(FailReason::ActualizeConflict, &error);
                self.reset();
            }
            Err(error @ StoreError::Storage(_)) => {
                self.record_fail(FailReason::StorageError, &error);
                self.reset();
            }
        }
    }

    /// Transition Unclaimed/Claimed -> Claimed with `(id, num, count)`.
    fn adopt(&self, id: i64, num: i32, count: i32) {
        self.state.id.store(id, Ordering::Relaxed);
        self.state.num.store(num, Ordering::Relaxed);
        self.state.count.store(count, Ordering::Relaxed);
        self.state.full_scan_count.store(0, Ordering::Relaxed);
        info!(
            group = %self.config.group_name,
            id, num, count, "splitter adopted pod record"
        );
    }

    fn invoke_callback(&self, num: i32, count: i32) -> Result<(), CallbackError> {
        match &self.callback {
            None => Ok(()),
            Some(callback) => match callback(num, count) {
                Ok(()) => Ok(()),
                Err(error) => {
                    error!(group = %self.config.group_name, num, count, %error, "splitter adoption callback failed");
                    Err(error)
                }
            },
        }
    }

    /// Transition Claimed -> Unclaimed, or no-op if already Unclaimed. Bumps
    /// `full_scan_count` per `self` starting its next cycle from scratch.
    fn reset(&self) {
        self.state.id.store(0, Ordering::Relaxed);
        self.state.num.store(0, Ordering::Relaxed);
        self.state.count.store(0, Ordering::Relaxed);
        self.state.full_scan_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fail_for(&self, error: &StoreError) {
        let reason = match error {
            StoreError::NoEntries => FailReason::ActualizeConflict,
            StoreError::Storage(_) => FailReason::StorageError,
        };
        self.record_fail(reason, error);
    }

    fn record_fail(&self, reason: FailReason, error: &StoreError) {
        metrics::counter!("splitter_sync_failures_total", "handler" => HANDLER, "reason" => reason.as_label())
            .increment(1);
        error!(group = %self.config.group_name, reason = reason.as_label(), %error, "splitter sync cycle failed");
    }
}

impl<S: PodStore> std::fmt::Display for Splitter<S> {
    /// A stable human-readable identity: `group_num_count`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.config.group_name, self.num(), self.count())
    }
}

enum CaptureOutcome {
    Adopted,
    NoCandidate,
    Failed,
    /// `get_first_unused_pod` hit a storage error; `reset` already ran as
    /// part of handling it (see §4.1.1), so the caller must not reset again.
    AlreadyReset,
}
