// ── Poll scheduler ──
//
// One cycle: make sure the session is logged in, fetch the inventory,
// fetch every device's detail with bounded concurrency, apply the results
// to the cache on the cycle task, dispatch fresh devices to consumers,
// then classify the outcome into connection status and the next delay.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use comfortlink_api::{DeviceDetail, Error as ApiError, SessionClient};
use futures_util::{StreamExt, stream};
use tokio::sync::{Mutex, Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollSettings;
use crate::model::{Device, DeviceId};
use crate::registry::{DeviceConsumerRegistry, DispatchOutcome};
use crate::status::{ConnectionStatus, OfflineReason};
use crate::store::InventoryCache;

/// Largest exponent used when escalating; keeps the multiplier finite.
const MAX_BACKOFF_EXPONENT: u32 = 16;

// ── Cycle results ────────────────────────────────────────────────────

/// How a poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Inventory fetched and at least one device (or no device at all)
    /// refreshed. The connection is online.
    Online,
    /// Credentials rejected at login.
    AuthenticationFailed,
    /// Throttled by the portal; status left as it was.
    RateLimited { retry_after: Duration },
    /// The session was rejected mid-cycle; the next cycle logs in again.
    SessionExpired,
    /// Portal unreachable or failing.
    Offline,
}

impl CycleOutcome {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Everything one cycle observed.
#[derive(Debug)]
pub struct PollResult {
    pub timestamp: DateTime<Utc>,
    /// Devices whose detail fetch succeeded and were dispatched.
    pub succeeded: Vec<DeviceId>,
    /// Devices whose detail fetch failed, with the classified error.
    pub failed: Vec<(DeviceId, ApiError)>,
    /// Consumers that accepted this cycle's update.
    pub delivered: usize,
    /// Consumers that returned an error or panicked.
    pub consumer_failures: usize,
    /// Set when the cycle stopped before the detail stage.
    pub error: Option<ApiError>,
    pub outcome: CycleOutcome,
}

impl PollResult {
    fn aborted(timestamp: DateTime<Utc>, outcome: CycleOutcome, error: ApiError) -> Self {
        Self {
            timestamp,
            succeeded: Vec::new(),
            failed: Vec::new(),
            delivered: 0,
            consumer_failures: 0,
            error: Some(error),
            outcome,
        }
    }
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Delay before the next cycle.
///
/// Online cycles wait the normal interval. Rejected credentials wait
/// `auth_retry_delay`; throttling waits at least the cool-down. Once
/// `consecutive_failures` reaches the configured maximum the delay grows
/// to `interval * 2^(failures - max + 1)`, capped at the backoff ceiling
/// but never below the outcome's own minimum.
pub fn next_delay(
    settings: &PollSettings,
    outcome: CycleOutcome,
    consecutive_failures: u32,
) -> Duration {
    let base = match outcome {
        CycleOutcome::Online => return settings.interval,
        CycleOutcome::AuthenticationFailed => settings.auth_retry_delay,
        CycleOutcome::RateLimited { retry_after } => settings.interval.max(retry_after),
        CycleOutcome::SessionExpired | CycleOutcome::Offline => settings.interval,
    };

    let max = settings.max_consecutive_failures;
    if max == 0 || consecutive_failures < max {
        return base;
    }
    let exponent = (consecutive_failures - max + 1).min(MAX_BACKOFF_EXPONENT);
    settings
        .interval
        .saturating_mul(1 << exponent)
        .min(settings.backoff_ceiling)
        .max(base)
}

// ── PollScheduler ────────────────────────────────────────────────────

/// Drives poll cycles for one account and owns the connection status.
///
/// Cycles never overlap: [`poll_once`](Self::poll_once) holds the cycle
/// lock for its whole duration, which also makes the cycle the single
/// writer of the inventory cache.
pub struct PollScheduler {
    session: Arc<SessionClient>,
    cache: Arc<InventoryCache>,
    registry: Arc<DeviceConsumerRegistry>,
    settings: PollSettings,
    status: watch::Sender<ConnectionStatus>,
    consecutive_failures: AtomicU32,
    cycle_lock: Mutex<()>,
    last_result: ArcSwapOption<PollResult>,
    wake: Notify,
}

impl PollScheduler {
    pub fn new(
        session: Arc<SessionClient>,
        cache: Arc<InventoryCache>,
        registry: Arc<DeviceConsumerRegistry>,
        settings: PollSettings,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Unknown);
        Self {
            session,
            cache,
            registry,
            settings,
            status,
            consecutive_failures: AtomicU32::new(0),
            cycle_lock: Mutex::new(()),
            last_result: ArcSwapOption::empty(),
            wake: Notify::new(),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Cycles in a row that ended without reaching online.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn last_result(&self) -> Option<Arc<PollResult>> {
        self.last_result.load_full()
    }

    /// Ask the running loop to start its next cycle now.
    pub fn request_refresh(&self) {
        self.wake.notify_one();
    }

    // ── Loop ─────────────────────────────────────────────────────────

    /// Run cycles until `cancel` fires. Cancellation abandons an
    /// in-flight cycle, including its outstanding detail fetches.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            "poll loop started"
        );

        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.poll_once() => result,
            };

            let failures = self.consecutive_failures();
            let delay = next_delay(&self.settings, result.outcome, failures);
            debug!(
                outcome = ?result.outcome,
                failures,
                delay_secs = delay.as_secs(),
                "next poll scheduled"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.wake.notified() => debug!("early poll requested"),
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("poll loop stopped");
    }

    /// Run exactly one cycle and record its result.
    pub async fn poll_once(&self) -> Arc<PollResult> {
        let _cycle = self.cycle_lock.lock().await;
        let result = self.run_cycle().await;

        if result.outcome.is_online() {
            self.consecutive_failures.store(0, Ordering::Release);
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(failures, outcome = ?result.outcome, "poll cycle did not reach online");
        }

        let result = Arc::new(result);
        self.last_result.store(Some(Arc::clone(&result)));
        result
    }

    // ── Cycle ────────────────────────────────────────────────────────

    async fn run_cycle(&self) -> PollResult {
        let timestamp = Utc::now();

        if let Some(retry_after) = self.session.rate_limit_remaining() {
            debug!(
                retry_after_secs = retry_after.as_secs(),
                "rate-limit cool-down active, skipping cycle"
            );
            return PollResult::aborted(
                timestamp,
                CycleOutcome::RateLimited { retry_after },
                ApiError::RateLimited { retry_after },
            );
        }

        if let Err(e) = self.session.ensure_authenticated().await {
            let outcome = self.login_failed(&e);
            return PollResult::aborted(timestamp, outcome, e);
        }

        let records = match self.session.list_locations().await {
            Ok(records) => records,
            Err(e) => {
                let outcome = self.inventory_failed(&e);
                return PollResult::aborted(timestamp, outcome, e);
            }
        };
        self.cache.replace_locations(&records);

        let devices = self.cache.devices();
        let total = devices.len();
        let details = self.fetch_details(devices).await;

        // Results are applied here, sequentially, under the cycle lock.
        let mut fresh: Vec<Arc<Device>> = Vec::with_capacity(details.len());
        let mut succeeded = Vec::with_capacity(details.len());
        let mut failed = Vec::new();
        for (device_id, detail) in details {
            match detail {
                Ok(detail) => {
                    if let Some(device) = self.cache.update_device_snapshot(device_id, &detail) {
                        succeeded.push(device_id);
                        fresh.push(device);
                    }
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "device detail fetch failed");
                    failed.push((device_id, e));
                }
            }
        }

        let (mut delivered, mut consumer_failures) = (0, 0);
        for device in &fresh {
            match self.registry.dispatch(device) {
                DispatchOutcome::Delivered => delivered += 1,
                DispatchOutcome::Failed => consumer_failures += 1,
                DispatchOutcome::NoConsumer => {}
            }
        }
        debug!(
            refreshed = fresh.len(),
            delivered, consumer_failures, "device updates dispatched"
        );

        let outcome = self.details_outcome(total, succeeded.len(), &failed);
        PollResult {
            timestamp,
            succeeded,
            failed,
            delivered,
            consumer_failures,
            error: None,
            outcome,
        }
    }

    async fn fetch_details(
        &self,
        devices: Vec<Arc<Device>>,
    ) -> Vec<(DeviceId, Result<DeviceDetail, ApiError>)> {
        let concurrency = self.settings.detail_concurrency.max(1);
        stream::iter(devices.into_iter().map(|device| device.id()))
            .map(|device_id| {
                let session = Arc::clone(&self.session);
                async move {
                    let detail = session.device_detail(device_id.get()).await;
                    (device_id, detail)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    // ── Classification ───────────────────────────────────────────────

    fn login_failed(&self, err: &ApiError) -> CycleOutcome {
        match err {
            ApiError::AuthenticationFailed { message } => {
                warn!(error = %err, "portal login rejected");
                self.set_status(ConnectionStatus::offline(
                    OfflineReason::ConfigurationError,
                    message.clone(),
                ));
                CycleOutcome::AuthenticationFailed
            }
            e if e.is_rate_limited() => {
                let retry_after = e.retry_after().unwrap_or_default();
                info!(retry_after_secs = retry_after.as_secs(), "login rate limited");
                CycleOutcome::RateLimited { retry_after }
            }
            other => {
                warn!(error = %other, "portal login failed");
                self.set_status(ConnectionStatus::offline(
                    OfflineReason::CommunicationError,
                    other.to_string(),
                ));
                CycleOutcome::Offline
            }
        }
    }

    fn inventory_failed(&self, err: &ApiError) -> CycleOutcome {
        match err {
            e if e.is_rate_limited() => {
                let retry_after = e.retry_after().unwrap_or_default();
                info!(retry_after_secs = retry_after.as_secs(), "inventory fetch rate limited");
                CycleOutcome::RateLimited { retry_after }
            }
            e if e.is_auth_expired() => {
                info!(error = %e, "session expired during inventory fetch");
                CycleOutcome::SessionExpired
            }
            other => {
                warn!(error = %other, "inventory fetch failed");
                self.set_status(ConnectionStatus::offline(
                    OfflineReason::CommunicationError,
                    other.to_string(),
                ));
                CycleOutcome::Offline
            }
        }
    }

    fn details_outcome(
        &self,
        total: usize,
        succeeded: usize,
        failed: &[(DeviceId, ApiError)],
    ) -> CycleOutcome {
        if total == 0 || succeeded > 0 {
            self.set_status(ConnectionStatus::Online);
            return CycleOutcome::Online;
        }

        if let Some((_, e)) = failed.iter().find(|(_, e)| e.is_rate_limited()) {
            return CycleOutcome::RateLimited {
                retry_after: e.retry_after().unwrap_or_default(),
            };
        }

        if failed.iter().all(|(_, e)| e.is_auth_expired()) {
            info!("session expired during device detail fetches");
            return CycleOutcome::SessionExpired;
        }

        let message = failed.first().map_or_else(
            || "no device detail could be fetched".to_owned(),
            |(device_id, e)| {
                format!(
                    "all {} device detail fetches failed (device {device_id}: {e})",
                    failed.len()
                )
            },
        );
        self.set_status(ConnectionStatus::offline(
            OfflineReason::CommunicationError,
            message,
        ));
        CycleOutcome::Offline
    }

    fn set_status(&self, next: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!(from = %current, to = %next, "connection status changed");
            *current = next;
            true
        });
    }
}
