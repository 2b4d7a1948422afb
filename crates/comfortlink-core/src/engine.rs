// ── Engine ──
//
// Full lifecycle for one portal account. Owns the session, the inventory
// cache, the consumer registry and the scheduler, and runs the background
// poll loop and command processor once started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use comfortlink_api::SessionClient;
use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::model::{Device, DeviceId, Location};
use crate::registry::{ConsumerError, DeviceConsumerRegistry};
use crate::scheduler::{PollResult, PollScheduler};
use crate::status::ConnectionStatus;
use crate::store::InventoryCache;

const COMMAND_CHANNEL_SIZE: usize = 16;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Everything is constructed in
/// [`new`](Self::new); no network traffic happens until
/// [`start`](Self::start) or [`poll_now`](Self::poll_now).
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    session: Arc<SessionClient>,
    cache: Arc<InventoryCache>,
    registry: Arc<DeviceConsumerRegistry>,
    scheduler: Arc<PollScheduler>,
    cancel: CancellationToken,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// What the command path needs; cloned into the processor task so the
/// task never keeps the engine itself alive.
#[derive(Clone)]
struct CommandContext {
    session: Arc<SessionClient>,
    cache: Arc<InventoryCache>,
    scheduler: Arc<PollScheduler>,
}

impl Engine {
    /// Build the session client and all engine state.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let session = Arc::new(SessionClient::new(
            config.session_config(),
            config.credentials.clone(),
        )?);
        let cache = Arc::new(InventoryCache::new());
        let registry = Arc::new(DeviceConsumerRegistry::new());
        let scheduler = Arc::new(PollScheduler::new(
            Arc::clone(&session),
            Arc::clone(&cache),
            Arc::clone(&registry),
            config.poll.clone(),
        ));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                session,
                cache,
                registry,
                scheduler,
                cancel: CancellationToken::new(),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                task_handles: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.inner.session
    }

    pub fn cache(&self) -> &Arc<InventoryCache> {
        &self.inner.cache
    }

    pub fn scheduler(&self) -> &Arc<PollScheduler> {
        &self.inner.scheduler
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the poll loop and the command processor.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::ShutDown);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(CoreError::AlreadyStarted);
        }
        let Some(command_rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::AlreadyStarted);
        };

        let mut handles = self.inner.task_handles.lock().await;

        let scheduler = Arc::clone(&self.inner.scheduler);
        let cancel = self.inner.cancel.child_token();
        handles.push(tokio::spawn(async move {
            scheduler.run(cancel).await;
        }));

        let cancel = self.inner.cancel.child_token();
        handles.push(tokio::spawn(command_processor_task(
            self.command_context(),
            command_rx,
            cancel,
        )));

        info!(user = %self.inner.session.username(), "engine started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Run one poll cycle on the caller's task.
    ///
    /// Waits for any cycle already in progress; cycles never overlap.
    pub async fn poll_now(&self) -> Result<Arc<PollResult>, CoreError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::ShutDown);
        }
        Ok(self.inner.scheduler.poll_once().await)
    }

    /// Stop background tasks, close the session and drop the cached
    /// inventory and registered consumers.
    ///
    /// Tasks get `shutdown_timeout` to finish before they are aborted.
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            debug!("engine already shut down");
            return;
        }

        self.inner.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.inner.task_handles.lock().await.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.inner.config.poll.shutdown_timeout;
        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "background tasks did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        self.inner.session.close();
        self.inner.registry.clear();
        self.inner.cache.clear();
        info!("engine shut down");
    }

    // ── Consumers ────────────────────────────────────────────────────

    /// Register the consumer for `device_id`, replacing any previous one.
    pub fn register_consumer<F>(&self, device_id: DeviceId, consumer: F) -> bool
    where
        F: Fn(&Arc<Device>) -> Result<(), ConsumerError> + Send + Sync + 'static,
    {
        self.inner.registry.register(device_id, consumer)
    }

    pub fn unregister_consumer(&self, device_id: DeviceId) -> bool {
        self.inner.registry.unregister(device_id)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn device(&self, device_id: DeviceId) -> Option<Arc<Device>> {
        self.inner.cache.lookup(device_id)
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.cache.devices()
    }

    pub fn locations(&self) -> Vec<Arc<Location>> {
        self.inner.cache.all_locations()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.scheduler.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.scheduler.subscribe_status()
    }

    pub fn last_result(&self) -> Option<Arc<PollResult>> {
        self.inner.scheduler.last_result()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Execute a control command.
    ///
    /// While the engine is running the command goes through the command
    /// processor task; before `start` it is routed on the caller's task.
    /// Either way it uses the shared session and its classification.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::ShutDown);
        }
        if !self.inner.started.load(Ordering::Acquire) {
            return route_command(&self.command_context(), cmd).await;
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::ShutDown)?;

        rx.await.map_err(|_| CoreError::ShutDown)?
    }

    fn command_context(&self) -> CommandContext {
        CommandContext {
            session: Arc::clone(&self.inner.session),
            cache: Arc::clone(&self.inner.cache),
            scheduler: Arc::clone(&self.inner.scheduler),
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn command_processor_task(
    ctx: CommandContext,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&ctx, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
    debug!("command processor stopped");
}

// ── Command routing ──────────────────────────────────────────────────

async fn route_command(ctx: &CommandContext, cmd: Command) -> Result<CommandResult, CoreError> {
    let device_id = cmd.device_id();
    if ctx.cache.lookup(device_id).is_none() {
        return Err(CoreError::DeviceNotFound { device_id });
    }
    let change = cmd.to_control_change()?;

    if ctx.session.rate_limit_remaining().is_none() {
        ctx.session.ensure_authenticated().await?;
    }
    ctx.session.submit_control(&change).await?;

    info!(device_id = %device_id, command = ?cmd, "command applied");
    ctx.scheduler.request_refresh();
    Ok(CommandResult::Ok)
}
