//! Port-bound pattern listener.
//!
//! Two transport adapters (a UDP datagram loop and a TCP accept loop) feed
//! one shared detection pipeline: source filter → cooldown → pattern match
//! → coordinator. The listener binds only the configured port, never
//! captures promiscuously, and never forwards or retains traffic.

mod tcp;
mod udp;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::{DetectorConfig, Protocol};
use crate::cooldown::CooldownGate;
use crate::coordinator::DetectionCoordinator;
use crate::pattern::CompiledMatcher;

/// Per-detector pipeline state shared by the transport adapters: everything
/// needed to turn `(payload, source address)` into a coordinator
/// notification.
pub(crate) struct PipelineContext {
    entry_id: String,
    matcher: CompiledMatcher,
    source_filter: Option<IpAddr>,
    gate: Mutex<CooldownGate>,
    coordinator: Arc<DetectionCoordinator>,
    /// Set by `stop()`. An in-flight TCP handler that finishes its read
    /// after the listener stopped must not feed the pipeline.
    stopped: AtomicBool,
}

impl PipelineContext {
    /// Runs one payload through the detection pipeline. Returns true when a
    /// detection was accepted and dispatched.
    pub(crate) fn process(&self, payload: &[u8], source: IpAddr) -> bool {
        if self.stopped.load(Ordering::Relaxed) {
            return false;
        }

        if let Some(filter) = self.source_filter {
            if source != filter {
                trace!(
                    "detector '{}': dropping data from {} (filter {})",
                    self.entry_id,
                    source,
                    filter
                );
                return false;
            }
        }

        // Cheap early-out while the gate is closed; nothing is recorded
        // until a candidate actually matches.
        if !self.gate.lock().would_accept(Instant::now()) {
            return false;
        }

        if !self.matcher.matches(payload) {
            return false;
        }

        // Concurrent TCP handlers can race between the pre-check above and
        // here; this call holds the lock and is authoritative.
        if !self.gate.lock().accept(Instant::now()) {
            return false;
        }

        debug!(
            "detector '{}': pattern matched in {} byte payload from {}",
            self.entry_id,
            payload.len(),
            source
        );
        self.coordinator.on_detection();
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Starting,
    Running,
}

struct ListenerState {
    phase: Phase,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Binds the configured transport and feeds inbound payloads through the
/// detection pipeline until stopped.
///
/// The configuration is expected to have passed
/// [`DetectorConfig::validate`]; the listener treats it as read-only for
/// its lifetime.
pub struct NetworkListener {
    entry_id: String,
    config: DetectorConfig,
    ctx: Arc<PipelineContext>,
    state: Mutex<ListenerState>,
}

impl NetworkListener {
    pub fn new(
        entry_id: String,
        config: DetectorConfig,
        coordinator: Arc<DetectionCoordinator>,
    ) -> Result<Self> {
        let matcher = CompiledMatcher::compile(config.pattern_type, &config.pattern_value)
            .with_context(|| format!("invalid pattern for detector '{}'", entry_id))?;

        let ctx = Arc::new(PipelineContext {
            entry_id: entry_id.clone(),
            matcher,
            source_filter: config.source_filter(),
            gate: Mutex::new(CooldownGate::new(config.cooldown())),
            coordinator,
            stopped: AtomicBool::new(false),
        });

        Ok(Self {
            entry_id,
            config,
            ctx,
            state: Mutex::new(ListenerState {
                phase: Phase::Stopped,
                local_addr: None,
                shutdown_tx: None,
                tasks: Vec::new(),
            }),
        })
    }

    /// Binds the socket and spawns the ingestion task(s). A no-op when the
    /// listener is already starting or running. On failure the listener
    /// stays stopped; retrying is the caller's decision.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Running | Phase::Starting => {
                    debug!("detector '{}': start ignored, already running", self.entry_id);
                    return Ok(());
                }
                Phase::Stopped => state.phase = Phase::Starting,
            }
        }
        self.ctx.stopped.store(false, Ordering::Relaxed);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let bound = match self.config.protocol {
            Protocol::Udp => self.start_udp(shutdown_rx),
            Protocol::Tcp => self.start_tcp(shutdown_rx).await,
        };

        match bound {
            Ok((local_addr, task)) => {
                let mut state = self.state.lock();
                if state.phase != Phase::Starting {
                    // stop() won the race while we were binding; release
                    // the socket and stay stopped.
                    drop(state);
                    task.abort();
                    let _ = task.await;
                    return Ok(());
                }
                state.phase = Phase::Running;
                state.local_addr = Some(local_addr);
                state.shutdown_tx = Some(shutdown_tx);
                state.tasks = vec![task];
                info!(
                    "detector '{}': listening on {}/{}",
                    self.entry_id, self.config.protocol, local_addr
                );
                Ok(())
            }
            Err(e) => {
                self.state.lock().phase = Phase::Stopped;
                Err(e)
            }
        }
    }

    fn start_udp(
        &self,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let group = self
            .config
            .multicast
            .then_some(self.config.multicast_group);
        let socket = udp::bind(self.config.port, group)?;
        let local_addr = socket
            .local_addr()
            .context("failed to read bound UDP address")?;
        let task = tokio::spawn(udp::recv_loop(socket, Arc::clone(&self.ctx), shutdown_rx));
        Ok((local_addr, task))
    }

    async fn start_tcp(
        &self,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .with_context(|| format!("failed to bind TCP port {}", self.config.port))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound TCP address")?;
        let task = tokio::spawn(tcp::accept_loop(
            listener,
            Arc::clone(&self.ctx),
            shutdown_rx,
        ));
        Ok((local_addr, task))
    }

    /// Stops ingestion and releases the bound socket. Best-effort and
    /// idempotent; never fails. After this returns no new inbound data is
    /// processed, though a TCP connection handler that already passed the
    /// match check may still deliver its notification.
    pub async fn stop(&self) {
        let (shutdown_tx, tasks) = {
            let mut state = self.state.lock();
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            state.local_addr = None;
            (state.shutdown_tx.take(), std::mem::take(&mut state.tasks))
        };
        self.ctx.stopped.store(true, Ordering::Relaxed);

        if let Some(tx) = shutdown_tx {
            let _ = tx.try_send(());
        }
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        info!("detector '{}': stopped", self.entry_id);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().phase == Phase::Running
    }

    /// Address actually bound, useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().local_addr
    }
}
