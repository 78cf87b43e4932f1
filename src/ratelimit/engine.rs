//! Core rate accounting engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::state::ClientState;
use crate::error::{Result, WindowgateError};

/// Default window length when none is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default cadence of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Longest accepted window, one hundred years.
pub const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 86_400 + 25 * 86_400);

/// Validated settings for a [`RateAccountingEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum hits permitted per client per window
    pub limit: u64,
    /// Length of each client's window
    pub window: Duration,
    /// Tracked population above which the overload guard trips
    pub max_clients: usize,
    /// How often the background sweep runs
    pub sweep_interval: Duration,
    /// Whether a background sweep should run at all
    pub sweep_enabled: bool,
}

impl EngineConfig {
    /// Settings for `limit` hits per window with every other field defaulted.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            window: DEFAULT_WINDOW,
            max_clients: usize::MAX,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_enabled: true,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_sweep_enabled(mut self, enabled: bool) -> Self {
        self.sweep_enabled = enabled;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(WindowgateError::Config(
                "limit must be greater than 0".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(WindowgateError::Config(
                "window must be greater than 0".into(),
            ));
        }
        if self.window > MAX_WINDOW {
            return Err(WindowgateError::Config(format!(
                "window must not exceed {} seconds",
                MAX_WINDOW.as_secs()
            )));
        }
        if self.sweep_enabled && self.sweep_interval.is_zero() {
            return Err(WindowgateError::Config(
                "sweep_interval must be greater than 0 when sweeping is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// The outcome of accounting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window closes
    pub reset_at: DateTime<Utc>,
}

/// Tracks per-client windows and decides whether requests are admitted.
///
/// This struct is thread-safe and can be shared across tasks. Every
/// mutation holds the population's write lock for its full
/// read-modify-write, so a sweep never interleaves with a request on the
/// same client.
pub struct RateAccountingEngine {
    /// Latest window state per client identifier
    clients: RwLock<HashMap<String, ClientState>>,
    config: EngineConfig,
    /// `config.window` in chrono's representation
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
    /// Flips to `true` once on teardown
    shutdown: watch::Sender<bool>,
}

impl RateAccountingEngine {
    /// Create an engine reading wall-clock time.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine reading time from `clock`.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let window = chrono::Duration::from_std(config.window)
            .map_err(|e| WindowgateError::Config(format!("window out of range: {}", e)))?;
        let (shutdown, _) = watch::channel(false);

        debug!(
            limit = config.limit,
            window = ?config.window,
            max_clients = config.max_clients,
            sweep_enabled = config.sweep_enabled,
            "Rate accounting engine created"
        );

        Ok(Self {
            clients: RwLock::new(HashMap::new()),
            config,
            window,
            clock,
            shutdown,
        })
    }

    /// Count a request from `client_id` and decide whether it is allowed.
    pub fn record_request(&self, client_id: &str) -> (ClientState, Decision) {
        let state = {
            let mut clients = self.clients.write();
            let now = self.clock.now();

            let state = match clients.get(client_id) {
                None => {
                    debug!(client = %client_id, limit = self.config.limit, "Opening window for new client");
                    ClientState::new(client_id, self.config.limit, now)
                }
                Some(existing) if existing.is_expired(now, self.window) => {
                    debug!(
                        client = %client_id,
                        previous_hits = existing.hits(),
                        "Window expired, starting a new one"
                    );
                    clients.remove(client_id);
                    ClientState::new(client_id, self.config.limit, now)
                }
                Some(existing) => existing.with_incremented_hit(),
            };

            clients.insert(client_id.to_string(), state.clone());
            state
        };

        let decision = self.decide(&state);

        trace!(
            client = %client_id,
            hits = state.hits(),
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Request recorded"
        );

        (state, decision)
    }

    /// The current decision for `client_id` without counting a request.
    ///
    /// Returns `None` when the client is unknown or its window has expired,
    /// even if the expired entry has not been swept yet.
    pub fn peek_status(&self, client_id: &str) -> Option<Decision> {
        let now = self.clock.now();
        let clients = self.clients.read();
        clients
            .get(client_id)
            .filter(|state| !state.is_expired(now, self.window))
            .map(|state| self.decide(state))
    }

    /// Forget `client_id`; its next request opens a fresh window.
    pub fn reset_client(&self, client_id: &str) {
        if self.clients.write().remove(client_id).is_some() {
            debug!(client = %client_id, "Client reset");
        }
    }

    /// Forget every client.
    pub fn reset_all(&self) {
        let mut clients = self.clients.write();
        let cleared = clients.len();
        clients.clear();
        debug!(cleared, "All clients reset");
    }

    /// Snapshot of every client whose window is still open.
    pub fn list_active(&self) -> Vec<ClientState> {
        let now = self.clock.now();
        let clients = self.clients.read();
        clients
            .values()
            .filter(|state| !state.is_expired(now, self.window))
            .cloned()
            .collect()
    }

    /// Whether the tracked population exceeds `max_clients`.
    ///
    /// Callers consult this before [`record_request`](Self::record_request);
    /// it never changes state.
    pub fn population_over_limit(&self) -> bool {
        self.population_size() > self.config.max_clients
    }

    /// Number of tracked clients, expired-but-unswept entries included.
    pub fn population_size(&self) -> usize {
        self.clients.read().len()
    }

    /// Remove every expired entry in one full pass.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut clients = self.clients.write();
        let now = self.clock.now();
        let before = clients.len();
        clients.retain(|_, state| !state.is_expired(now, self.window));
        let removed = before - clients.len();

        if removed > 0 {
            info!(removed, remaining = clients.len(), "Swept expired clients");
        } else {
            trace!(population = before, "Sweep found nothing to remove");
        }

        removed
    }

    /// Permanently stop the scheduled sweep. Safe to call any number of times.
    pub fn shutdown(&self) {
        let was_shut_down = self.shutdown.send_replace(true);
        if !was_shut_down {
            info!("Rate accounting engine shut down, scheduled sweeps disabled");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A receiver that observes teardown.
    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current instant according to the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn decide(&self, state: &ClientState) -> Decision {
        Decision {
            allowed: !state.is_over_limit(),
            remaining: state.remaining(),
            reset_at: state.window_expiry_time(self.window),
        }
    }
}

impl std::fmt::Debug for RateAccountingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateAccountingEngine")
            .field("config", &self.config)
            .field("population", &self.population_size())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
