use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{FlagRelayError, Result};
use crate::scheduler::Scheduler;
use crate::shutdown;
use crate::transport::tcp;
use crate::validator;

/// Server-level tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of session slots. Each holds up to two seats, so the server
    /// accepts at most `2 * game_max` concurrent connections.
    pub game_max: usize,
    /// Maximum accepted `CMD` payload length, in bytes.
    pub max_cmd_len: usize,
    /// Consecutive flag-provisioning failures a seat is allowed before the
    /// server drops its connection.
    pub max_flag_retries: u32,
    /// How long the accept loop sleeps after a `WouldBlock` before
    /// retrying `accept`.
    pub accept_idle_sleep: Duration,
    /// Per-handler read timeout: the bounded tick a handler uses to
    /// re-check the shutdown flag and the session's stop state between
    /// frames.
    pub handler_timer: Duration,
    /// Length, in bytes, of a generated flag token.
    pub flag_token_len: usize,
    /// How long [`Server::stop`] waits for in-flight handlers to drain
    /// before closing the listener regardless.
    pub shutdown_drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            game_max: 10,
            max_cmd_len: validator::MAX_CMD_LEN,
            max_flag_retries: 5,
            accept_idle_sleep: Duration::from_millis(100),
            handler_timer: Duration::from_secs(1),
            flag_token_len: crate::token::FLAG_TOKEN_LEN,
            shutdown_drain_timeout: Duration::from_secs(5),
        }
    }
}

/// The flag-capture relay server.
///
/// Owns the scheduler (the fixed-size slot table of [`Session`]s) and the
/// accept loop's lifecycle. [`Server::start`] spawns the accept loop on
/// its own thread and returns immediately; [`Server::stop`] signals
/// shutdown and waits for in-flight handlers to drain before the listener
/// is considered closed.
///
/// [`Session`]: crate::session::Session
pub struct Server {
    scheduler: Arc<Scheduler>,
    shutdown: Arc<AtomicBool>,
    bind_addr: String,
    config: Arc<ServerConfig>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        let config = Arc::new(config);
        Self {
            scheduler: Arc::new(Scheduler::new(config.clone())),
            shutdown: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            config,
            accept_thread: None,
        }
    }

    /// Bind the listener, arm signal-triggered shutdown, and spawn the
    /// accept loop on its own thread.
    pub fn start(&mut self) -> Result<()> {
        if self.accept_thread.is_some() {
            return Err(FlagRelayError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr).map_err(FlagRelayError::BindFailed)?;
        listener
            .set_nonblocking(true)
            .map_err(FlagRelayError::BindFailed)?;

        self.shutdown.store(false, Ordering::SeqCst);
        shutdown::register(&self.shutdown)?;

        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.clone();

        tracing::info!(addr = %self.bind_addr, game_max = self.config.game_max, "server listening");

        self.accept_thread = Some(thread::spawn(move || {
            tcp::accept_loop(listener, scheduler, shutdown);
        }));

        Ok(())
    }

    /// Signal shutdown, wait (bounded by
    /// [`ServerConfig::shutdown_drain_timeout`]) for every handler to
    /// drain, then join the accept thread.
    pub fn stop(&mut self) -> Result<()> {
        let Some(accept_thread) = self.accept_thread.take() else {
            return Err(FlagRelayError::NotStarted);
        };

        self.shutdown.store(true, Ordering::SeqCst);
        tracing::info!("server stopping");

        let drained = shutdown::drain(
            &self.scheduler,
            self.config.shutdown_drain_timeout,
            self.config.accept_idle_sleep,
        );
        if !drained {
            tracing::warn!(
                live_handlers = self.scheduler.live_handlers(),
                "shutdown drain timed out with handlers still live"
            );
        }

        let _ = accept_thread.join();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.accept_thread.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    /// Number of handler threads currently serving a seat.
    pub fn live_handlers(&self) -> usize {
        self.scheduler.live_handlers()
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}
