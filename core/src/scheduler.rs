//! The fixed-size slot table that places new connections into sessions.
//!
//! There are exactly `game_max` slots, each holding at most one
//! [`Session`] (which itself holds at most two seats). Placement prefers
//! an existing half-filled session over starting a new one, so that two
//! clients connecting close together end up paired rather than each
//! starting their own game.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{FlagRelayError, Result};
use crate::server::ServerConfig;
use crate::session::Session;

pub struct Scheduler {
    slots: Vec<Mutex<Option<Arc<Session>>>>,
    live_handlers: AtomicUsize,
    config: Arc<ServerConfig>,
}

impl Scheduler {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let slots = (0..config.game_max).map(|_| Mutex::new(None)).collect();
        Scheduler {
            slots,
            live_handlers: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Number of handler threads currently serving a seat, across every
    /// session. Always `<= 2 * game_max`.
    pub fn live_handlers(&self) -> usize {
        self.live_handlers.load(Ordering::SeqCst)
    }

    /// Whether every seat across every slot is occupied. The accept loop
    /// checks this before doing any placement work, so a freshly accepted
    /// connection over capacity is rejected without touching the slot
    /// table at all.
    pub fn at_capacity(&self) -> bool {
        self.live_handlers() >= 2 * self.slots.len()
    }

    /// Place `stream` into a session: join a half-filled one if one
    /// exists, otherwise start a new one in the first empty slot.
    ///
    /// Returns [`FlagRelayError::CapacityExceeded`] if no empty slot and
    /// no half-filled session was found — this should be rare given the
    /// accept loop's own `at_capacity` check, but a slot can fill in the
    /// gap between that check and this call.
    pub fn seat(&self, stream: TcpStream) -> Result<(Arc<Session>, usize)> {
        for slot in &self.slots {
            let guard = slot.lock();
            if let Some(session) = guard.as_ref() {
                if !session.is_stopped() && session.seat_count() == 1 {
                    let session = session.clone();
                    drop(guard);
                    let idx = session.attach(stream)?;
                    self.live_handlers.fetch_add(1, Ordering::SeqCst);
                    return Ok((session, idx));
                }
            }
        }

        for slot in &self.slots {
            let mut guard = slot.lock();
            if guard.is_none() {
                let session = Session::new(self.config.clone());
                let idx = session.attach(stream)?;
                *guard = Some(session.clone());
                self.live_handlers.fetch_add(1, Ordering::SeqCst);
                return Ok((session, idx));
            }
        }

        Err(FlagRelayError::CapacityExceeded)
    }

    /// Record that a handler thread has finished serving a seat.
    pub fn seat_departed(&self) {
        self.live_handlers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Reclaim slots whose session has stopped and drained both seats.
    /// Returns the number of slots reclaimed. Safe to call frequently;
    /// each reclaim closes that session's wakeup channel exactly once.
    pub fn reap(&self) -> usize {
        let mut reclaimed = 0;
        for slot in &self.slots {
            let mut guard = slot.lock();
            let drained = matches!(
                guard.as_ref(),
                Some(session) if session.is_stopped() && session.seat_count() == 0
            );
            if drained {
                if let Some(session) = guard.take() {
                    session.close_wake_channel();
                }
                reclaimed += 1;
            }
        }
        reclaimed
    }
}
