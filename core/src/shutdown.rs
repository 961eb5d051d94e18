//! OS-signal-triggered shutdown coordination.
//!
//! Registers `SIGINT`, `SIGTERM`, `SIGQUIT`, and `SIGHUP` against a single
//! `shutdown` flag using `signal_hook`'s async-signal-safe flag helper —
//! the handler itself does nothing beyond an atomic store, and all actual
//! teardown happens on the accept loop and handler threads noticing the
//! flag on their next tick.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::scheduler::Scheduler;

/// Arm `shutdown` so that it flips to `true` when the process receives
/// `SIGINT`, `SIGTERM`, `SIGQUIT`, or `SIGHUP`.
pub fn register(shutdown: &Arc<AtomicBool>) -> io::Result<()> {
    for sig in [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGQUIT,
        signal_hook::consts::SIGHUP,
    ] {
        signal_hook::flag::register(sig, Arc::clone(shutdown))?;
    }
    Ok(())
}

/// Block until every handler thread has drained (`scheduler.live_handlers()
/// == 0`) or `timeout` elapses, polling the scheduler's reaper along the
/// way so sessions that finish during the drain are reclaimed promptly.
///
/// Returns `true` if the drain completed cleanly, `false` if it timed out
/// with handlers still live — the caller logs that distinction but
/// proceeds to close the listener either way.
pub fn drain(scheduler: &Scheduler, timeout: Duration, poll_interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        scheduler.reap();
        if scheduler.live_handlers() == 0 {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(poll_interval);
    }
}
