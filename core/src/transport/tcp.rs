use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::frame::{self, Frame, Tag};
use crate::scheduler::Scheduler;
use crate::session::{FlagOutcome, Session, StopReason};

/// Non-blocking TCP accept loop.
///
/// Checks `shutdown` between accepts with the configured idle sleep so
/// that [`crate::server::Server::stop`] can terminate it promptly. Runs
/// the reaper once per iteration regardless of whether that iteration
/// accepted anything, so a quiet listener still reclaims drained sessions.
pub fn accept_loop(listener: TcpListener, scheduler: Arc<Scheduler>, shutdown: Arc<AtomicBool>) {
    let idle_sleep = scheduler.config().accept_idle_sleep;
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((mut stream, peer_addr)) => {
                if scheduler.at_capacity() {
                    tracing::warn!(%peer_addr, "game limit reached, rejecting connection");
                    let _ = stream.write_all(
                        &Frame::single(Tag::ERR, b"game limit reached".to_vec()).encode(),
                    );
                } else {
                    let sched = scheduler.clone();
                    let sd = shutdown.clone();
                    thread::spawn(move || ClientHandler::run(stream, sched, sd));
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(idle_sleep);
            }
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
        scheduler.reap();
    }
    tracing::debug!("accept loop exited");
}

/// The thread body for one seated connection.
struct ClientHandler;

impl ClientHandler {
    /// Entry point: seat the connection, run its frame loop, then tear
    /// down the seat regardless of how the loop ended.
    fn run(stream: TcpStream, scheduler: Arc<Scheduler>, shutdown: Arc<AtomicBool>) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        if reader_stream
            .set_read_timeout(Some(scheduler.config().handler_timer))
            .is_err()
        {
            return;
        }
        let reject_handle = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        let (session, idx) = match scheduler.seat(stream) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "could not seat connection");
                let mut s = reject_handle;
                let _ = s.write_all(
                    &Frame::single(Tag::ERR, b"game limit reached".to_vec()).encode(),
                );
                return;
            }
        };

        tracing::info!(%peer_addr, session_id = session.id, seat = idx, "seat attached");

        let mut reader = BufReader::new(reader_stream);
        let reason = Self::serve(&mut reader, &session, idx, &shutdown, peer_addr);

        let remaining = session.depart(idx);
        scheduler.seat_departed();
        tracing::info!(%peer_addr, session_id = session.id, seat = idx, reason, remaining, "seat departed");
    }

    /// Multiplex the socket read side, the session's stop signal, and the
    /// bounded per-tick timer: a read either returns a frame, returns
    /// `None` on an idle timeout (loop back and re-check the flags), or
    /// fails (treated as the peer going away).
    fn serve<R: std::io::BufRead>(
        reader: &mut R,
        session: &Arc<Session>,
        idx: usize,
        shutdown: &Arc<AtomicBool>,
        peer_addr: SocketAddr,
    ) -> &'static str {
        let mut notified_peer_departure = false;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return "server shutting down";
            }
            if session.is_stopped() {
                if !notified_peer_departure && session.stop_reason() == Some(StopReason::PeerDisconnected)
                {
                    let _ = session.notify_peer_disconnected(idx);
                    notified_peer_departure = true;
                }
                session.drain_wake();
                return "session ended";
            }

            match frame::try_read_frame(reader) {
                Ok(None) => continue,
                Ok(Some(frame)) => match Self::dispatch(session, idx, &frame) {
                    Ok(true) => return "flag provisioning retries exhausted",
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(%peer_addr, error = %e, "write failed while handling frame");
                        return "write error";
                    }
                },
                Err(crate::error::FlagRelayError::Malformed { kind }) => {
                    tracing::debug!(%peer_addr, ?kind, "discarding malformed frame");
                }
                Err(_) => return "read error or disconnect",
            }
        }
    }

    /// Route one frame through the session: `FLG` always goes to the
    /// provisioning state machine regardless of seat readiness; anything
    /// else is discarded until the seat is `READY`, then goes to the
    /// gameplay relay. Returns whether the seat should now be dropped.
    fn dispatch(session: &Session, idx: usize, frame: &Frame) -> std::io::Result<bool> {
        let Some(first) = frame.segments.first() else {
            return Ok(false);
        };

        if first.tag == Tag::FLG {
            let outcome = session.handle_flag(idx, &first.payload)?;
            return Ok(matches!(outcome, FlagOutcome::DropSeat));
        }

        if !session.is_ready(idx) {
            return Ok(false);
        }

        session.handle_gameplay(idx, frame)?;
        Ok(false)
    }
}
