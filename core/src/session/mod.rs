//! A paired game session: two seats, a flag-provisioning state machine per
//! seat, and the gameplay relay once both seats are ready.
//!
//! A session is created empty and filled by the scheduler one seat at a
//! time. All mutation of either seat — provisioning transitions, gameplay
//! dispatch, departure — goes through a single lock so that a win
//! decision, a forward, and a seat's departure can never interleave into
//! an inconsistent view from the other seat's handler.
//!
//! ## Seat lifecycle
//!
//! ```text
//! IDLE -> AWAIT_DIR -> AWAIT_CREATE_ACK -> READY
//!              ^---------------|  (rejected dir or "error" ack)
//! ```

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;

use crate::frame::{Frame, Tag};
use crate::server::ServerConfig;
use crate::token;
use crate::validator::{self, Rejection};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A seat's position in flag provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    /// No connection seated here yet. Never observed once `attach` has run.
    Idle,
    /// Waiting for the client's `FLG:<dir>` reply to the directory request.
    AwaitDir,
    /// Directory accepted, token generated, waiting for `FLG:"okay"` or
    /// `FLG:"error"` acknowledging the creation command.
    AwaitCreateAck,
    /// Provisioning complete; gameplay frames from this seat are now
    /// dispatched to the relay instead of the provisioning state machine.
    Ready,
}

/// Why a [`Session`] stopped accepting gameplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A seat echoed the opponent's flag token.
    Win,
    /// A seat's connection ended before a win was decided.
    PeerDisconnected,
}

/// Result of routing an `FLG` segment through a seat's provisioning state
/// machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    /// Directory accepted; a creation command was written to the seat.
    AwaitingCreateAck,
    /// Directory rejected, or token generation failed; the seat was told
    /// to retry and is back in `AWAIT_DIR`.
    RetryProvisioning,
    /// Consecutive failures on this seat reached the configured limit; the
    /// caller must close the connection.
    DropSeat,
    /// `"okay"` was received; the seat is now `READY`.
    Ready,
    /// The frame didn't fit the seat's current state and was ignored.
    Ignored,
}

/// Result of routing a gameplay-phase frame through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameplayOutcome {
    /// The session already stopped (a win was decided, or the peer
    /// departed) before this frame could be dispatched; nothing was
    /// transmitted.
    SessionEnded,
    /// The peer isn't `READY` yet; nothing was forwarded.
    WaitingForPeer,
    /// The sender echoed the opponent's flag token; the session is now
    /// stopped.
    Win,
    /// The frame was forwarded verbatim to the peer.
    Forwarded,
    /// A `CMD` segment was rejected by the command validator.
    Rejected(Rejection),
}

struct SeatSlot {
    writer: TcpStream,
    state: FlagState,
    flag_token: Vec<u8>,
    retries: u32,
}

struct SessionInner {
    seats: [Option<SeatSlot>; 2],
}

/// Two seats sharing one game. Created empty; the scheduler attaches a
/// connection to each of its (at most two) slots.
pub struct Session {
    pub id: u64,
    config: Arc<ServerConfig>,
    inner: Mutex<SessionInner>,
    stop: AtomicBool,
    stop_reason: Mutex<Option<StopReason>>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    stop_rx: Mutex<mpsc::Receiver<()>>,
}

impl Session {
    pub fn new(config: Arc<ServerConfig>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        Arc::new(Session {
            id: SESSION_COUNTER.fetch_add(1, Ordering::SeqCst),
            config,
            inner: Mutex::new(SessionInner { seats: [None, None] }),
            stop: AtomicBool::new(false),
            stop_reason: Mutex::new(None),
            stop_tx: Mutex::new(Some(tx)),
            stop_rx: Mutex::new(rx),
        })
    }

    /// Whether gameplay on this session has ended (a win or a departure).
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Why this session stopped, if it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.lock()
    }

    /// Number of seats currently occupied (0, 1, or 2).
    pub fn seat_count(&self) -> usize {
        self.inner.lock().seats.iter().filter(|s| s.is_some()).count()
    }

    /// Whether seat `idx` has finished provisioning.
    pub fn is_ready(&self, idx: usize) -> bool {
        self.inner.lock().seats[idx]
            .as_ref()
            .map(|s| s.state == FlagState::Ready)
            .unwrap_or(false)
    }

    /// Seat `stream` into the first empty slot and send the initial
    /// directory request. Panics if called on an already-full session —
    /// the scheduler never does this, since it only offers a session it
    /// has already confirmed has an empty slot.
    pub fn attach(&self, mut stream: TcpStream) -> std::io::Result<usize> {
        let frame = Frame::single(Tag::FLG, validator::FLAG_DIR_SENTINEL.as_bytes().to_vec());
        stream.write_all(&frame.encode())?;

        let mut inner = self.inner.lock();
        let idx = inner
            .seats
            .iter()
            .position(|s| s.is_none())
            .expect("attach called on a full session");
        inner.seats[idx] = Some(SeatSlot {
            writer: stream,
            state: FlagState::AwaitDir,
            flag_token: Vec::new(),
            retries: 0,
        });
        Ok(idx)
    }

    /// Route an `FLG` segment payload through seat `idx`'s provisioning
    /// state machine, writing whatever reply that requires.
    pub fn handle_flag(&self, idx: usize, payload: &[u8]) -> std::io::Result<FlagOutcome> {
        let mut inner = self.inner.lock();
        let Some(seat) = inner.seats[idx].as_mut() else {
            return Ok(FlagOutcome::Ignored);
        };

        match seat.state {
            FlagState::AwaitDir => {
                let dir = String::from_utf8_lossy(payload).into_owned();
                match validator::validate_flag_dir(&dir) {
                    Ok(()) => match token::generate_token(self.config.flag_token_len) {
                        Ok(tok) => {
                            let cmd = format!(
                                "echo '{}' > {}/flag.txt",
                                String::from_utf8_lossy(&tok),
                                dir
                            );
                            seat.writer
                                .write_all(&Frame::single(Tag::FLG, cmd.into_bytes()).encode())?;
                            seat.flag_token = tok;
                            seat.state = FlagState::AwaitCreateAck;
                            Ok(FlagOutcome::AwaitingCreateAck)
                        }
                        Err(_) => {
                            Self::fail_provisioning(seat, &self.config, "token generation failed")
                        }
                    },
                    Err(rejection) => {
                        Self::fail_provisioning(seat, &self.config, token::reject_reason(rejection))
                    }
                }
            }
            FlagState::AwaitCreateAck => {
                if payload == b"okay" {
                    seat.retries = 0;
                    seat.state = FlagState::Ready;
                    Ok(FlagOutcome::Ready)
                } else {
                    Self::fail_provisioning(seat, &self.config, "creation not acknowledged")
                }
            }
            FlagState::Idle | FlagState::Ready => Ok(FlagOutcome::Ignored),
        }
    }

    /// Reject the seat's current provisioning attempt and either retry or
    /// drop it. `reason` is never put on the wire (the `FLG` payload stays
    /// the spec-mandated literal `"error"`) — it's logged so a rejected
    /// directory or a failed generation is diagnosable from the server side.
    fn fail_provisioning(
        seat: &mut SeatSlot,
        config: &ServerConfig,
        reason: &str,
    ) -> std::io::Result<FlagOutcome> {
        seat.retries += 1;
        tracing::debug!(reason, retries = seat.retries, "flag provisioning rejected");
        if seat.retries >= config.max_flag_retries {
            return Ok(FlagOutcome::DropSeat);
        }
        seat.writer
            .write_all(&Frame::single(Tag::FLG, b"error".to_vec()).encode())?;
        seat.state = FlagState::AwaitDir;
        Ok(FlagOutcome::RetryProvisioning)
    }

    /// Route a gameplay-phase frame from seat `idx` through the relay.
    ///
    /// Assumes the caller has already confirmed `idx` itself is `READY` —
    /// this only checks the *peer's* readiness, since a not-yet-ready
    /// sender is handled earlier by dispatch still routing its frames to
    /// [`Session::handle_flag`].
    pub fn handle_gameplay(&self, idx: usize, frame: &Frame) -> std::io::Result<GameplayOutcome> {
        let mut inner = self.inner.lock();
        // A peer's depart() (under this same lock) can have set stop=true
        // and cleared its seat in the window between this seat's own
        // stop check and this call acquiring the lock. Bail out before any
        // write so a stopped session never transmits a new gameplay frame.
        if self.is_stopped() {
            return Ok(GameplayOutcome::SessionEnded);
        }
        let (left, right) = inner.seats.split_at_mut(1);
        let (seat_slot, peer_slot) = if idx == 0 {
            (&mut left[0], &mut right[0])
        } else {
            (&mut right[0], &mut left[0])
        };
        let seat = seat_slot.as_mut().expect("dispatch only calls this for an occupied seat");

        let peer_ready = peer_slot
            .as_ref()
            .map(|p| p.state == FlagState::Ready)
            .unwrap_or(false);
        if !peer_ready {
            seat.writer
                .write_all(&Frame::single(Tag::ERR, b"wait for second client".to_vec()).encode())?;
            return Ok(GameplayOutcome::WaitingForPeer);
        }
        let peer = peer_slot.as_mut().expect("checked peer_ready above");

        if let Some(first) = frame.segments.first() {
            if first.tag == Tag::CMD && first.payload == peer.flag_token {
                seat.writer
                    .write_all(&Frame::single(Tag::OUT, b"you won".to_vec()).encode())?;
                peer.writer
                    .write_all(&Frame::single(Tag::OUT, b"you lost".to_vec()).encode())?;
                self.request_stop(StopReason::Win);
                return Ok(GameplayOutcome::Win);
            }

            if first.tag == Tag::CMD {
                let payload_str = String::from_utf8_lossy(&first.payload);
                return match validator::validate_command(&payload_str, self.config.max_cmd_len) {
                    Ok(()) => {
                        peer.writer.write_all(&frame.encode())?;
                        Ok(GameplayOutcome::Forwarded)
                    }
                    Err(rejection) => {
                        seat.writer.write_all(
                            &Frame::single(Tag::ERR, b"command not allowed".to_vec()).encode(),
                        )?;
                        Ok(GameplayOutcome::Rejected(rejection))
                    }
                };
            }
        }

        peer.writer.write_all(&frame.encode())?;
        Ok(GameplayOutcome::Forwarded)
    }

    /// Write the one-time "other client disconnected" notice to the seat
    /// still attached. A no-op if that seat has since departed too.
    pub fn notify_peer_disconnected(&self, idx: usize) -> std::io::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(seat) = inner.seats[idx].as_mut() {
            seat.writer.write_all(
                &Frame::single(Tag::ERR, b"other client disconnected".to_vec()).encode(),
            )?;
        }
        Ok(())
    }

    /// Remove seat `idx` and mark the session stopped, returning the
    /// number of seats left occupied.
    pub fn depart(&self, idx: usize) -> usize {
        let remaining = {
            let mut inner = self.inner.lock();
            inner.seats[idx] = None;
            inner.seats.iter().filter(|s| s.is_some()).count()
        };
        self.request_stop(StopReason::PeerDisconnected);
        remaining
    }

    fn request_stop(&self, reason: StopReason) {
        let was_stopped = self.stop.swap(true, Ordering::SeqCst);
        if !was_stopped {
            *self.stop_reason.lock() = Some(reason);
        }
        if let Some(tx) = self.stop_tx.lock().as_ref() {
            let _ = tx.send(());
        }
    }

    /// Drain any pending wakeups without blocking. Used by handlers that
    /// poll on their own timer rather than truly blocking on this channel.
    pub fn drain_wake(&self) {
        let rx = self.stop_rx.lock();
        while rx.try_recv().is_ok() {}
    }

    /// Drop the wakeup channel's sender, which the reaper does exactly
    /// once when reclaiming a fully-drained session.
    pub fn close_wake_channel(&self) {
        self.stop_tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;
    use std::net::{TcpListener, TcpStream};

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        (client, server_side)
    }

    #[test]
    fn attach_sends_directory_request_and_fills_first_slot() {
        let (mut client, server_side) = loopback_pair();
        let session = Session::new(Arc::new(ServerConfig::default()));
        let idx = session.attach(server_side).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(session.seat_count(), 1);

        let frame = crate::frame::try_read_frame(&mut client).unwrap().unwrap();
        assert_eq!(frame.first_tag(), Some(Tag::FLG));
        assert_eq!(
            frame.first_payload(),
            Some(validator::FLAG_DIR_SENTINEL.as_bytes())
        );
    }

    #[test]
    fn valid_directory_advances_to_await_create_ack() {
        let (mut client, server_side) = loopback_pair();
        let session = Session::new(Arc::new(ServerConfig::default()));
        let idx = session.attach(server_side).unwrap();
        let _ = crate::frame::try_read_frame(&mut client).unwrap();

        let outcome = session.handle_flag(idx, b"/tmp/playerone").unwrap();
        assert_eq!(outcome, FlagOutcome::AwaitingCreateAck);

        let frame = crate::frame::try_read_frame(&mut client).unwrap().unwrap();
        assert_eq!(frame.first_tag(), Some(Tag::FLG));
        let cmd = String::from_utf8(frame.first_payload().unwrap().to_vec()).unwrap();
        assert!(cmd.starts_with("echo '"));
        assert!(cmd.contains("/tmp/playerone/flag.txt"));
    }

    #[test]
    fn rejected_directory_retries_until_the_limit_then_drops() {
        let (mut client, server_side) = loopback_pair();
        let config = Arc::new(ServerConfig {
            max_flag_retries: 3,
            ..ServerConfig::default()
        });
        let session = Session::new(config);
        let idx = session.attach(server_side).unwrap();
        let _ = crate::frame::try_read_frame(&mut client).unwrap();

        for _ in 0..2 {
            let outcome = session.handle_flag(idx, b"/etc/passwd").unwrap();
            assert_eq!(outcome, FlagOutcome::RetryProvisioning);
            let frame = crate::frame::try_read_frame(&mut client).unwrap().unwrap();
            assert_eq!(frame.first_payload(), Some(&b"error"[..]));
        }
        let outcome = session.handle_flag(idx, b"/etc/passwd").unwrap();
        assert_eq!(outcome, FlagOutcome::DropSeat);
    }

    #[test]
    fn okay_ack_reaches_ready_and_resets_retries() {
        let (mut client, server_side) = loopback_pair();
        let session = Session::new(Arc::new(ServerConfig::default()));
        let idx = session.attach(server_side).unwrap();
        let _ = crate::frame::try_read_frame(&mut client).unwrap();
        session.handle_flag(idx, b"/tmp/playerone").unwrap();
        let _ = crate::frame::try_read_frame(&mut client).unwrap();

        let outcome = session.handle_flag(idx, b"okay").unwrap();
        assert_eq!(outcome, FlagOutcome::Ready);
        assert!(session.is_ready(idx));
    }

    fn ready_session() -> (Session, TcpStream, TcpStream) {
        let (client_a, server_a) = loopback_pair();
        let (client_b, server_b) = loopback_pair();
        let session = Session::new(Arc::new(ServerConfig::default()));
        let a = session.attach(server_a).unwrap();
        let b = session.attach(server_b).unwrap();
        assert_eq!((a, b), (0, 1));

        let mut client_a = client_a;
        let mut client_b = client_b;
        for (client, idx) in [(&mut client_a, a), (&mut client_b, b)] {
            let _ = crate::frame::try_read_frame(client).unwrap();
            session.handle_flag(idx, b"/tmp/p").unwrap();
            let _ = crate::frame::try_read_frame(client).unwrap();
            session.handle_flag(idx, b"okay").unwrap();
        }
        (Arc::try_unwrap(session).unwrap_or_else(|_| unreachable!()), client_a, client_b)
    }

    #[test]
    fn gameplay_waits_until_peer_is_ready() {
        let (client_a, server_a) = loopback_pair();
        let mut client_a = client_a;
        let session = Session::new(Arc::new(ServerConfig::default()));
        let a = session.attach(server_a).unwrap();
        let _ = crate::frame::try_read_frame(&mut client_a).unwrap();
        session.handle_flag(a, b"/tmp/p").unwrap();
        let _ = crate::frame::try_read_frame(&mut client_a).unwrap();
        session.handle_flag(a, b"okay").unwrap();

        let outcome = session
            .handle_gameplay(a, &Frame::single(Tag::CMD, b"ls".to_vec()))
            .unwrap();
        assert_eq!(outcome, GameplayOutcome::WaitingForPeer);
        let frame = crate::frame::try_read_frame(&mut client_a).unwrap().unwrap();
        assert_eq!(frame.first_tag(), Some(Tag::ERR));
    }

    #[test]
    fn allowed_command_is_forwarded_to_peer() {
        let (session, mut client_a, mut client_b) = ready_session();
        let outcome = session
            .handle_gameplay(0, &Frame::single(Tag::CMD, b"ls -la".to_vec()))
            .unwrap();
        assert_eq!(outcome, GameplayOutcome::Forwarded);
        let forwarded = crate::frame::try_read_frame(&mut client_b).unwrap().unwrap();
        assert_eq!(forwarded.first_payload(), Some(&b"ls -la"[..]));
        let _ = &mut client_a;
    }

    #[test]
    fn disallowed_command_is_rejected_and_not_forwarded() {
        let (session, mut client_a, mut client_b) = ready_session();
        let outcome = session
            .handle_gameplay(0, &Frame::single(Tag::CMD, b"rm -rf /".to_vec()))
            .unwrap();
        assert_eq!(outcome, GameplayOutcome::Rejected(Rejection::DisallowedCommand));
        let reply = crate::frame::try_read_frame(&mut client_a).unwrap().unwrap();
        assert_eq!(reply.first_tag(), Some(Tag::ERR));
        client_b
            .set_read_timeout(Some(std::time::Duration::from_millis(50)))
            .unwrap();
        assert!(crate::frame::try_read_frame(&mut client_b).unwrap().is_none());
    }

    #[test]
    fn echoing_opponent_token_wins_and_stops_the_session() {
        let (session, mut client_a, mut client_b) = ready_session();
        let token = session.inner.lock().seats[1].as_ref().unwrap().flag_token.clone();

        let outcome = session
            .handle_gameplay(0, &Frame::single(Tag::CMD, token))
            .unwrap();
        assert_eq!(outcome, GameplayOutcome::Win);
        assert!(session.is_stopped());
        assert_eq!(session.stop_reason(), Some(StopReason::Win));

        let winner_frame = crate::frame::try_read_frame(&mut client_a).unwrap().unwrap();
        assert_eq!(winner_frame.first_payload(), Some(&b"you won"[..]));
        let loser_frame = crate::frame::try_read_frame(&mut client_b).unwrap().unwrap();
        assert_eq!(loser_frame.first_payload(), Some(&b"you lost"[..]));
    }

    #[test]
    fn departure_stops_the_session_and_signals_the_wake_channel() {
        let (session, _client_a, mut client_b) = ready_session();
        let remaining = session.depart(0);
        assert_eq!(remaining, 1);
        assert!(session.is_stopped());
        assert_eq!(session.stop_reason(), Some(StopReason::PeerDisconnected));

        session.notify_peer_disconnected(1).unwrap();
        let frame = crate::frame::try_read_frame(&mut client_b).unwrap().unwrap();
        assert_eq!(frame.first_payload(), Some(&b"other client disconnected"[..]));
    }
}
