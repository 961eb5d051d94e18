//! Network transport: a non-blocking TCP accept loop plus a per-connection
//! client handler thread.
//!
//! One TCP connection gets exactly one handler thread for its whole
//! lifetime — there's no async runtime or connection pooling here, just
//! `thread::spawn` per seat, matching the scale this game operates at
//! (`2 * game_max` concurrent handlers, a small fixed number).

pub mod tcp;
