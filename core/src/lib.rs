//! # flagrelay — a two-player flag-capture relay game server
//!
//! Pairs incoming TCP connections into sessions of two seats, provisions
//! each seat with a secret token hidden in a directory of the client's
//! choosing, then brokers validated shell-command traffic between the
//! pair until one side echoes the other's token back.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  CLI (binary crate)                        │
//! ├───────────────────────────────────────────┤
//! │  Server     — public API, orchestrator     │
//! │  Scheduler  — fixed-size session slot table│
//! ├───────────────────────────────────────────┤
//! │  Session    — seat pairing, flag state     │
//! │               machine, gameplay relay      │
//! ├───────────────────────────────────────────┤
//! │  Transport  — TCP accept loop + handlers   │
//! │  Shutdown   — signal-triggered teardown    │
//! ├───────────────────────────────────────────┤
//! │  Frame      — wire codec                   │
//! │  Validator  — command/path policy          │
//! │  Token      — secret and path generation   │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use flagrelay::Server;
//!
//! let mut server = Server::new("0.0.0.0:9000");
//! server.start().unwrap();
//! // ...
//! server.stop().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — [`Server`] orchestrator and [`ServerConfig`].
//! - [`scheduler`] — [`Scheduler`], the fixed-size slot table that places
//!   connections into sessions.
//! - [`session`] — [`Session`], the flag-provisioning state machine, and
//!   the gameplay relay.
//! - [`transport`] — the TCP accept loop and per-connection handler.
//! - [`shutdown`] — OS-signal registration and the drain sequence.
//! - [`frame`] — the wire frame codec.
//! - [`validator`] — command and path policy.
//! - [`token`] — flag token and directory-name generation.
//! - [`error`] — [`FlagRelayError`] enum and [`Result`] alias.

pub mod error;
pub mod frame;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod token;
pub mod transport;
pub mod validator;

pub use error::{FlagRelayError, Result};
pub use scheduler::Scheduler;
pub use server::{Server, ServerConfig};
pub use session::Session;
