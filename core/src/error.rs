//! Error types for the flag relay server library.

use std::fmt;

/// Errors that can occur in the flag relay server library.
///
/// Variants are grouped by what they mean for the caller:
///
/// - **Transport**: [`Io`](Self::Io) — socket read/write failure.
/// - **Malformed**: [`Malformed`](Self::Malformed) — a frame could not be
///   decoded; handled by discarding the frame, never by propagating this
///   further.
/// - **Capacity**: [`CapacityExceeded`](Self::CapacityExceeded) — the
///   scheduler's slot table has no room.
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Fatal**: [`BindFailed`](Self::BindFailed) — startup bind/listen
///   failure; the only variant that should reach `main` as a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum FlagRelayError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be decoded; see [`MalformedKind`] for why.
    #[error("malformed frame: {kind}")]
    Malformed { kind: MalformedKind },

    /// The scheduler has no empty slot and no half-filled session to join.
    #[error("game limit reached")]
    CapacityExceeded,

    /// [`Server::start`](crate::server::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::server::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Listener bind/listen failed at startup.
    #[error("failed to bind listener: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Token or random path generation failed.
    #[error("generation failed: {0}")]
    GenerationFailed(&'static str),
}

/// Specific kind of frame decode failure.
#[derive(Debug)]
pub enum MalformedKind {
    /// Missing or unparsable `tlength:` field.
    MissingTlength,
    /// Declared `tlength` exceeds the bytes actually available.
    TruncatedFrame,
    /// A segment is missing its `type:` field.
    MissingType,
    /// A segment's tag is not exactly three ASCII characters.
    InvalidTag,
    /// A segment is missing its `length:` field.
    MissingLength,
    /// A segment is missing its `data:` marker.
    MissingData,
    /// A segment's declared length exceeds the remaining frame bytes.
    LengthOverrun,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTlength => write!(f, "missing or invalid tlength field"),
            Self::TruncatedFrame => write!(f, "frame shorter than declared tlength"),
            Self::MissingType => write!(f, "segment missing type field"),
            Self::InvalidTag => write!(f, "segment tag is not three characters"),
            Self::MissingLength => write!(f, "segment missing length field"),
            Self::MissingData => write!(f, "segment missing data marker"),
            Self::LengthOverrun => write!(f, "segment declared length exceeds remaining frame"),
        }
    }
}

/// Convenience alias for `Result<T, FlagRelayError>`.
pub type Result<T> = std::result::Result<T, FlagRelayError>;
