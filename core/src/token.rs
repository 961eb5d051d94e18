//! Token and path generation.
//!
//! `generate_token` produces the win-condition secret, so it draws from a
//! cryptographically-seeded source rather than a predictable PRNG —
//! `rand::rng()` is backed by a CSPRNG reseeded from the OS, the same
//! source the library previously used for RTP SSRC generation
//! (`media::rtp::RtpHeader::with_random_ssrc`).

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::{FlagRelayError, Result};
use crate::validator::{self, Rejection};

/// Length of the flag token in bytes, per the glossary ("31-byte random
/// secret").
pub const FLAG_TOKEN_LEN: usize = 31;

/// Directory names this generator will never hand back, independent of
/// the banned-substring scan: these are reserved for a future extension
/// and would be confusing flag homes even though they pass validation.
const RESERVED_NAMES: &[&str] = &["flag", "tmp", "root"];

/// Generate a byte string of length `n` drawn uniformly from a
/// printable-ASCII alphanumeric alphabet.
///
/// Returns [`FlagRelayError::GenerationFailed`] only if `n` is zero — any
/// positive length always succeeds, since the underlying RNG does not
/// fail in ordinary operation.
pub fn generate_token(n: usize) -> Result<Vec<u8>> {
    if n == 0 {
        return Err(FlagRelayError::GenerationFailed(
            "token length must be non-zero",
        ));
    }
    let token: Vec<u8> = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .collect();
    Ok(token)
}

/// Generate a random directory name shaped as a sequence of lowercase
/// letters, bounded to fit within a 256-byte buffer and guaranteed not to
/// collide with a sentinel or reserved name, or contain a banned
/// substring.
///
/// `max_len` must be at least 8 and at most 256; 8 keeps the name long
/// enough that repeated generation within one process is vanishingly
/// unlikely to collide.
pub fn generate_random_path(max_len: usize) -> Result<String> {
    if !(8..=256).contains(&max_len) {
        return Err(FlagRelayError::GenerationFailed(
            "max_len out of the 8..=256 range",
        ));
    }

    let len = 8 + (max_len - 8).min(8);
    for _ in 0..16 {
        let name: String = rand::rng()
            .sample_iter(rand::distr::Uniform::new_inclusive(b'a', b'z').unwrap())
            .take(len)
            .map(char::from)
            .collect();

        if RESERVED_NAMES.contains(&name.as_str()) {
            continue;
        }
        if validator::validate_flag_dir(&name).is_err() {
            continue;
        }
        return Ok(name);
    }

    Err(FlagRelayError::GenerationFailed(
        "could not generate a non-colliding path after repeated attempts",
    ))
}

/// Translate a [`Rejection`] into a human-readable reason, logged by
/// [`crate::session::Session::handle_flag`] when a client-supplied
/// directory fails validation. Never put on the wire — the `FLG` payload
/// sent to the client stays the spec-mandated literal `"error"`.
pub fn reject_reason(r: Rejection) -> &'static str {
    match r {
        Rejection::BannedToken => "banned token in path",
        Rejection::TooLong => "path too long",
        Rejection::DisallowedCommand => "unreachable for a path check",
    }
}
