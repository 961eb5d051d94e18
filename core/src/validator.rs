//! Command validation.
//!
//! Screens `CMD` segment payloads before they leave the server toward a
//! peer, and reuses the same banned-substring scan for the directory a
//! client supplies during flag provisioning. Exposed as pure functions so
//! the policy can be unit-tested without a socket in sight.

/// Default maximum accepted `CMD` payload length, in bytes. A running
/// server may configure a different cap; this is the value
/// [`ServerConfig::default`](crate::server::ServerConfig::default) uses.
pub const MAX_CMD_LEN: usize = 250;

/// Wire literal the server sends to request a flag directory. A
/// client-supplied path containing this string is rejected so the
/// protocol's own control literal can never be mistaken for, or smuggled
/// inside, an arbitrary payload.
pub const FLAG_DIR_SENTINEL: &str = "FLG_DIR";

/// Substrings that are never allowed in a `CMD` payload or a flag
/// directory path: shell redirection/chaining metacharacters, path
/// escapes, and the flag directory sentinel.
const BANNED_SUBSTRINGS: &[&str] = &[
    "|",
    "&",
    ";",
    ">",
    "<",
    "`",
    "$(",
    "..",
    "/etc",
    FLAG_DIR_SENTINEL,
];

/// Leading tokens a `CMD` payload is allowed to start with.
const ALLOWED_COMMANDS: &[&str] = &["ls", "cat", "cd", "echo", "pwd", "openssl"];

/// Why a payload was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Contains a banned substring.
    BannedToken,
    /// Longer than the configured command length cap.
    TooLong,
    /// Leading token isn't in the allowed command set.
    DisallowedCommand,
}

/// Validate a `CMD` segment payload against a configured length cap.
///
/// Checks length first, then the banned-substring scan, then the
/// allowed-leading-token match — any one of those failing rejects the
/// whole payload.
pub fn validate_command(payload: &str, max_len: usize) -> Result<(), Rejection> {
    if payload.len() > max_len {
        return Err(Rejection::TooLong);
    }
    if contains_banned(payload) {
        return Err(Rejection::BannedToken);
    }
    let leading = payload.split_whitespace().next().unwrap_or("");
    if !ALLOWED_COMMANDS.contains(&leading) {
        return Err(Rejection::DisallowedCommand);
    }
    Ok(())
}

/// Validate a client-supplied flag directory path.
///
/// Shares the banned-substring scan with [`validate_command`] but has no
/// leading-token requirement — a directory path isn't a shell command.
pub fn validate_flag_dir(path: &str) -> Result<(), Rejection> {
    if path.is_empty() || path.len() > MAX_CMD_LEN {
        return Err(Rejection::TooLong);
    }
    if contains_banned(path) {
        return Err(Rejection::BannedToken);
    }
    Ok(())
}

fn contains_banned(s: &str) -> bool {
    BANNED_SUBSTRINGS.iter().any(|token| s.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_commands() {
        for cmd in ["ls", "ls -la", "cat flag.txt", "cd /tmp", "echo hi", "pwd"] {
            assert_eq!(validate_command(cmd, MAX_CMD_LEN), Ok(()));
        }
    }

    #[test]
    fn rejects_disallowed_leading_token() {
        assert_eq!(
            validate_command("rm -rf /", MAX_CMD_LEN),
            Err(Rejection::DisallowedCommand)
        );
        assert_eq!(
            validate_command("curl evil.example", MAX_CMD_LEN),
            Err(Rejection::DisallowedCommand)
        );
    }

    #[test]
    fn rejects_shell_metacharacters() {
        for cmd in ["ls | sh", "cat a && cat b", "echo x > out", "ls; rm -rf /", "cat `whoami`"] {
            assert_eq!(validate_command(cmd, MAX_CMD_LEN), Err(Rejection::BannedToken));
        }
    }

    #[test]
    fn rejects_path_escape() {
        assert_eq!(
            validate_command("cat ../../../etc/passwd", MAX_CMD_LEN),
            Err(Rejection::BannedToken)
        );
        assert_eq!(
            validate_command("cat /etc/shadow", MAX_CMD_LEN),
            Err(Rejection::BannedToken)
        );
    }

    #[test]
    fn rejects_flag_dir_sentinel_in_payload() {
        assert_eq!(
            validate_command("echo FLG_DIR", MAX_CMD_LEN),
            Err(Rejection::BannedToken)
        );
    }

    #[test]
    fn boundary_length_250_accepted_251_rejected() {
        let cmd_250 = format!("echo {}", "a".repeat(245));
        assert_eq!(cmd_250.len(), 250);
        assert_eq!(validate_command(&cmd_250, MAX_CMD_LEN), Ok(()));

        let cmd_251 = format!("echo {}", "a".repeat(246));
        assert_eq!(cmd_251.len(), 251);
        assert_eq!(validate_command(&cmd_251, MAX_CMD_LEN), Err(Rejection::TooLong));
    }

    #[test]
    fn a_smaller_configured_cap_is_honored() {
        assert_eq!(validate_command("pwd", 2), Err(Rejection::TooLong));
    }

    #[test]
    fn flag_dir_rejects_banned_and_empty() {
        assert_eq!(validate_flag_dir(""), Err(Rejection::TooLong));
        assert_eq!(validate_flag_dir("/etc/passwd"), Err(Rejection::BannedToken));
        assert_eq!(validate_flag_dir("/tmp/player_a"), Ok(()));
    }
}
