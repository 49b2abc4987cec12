//! Error types for the services link engine.
//!
//! Three tiers, matching how each failure is treated at runtime:
//!
//! - [`ProtocolError`]: fatal for the link. Wrong receive password, an
//!   explicit `ERROR` from the peer, or I/O failure. The session closes.
//! - [`FrameError`]: a malformed wire line. The frame is dropped and the
//!   link keeps running; the peer's dialect is allowed to drift.
//! - [`StateError`]: API misuse by a caller (usually a plugin) — invalid
//!   nick, unknown UID, spawning on a non-internal server. Surfaced
//!   synchronously, never kills the link.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Fatal link-level errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The uplink authenticated with the wrong receive password.
    #[error("recvpass from uplink server {server} does not match configuration")]
    BadReceivePassword {
        /// Server name the peer announced.
        server: String,
    },

    /// The peer sent an explicit `ERROR` line.
    #[error("received ERROR from peer: {0}")]
    PeerError(String),

    /// A line exceeded the transport's length cap.
    #[error("line too long: {0} bytes")]
    LineTooLong(usize),

    /// Link bring-up failed before any traffic was exchanged.
    #[error("link setup failed: {0}")]
    Setup(#[from] StateError),
}

/// Errors for malformed inbound frames. Callers drop these silently.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    /// Line was empty or whitespace only.
    #[error("empty frame")]
    Empty,

    /// Fewer than two effective tokens; no command can be extracted.
    #[error("malformed frame: {0:?}")]
    Malformed(String),
}

/// Errors surfaced to plugin callers for invalid requests against the
/// state store or the outbound emitters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StateError {
    /// Nickname failed syntax validation.
    #[error("invalid nickname {0:?}")]
    InvalidNick(String),

    /// Channel name failed syntax validation.
    #[error("invalid channel name {0:?}")]
    InvalidChannel(String),

    /// Server name failed syntax validation.
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    /// SIDs are exactly three characters.
    #[error("invalid SID {0:?}")]
    InvalidSid(String),

    /// A server with this SID already exists.
    #[error("a server with SID {0:?} already exists")]
    DuplicateSid(String),

    /// A server with this name already exists.
    #[error("a server named {0:?} already exists")]
    DuplicateServerName(String),

    /// The SID does not name one of our own pseudo-servers.
    #[error("server {0:?} is not an internal pseudo-server")]
    NotInternalServer(String),

    /// The UID does not name one of our own pseudoclients.
    #[error("no internal pseudoclient with UID {0:?}")]
    NotInternalClient(String),

    /// No user with this UID is known.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// No channel with this name is known.
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PeerError("closing link".into());
        assert_eq!(format!("{}", err), "received ERROR from peer: closing link");

        let err = StateError::NotInternalServer("70M".into());
        assert_eq!(
            format!("{}", err),
            "server \"70M\" is not an internal pseudo-server"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let protocol_err: ProtocolError = io_err.into();
        match protocol_err {
            ProtocolError::Io(_) => {}
            _ => panic!("Expected Io variant"),
        }
    }
}
