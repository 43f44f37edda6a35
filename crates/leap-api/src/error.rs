use thiserror::Error;

use crate::messages::ResponseStatus;

/// Top-level error type for the `leap-api` crate.
///
/// Covers every failure mode of the protocol layer: transport, framing,
/// request routing, and LAP pairing. `leap-core` wraps these into
/// engine-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The connection was closed while a request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O error on the underlying stream (connect refused, reset, EOF
    /// mid-line, etc.)
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Requests ────────────────────────────────────────────────────
    /// No response arrived for the request within the deadline.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The bridge answered with a non-2xx status code.
    #[error("bridge returned \"{status}\" for {url}")]
    Bridge { status: ResponseStatus, url: String },

    /// A payload could not be decoded. Carries the offending raw text.
    #[error("undecodable LEAP payload: {raw}")]
    Decode { raw: String },

    // ── Pairing ─────────────────────────────────────────────────────
    /// The bridge button was never pressed, or the bridge never signed
    /// the certificate request.
    #[error("pairing timed out waiting for the bridge")]
    PairingTimeout,

    /// The bridge refused to sign the certificate request.
    #[error("bridge rejected the certificate signing request")]
    PairingRejected,

    /// Transport failure during pairing.
    #[error("pairing transport failure: {0}")]
    PairingTransport(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth reconnecting after.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::Transport(_) | Self::Timeout { .. }
        )
    }
}
