//! Async Rust client for the LEAP protocol spoken by Lutron bridges
//! (Caséta, RA2 Select, RA3, HomeWorks QSX).
//!
//! This crate provides the protocol layer:
//!
//! - [`Connection`] — newline-delimited JSON framing over a mutually
//!   authenticated TLS stream with the bridge's handshake peculiarities
//!   (certificate-only verification, no SNI).
//! - [`Requester`] — tag-based request/response correlation and URL
//!   routing of unsolicited messages, multiplexed on one stream.
//! - [`pair`] — the one-shot LAP pairing flow that produces the client
//!   certificate, key, and bridge CA consumed by every later connection.
//!
//! Higher-level consumers (e.g. `leap-core`) compose these into a bridge
//! engine with a live device model and a reconnect supervisor.

pub mod connection;
pub mod error;
mod lap_certs;
pub mod messages;
pub mod pairing;
pub mod requester;
pub mod transport;

pub use connection::{Connection, ConnectionReader, ConnectionWriter, Transport};
pub use error::Error;
pub use messages::{id_from_href, CommuniqueType, Header, Message, ResponseStatus};
pub use pairing::{pair, PairingData, BUTTON_PRESS_TIMEOUT};
pub use requester::{MessageHandler, Requester, UrlMatch, REQUEST_TIMEOUT};
pub use transport::{TlsCredentials, LAP_PORT, LEAP_PORT};
