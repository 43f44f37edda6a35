use thiserror::Error;

/// Unified error type for the bridge engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Protocol-layer failure (transport, timeout, bridge status, ...).
    #[error(transparent)]
    Protocol(#[from] leap_api::Error),

    /// A command targeted a device, button, or scene the model does not
    /// know, or a device with no controllable zone.
    #[error("unknown entity {id}")]
    UnknownEntity { id: u32 },

    /// The engine has no live session.
    #[error("bridge is not connected")]
    Disconnected,
}
