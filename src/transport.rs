//! The opaque byte-exchange channel to the device. Everything about how bytes actually
//! reach the hardware (USB HID, a TCP bridge to a simulator, a WebUSB shim) lives outside
//! this crate; the core only needs one asynchronous request/response method.

use async_trait::async_trait;

/// A bidirectional byte channel to a Ledger device (or a mock standing in for one).
///
/// Implementations are expected to be cheap to hold behind a single exclusive lock: the
/// [`crate::device::DeviceClient`] never issues a second `exchange` before the first
/// resolves.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` (already framed by the APDU codec, guaranteed `<= 512` bytes) and
    /// return the raw response bytes, unparsed (`BODY || SW`).
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// An error raised by a [`Transport`] implementation, e.g. a USB disconnect or timeout.
/// Opaque beyond a human-readable message: transport-specific recovery is out of scope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
