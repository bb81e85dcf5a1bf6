use thiserror::Error;

/// A device protocol error code, either one the core recognizes by name or a
/// raw code the firmware introduced after this crate was last updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum KnownDeviceError {
    OpNotPermitted,
    OpUserRequired,
    UnknownError,
    VarintDataRange,
    PrivateSpend,
    PrivateView,
    ResetKeys,
    Address,
    KeyDerivation,
    DerivePubkey,
    PubkeyMismatch,
    DeriveSeckey,
    Keccak,
    CompleteRingSig,
    GenerateKeyImage,
    SeckeyToPubkey,
    Other(u16),
}

impl KnownDeviceError {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x4000 => Self::OpNotPermitted,
            0x4001 => Self::OpUserRequired,
            0x4444 => Self::UnknownError,
            0x6000 => Self::VarintDataRange,
            0x9400 => Self::PrivateSpend,
            0x9401 => Self::PrivateView,
            0x9402 => Self::ResetKeys,
            0x9450 => Self::Address,
            0x9500 => Self::KeyDerivation,
            0x9501 => Self::DerivePubkey,
            0x9502 => Self::PubkeyMismatch,
            0x9503 => Self::DeriveSeckey,
            0x9504 => Self::Keccak,
            0x9505 => Self::CompleteRingSig,
            0x9506 => Self::GenerateKeyImage,
            0x9507 => Self::SeckeyToPubkey,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::OpNotPermitted => 0x4000,
            Self::OpUserRequired => 0x4001,
            Self::UnknownError => 0x4444,
            Self::VarintDataRange => 0x6000,
            Self::PrivateSpend => 0x9400,
            Self::PrivateView => 0x9401,
            Self::ResetKeys => 0x9402,
            Self::Address => 0x9450,
            Self::KeyDerivation => 0x9500,
            Self::DerivePubkey => 0x9501,
            Self::PubkeyMismatch => 0x9502,
            Self::DeriveSeckey => 0x9503,
            Self::Keccak => 0x9504,
            Self::CompleteRingSig => 0x9505,
            Self::GenerateKeyImage => 0x9506,
            Self::SeckeyToPubkey => 0x9507,
            Self::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for KnownDeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.code())
    }
}

/// The crate-wide error type. Every fallible operation in this core returns `Result<_, Error>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Not an error in the usual sense: surfaced by `is_our_transaction_output` when the
    /// scanned output does not belong to the wallet. Scanning code turns this into a skip.
    #[error("output does not belong to this wallet")]
    NotOurOutput,

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("insufficient funds: {0}")]
    Insufficient(String),

    #[error("payment id conflict: {0}")]
    PaymentIdConflict(String),

    #[error("unexpected device state: expected {expected}, observed {observed}")]
    DeviceStateError { expected: String, observed: String },

    #[error("device protocol error: {0}")]
    DeviceProtocolError(KnownDeviceError),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("transaction decode error: {0}")]
    DecodeError(String),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<crate::transport::TransportError> for Error {
    fn from(err: crate::transport::TransportError) -> Self {
        Self::TransportError(err.0)
    }
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn device_protocol(code: u16) -> Self {
        Self::DeviceProtocolError(KnownDeviceError::from_code(code))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
