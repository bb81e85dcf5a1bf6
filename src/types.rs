//! Core data model: hex-rendered cryptographic values and the structures the
//! transaction builder assembles in-process before handing them to the device.

use crate::error::{Error, Result};

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn validate_hex(s: &str, expected_len: usize, what: &str) -> Result<()> {
    if s.len() != expected_len || !is_lower_hex(s) {
        return Err(Error::invalid_argument(format!(
            "{what} must be exactly {expected_len} lowercase hex characters, got {s:?}"
        )));
    }
    Ok(())
}

/// A 32-byte value rendered as 64 lowercase hex characters. Used for hashes, scalars
/// (private keys) and points (public keys) alike, per the wire encoding they share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(String);

impl Hash {
    pub fn new(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        validate_hex(&hex, 64, "hash/scalar/point")?;
        Ok(Self(hex))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        hex::decode_to_slice(&self.0, &mut out).expect("validated on construction");
        out
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Alias kept distinct at call sites even though the representation is identical to [`Hash`].
pub type Scalar = Hash;
/// Alias kept distinct at call sites even though the representation is identical to [`Hash`].
pub type Point = Hash;

/// A 64-byte signature rendered as 128 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(String);

impl Signature {
    pub fn new(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        validate_hex(&hex, 128, "signature")?;
        Ok(Self(hex))
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        hex::decode_to_slice(&self.0, &mut out).expect("validated on construction");
        out
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key pair as cached by the helper's session. `private` is absent for keys whose
/// secret half never leaves the device (the spend key, in normal operation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public: Point,
    pub private: Option<Scalar>,
}

/// A decoded CryptoNote address: spend/view public keys, optional embedded payment id,
/// and the base58 prefix it was (or will be) encoded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub spend_public: Point,
    pub view_public: Point,
    pub payment_id: Option<Hash>,
    pub prefix: u64,
}

/// The device-internal bookkeeping attached to an output once it is confirmed to be ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionKeys {
    pub transaction_public_key: Point,
    pub derivation: Point,
    pub output_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedOutputInput {
    pub public_ephemeral: Point,
    pub transaction_keys: TransactionKeys,
    pub private_ephemeral: Option<Scalar>,
}

/// A scanned output. `key_image` and `input` are populated once [`crate::helper`] has
/// confirmed the output belongs to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedOutput {
    pub index: u32,
    pub key: Point,
    pub global_index: u64,
    pub amount: u64,
    pub input: Option<OwnedOutputInput>,
    pub key_image: Option<Hash>,
}

/// A destination amount/address pair supplied by the caller, not yet turned into a
/// stealth output key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedOutput {
    pub amount: u64,
    pub destination: Address,
}

/// A decoy ring member pulled from the caller-supplied output pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomOutput {
    pub key: Point,
    pub global_index: u64,
}

/// One entry of an assembled ring: either the real output or a decoy, referenced by its
/// absolute chain index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingMember {
    pub key: Point,
    pub index: u64,
}

/// A fully assembled input ready to load onto the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInput {
    pub amount: u64,
    pub key_image: Hash,
    pub transaction_keys: TransactionKeys,
    /// Ring members, sorted ascending by `index`. Length is `mixin + 1`.
    pub outputs: Vec<RingMember>,
    /// Position of the real output within `outputs`.
    pub real_output_index: usize,
}

impl PreparedInput {
    pub fn real_global_index(&self) -> u64 {
        self.outputs[self.real_output_index].index
    }
}

/// A fully assembled output ready to load onto the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOutput {
    pub amount: u64,
    pub key: Point,
}

/// The device's transaction construction phase, as read from `TX_STATE` (INS 0x70).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTxState {
    Inactive,
    Ready,
    ReceivingInputs,
    InputsReceived,
    ReceivingOutputs,
    OutputsReceived,
    PrefixReady,
    Complete,
}

impl DeviceTxState {
    pub fn code(self) -> u8 {
        match self {
            Self::Inactive => 0,
            Self::Ready => 1,
            Self::ReceivingInputs => 2,
            Self::InputsReceived => 3,
            Self::ReceivingOutputs => 4,
            Self::OutputsReceived => 5,
            Self::PrefixReady => 6,
            Self::Complete => 7,
        }
    }
}

impl std::fmt::Display for DeviceTxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Inactive => "INACTIVE",
            Self::Ready => "READY",
            Self::ReceivingInputs => "RECEIVING_INPUTS",
            Self::InputsReceived => "INPUTS_RECEIVED",
            Self::ReceivingOutputs => "RECEIVING_OUTPUTS",
            Self::OutputsReceived => "OUTPUTS_RECEIVED",
            Self::PrefixReady => "PREFIX_READY",
            Self::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for DeviceTxState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Inactive,
            1 => Self::Ready,
            2 => Self::ReceivingInputs,
            3 => Self::InputsReceived,
            4 => Self::ReceivingOutputs,
            5 => Self::OutputsReceived,
            6 => Self::PrefixReady,
            7 => Self::Complete,
            other => {
                return Err(Error::invalid_argument(format!(
                    "unknown device transaction state {other}"
                )))
            }
        })
    }
}

/// The final, signed result reported by `TX_SIGN` (INS 0x77): the transaction hash and
/// its serialized size, used to validate the bytes retrieved via `TX_DUMP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResult {
    pub hash: Hash,
    pub size: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_rejects_wrong_length() {
        assert!(Hash::new("ab").is_err());
        assert!(Hash::new("a".repeat(63)).is_err());
        assert!(Hash::new("a".repeat(65)).is_err());
    }

    #[test]
    fn hash_rejects_uppercase() {
        assert!(Hash::new("A".repeat(64)).is_err());
    }

    #[test]
    fn hash_roundtrips_bytes() {
        let bytes = [7u8; 32];
        let h = Hash::from_bytes(&bytes);
        assert_eq!(h.to_bytes(), bytes);
    }

    #[test]
    fn signature_validates_length() {
        assert!(Signature::new("a".repeat(128)).is_ok());
        assert!(Signature::new("a".repeat(127)).is_err());
    }
}
