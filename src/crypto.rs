//! External collaborators named only by the interfaces they expose to the core: a
//! CryptoNote cryptography provider, a base58 address codec, and the `Transaction`
//! binary decoder used to parse the bytes retrieved from the device.

use crate::error::Result;
use crate::types::{Address, Hash, Point, Scalar, Signature};

/// Pure CryptoNote cryptography primitives the host needs to plan a transaction before
/// handing secret operations to the device. None of these touch the spend private key.
pub trait CryptoProvider: Send + Sync {
    /// `D = H_s(r·A) · G`-style shared secret derived from a transaction public key and a
    /// private view key.
    fn generate_key_derivation(&self, public_key: &Point, private_key: &Scalar) -> Result<Point>;

    /// `P = H_s(D, i) · G + B`: the stealth output key for output index `i`.
    fn derive_public_key(
        &self,
        derivation: &Point,
        output_index: u32,
        base_public_key: &Point,
    ) -> Result<Point>;

    fn secret_key_to_public_key(&self, private_key: &Scalar) -> Result<Point>;

    /// Keccak-based CryptoNote fast hash of arbitrary hex-encoded data.
    fn cn_fast_hash(&self, data_hex: &str) -> Result<Hash>;

    fn check_signature(&self, digest: &Hash, public_key: &Point, signature: &Signature) -> Result<bool>;
}

/// Base58 address encoding/decoding, including integrated-payment-id embedding and the
/// varint-encoded network prefix.
pub trait AddressCodec: Send + Sync {
    fn decode(&self, address: &str) -> Result<Address>;

    fn encode(&self, address: &Address) -> Result<String>;
}

/// A decoded transaction, exposing only what the builder needs to validate the bytes
/// retrieved via `TX_DUMP` against the device's `TX_SIGN` result.
pub trait DecodedTransaction {
    fn hash(&self) -> Hash;
    fn size(&self) -> u16;
}

/// The binary decoder for the device-returned transaction blob.
pub trait TransactionDecoder: Send + Sync {
    type Transaction: DecodedTransaction;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Transaction>;
}
