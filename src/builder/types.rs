//! Request and result types for a single device-driven transaction build.

use crate::crypto::DecodedTransaction;
use crate::types::{GeneratedOutput, Hash, RandomOutput, ScannedOutput};

/// Everything a single [`super::TransactionBuilder::build`] call needs: the real inputs
/// (already scanned and confirmed owned, with a key image attached), the destinations,
/// a decoy pool to draw ring members from, and the transaction-level parameters.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    /// Real inputs to spend. Each must have `key_image` and `input` populated by a prior
    /// [`crate::helper::CryptoNoteHelper::scan_transaction_outputs`] call.
    pub inputs: Vec<ScannedOutput>,
    pub destinations: Vec<GeneratedOutput>,
    /// Decoy candidates the ring assembly step draws from. Must contain, for every real
    /// input, at least `mixin` entries whose `global_index` differs from that input's.
    pub decoys: Vec<RandomOutput>,
    /// Mixin count per input. The device's ring size is fixed, so this must equal
    /// `commands::INPUT_RING_SIZE - 1`.
    pub mixin: usize,
    pub fee: u64,
    pub unlock_time: u64,
    pub payment_id: Option<Hash>,
}

/// The outcome of a successful build: the decoded transaction plus the hash/size the
/// device reported at `TX_SIGN`, which were already checked to match.
#[derive(Debug, Clone)]
pub struct BuiltTransaction<Tx: DecodedTransaction> {
    pub transaction: Tx,
    pub hash: Hash,
    pub size: u16,
}
