//! End-to-end coverage of the device-driving sequence in `TransactionBuilder::build`
//! against a fully scripted transport, exercising the strict `TX_*` phase ordering and
//! the guaranteed `TX_RESET` on both success and device refusal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use trtl_ledger_core::config::Config;
use trtl_ledger_core::crypto::{AddressCodec, CryptoProvider, DecodedTransaction, TransactionDecoder};
use trtl_ledger_core::error::{Error, Result};
use trtl_ledger_core::transport::{Transport, TransportError};
use trtl_ledger_core::types::{
    Address, GeneratedOutput, Hash, OwnedOutputInput, RandomOutput, ScannedOutput, Signature,
    TransactionKeys,
};
use trtl_ledger_core::{CryptoNoteHelper, TransactionBuilder, TransactionRequest};

struct ScriptedTransport {
    script: Mutex<VecDeque<(Vec<u8>, Vec<u8>)>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exchange(&self, request: &[u8]) -> std::result::Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let (expected, response) = script
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected extra exchange: {}", hex::encode(request)));
        assert_eq!(
            request,
            expected.as_slice(),
            "request #{} did not match the script",
            script.len()
        );
        Ok(response)
    }
}

struct IdentityCrypto;

impl CryptoProvider for IdentityCrypto {
    fn generate_key_derivation(&self, public_key: &Hash, _private_key: &Hash) -> Result<Hash> {
        Ok(public_key.clone())
    }
    fn derive_public_key(&self, derivation: &Hash, _output_index: u32, _base: &Hash) -> Result<Hash> {
        Ok(derivation.clone())
    }
    fn secret_key_to_public_key(&self, private_key: &Hash) -> Result<Hash> {
        Ok(private_key.clone())
    }
    fn cn_fast_hash(&self, _data_hex: &str) -> Result<Hash> {
        Hash::new("a".repeat(64))
    }
    fn check_signature(&self, _digest: &Hash, _public_key: &Hash, _signature: &Signature) -> Result<bool> {
        Ok(true)
    }
}

struct UnusedAddressCodec;

impl AddressCodec for UnusedAddressCodec {
    fn decode(&self, _address: &str) -> Result<Address> {
        Err(Error::NotSupported("not exercised by this test"))
    }
    fn encode(&self, _address: &Address) -> Result<String> {
        Err(Error::NotSupported("not exercised by this test"))
    }
}

#[derive(Debug)]
struct FixedTransaction {
    hash: Hash,
    size: u16,
}

impl DecodedTransaction for FixedTransaction {
    fn hash(&self) -> Hash {
        self.hash.clone()
    }
    fn size(&self) -> u16 {
        self.size
    }
}

struct EchoDecoder {
    hash: Hash,
    size: u16,
}

impl TransactionDecoder for EchoDecoder {
    type Transaction = FixedTransaction;
    fn decode(&self, _bytes: &[u8]) -> Result<Self::Transaction> {
        Ok(FixedTransaction {
            hash: self.hash.clone(),
            size: self.size,
        })
    }
}

fn hash_byte(byte: u8) -> Hash {
    Hash::from_bytes(&[byte; 32])
}

fn address(byte: u8) -> Address {
    Address {
        spend_public: hash_byte(byte),
        view_public: hash_byte(byte),
        payment_id: None,
        prefix: 0,
    }
}

fn req(ins: u8, p1: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0xE0, ins, p1, 0x00];
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
    out
}

fn ok(body: &[u8]) -> Vec<u8> {
    let mut out = body.to_vec();
    out.extend_from_slice(&[0x90, 0x00]);
    out
}

fn scanned_input() -> ScannedOutput {
    scanned_input_with(0x11, 14, 1_000_000, 0xEE)
}

fn scanned_input_with(key_byte: u8, global_index: u64, amount: u64, key_image_byte: u8) -> ScannedOutput {
    ScannedOutput {
        index: 0,
        key: hash_byte(key_byte),
        global_index,
        amount,
        input: Some(OwnedOutputInput {
            public_ephemeral: hash_byte(key_byte),
            transaction_keys: TransactionKeys {
                transaction_public_key: hash_byte(0xAA),
                derivation: hash_byte(0xDD),
                output_index: 0,
            },
            private_ephemeral: None,
        }),
        key_image: Some(hash_byte(key_image_byte)),
    }
}

fn load_input_body(amount: u64, keys: &[u8], offsets: &[u32], real_output_index: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&hash_byte(0xAA).to_bytes());
    body.push(0); // input_output_index
    body.extend_from_slice(&amount.to_be_bytes());
    for key_byte in keys {
        body.extend_from_slice(&hash_byte(*key_byte).to_bytes());
    }
    for offset in offsets {
        body.extend_from_slice(&offset.to_be_bytes());
    }
    body.push(real_output_index);
    body
}

#[tokio::test]
async fn successful_build_follows_the_full_phase_sequence_and_resets() {
    use trtl_ledger_core::device::commands;
    let p0 = if cfg!(debug_assertions) { 0x00u8 } else { 0x01u8 };

    let tx_public = hash_byte(0xAA);
    let tx_private = hash_byte(0xBB);
    let final_hash = hash_byte(0xFF);

    let decoys = vec![
        RandomOutput { key: hash_byte(0x01), global_index: 5 },
        RandomOutput { key: hash_byte(0x02), global_index: 9 },
        RandomOutput { key: hash_byte(0x03), global_index: 20 },
    ];

    let mut tx_start_body = Vec::new();
    tx_start_body.extend_from_slice(&0u64.to_be_bytes()); // unlock_time
    tx_start_body.push(1); // input_count
    tx_start_body.push(1); // output_count
    tx_start_body.extend_from_slice(&tx_public.to_bytes());
    tx_start_body.push(0); // no payment id

    // Ring assembled from the decoys above plus the real output (index 14, key 0x11),
    // sorted ascending by index: (5, 0x01), (9, 0x02), (14, 0x11), (20, 0x03).
    let mut load_input_body = Vec::new();
    load_input_body.extend_from_slice(&hash_byte(0xAA).to_bytes());
    load_input_body.push(0); // input_output_index
    load_input_body.extend_from_slice(&1_000_000u64.to_be_bytes());
    for key_byte in [0x01u8, 0x02, 0x11, 0x03] {
        load_input_body.extend_from_slice(&hash_byte(key_byte).to_bytes());
    }
    // relative offsets of [5, 9, 14, 20] -> [5, 4, 5, 6]
    for offset in [5u32, 4, 5, 6] {
        load_input_body.extend_from_slice(&offset.to_be_bytes());
    }
    load_input_body.push(2); // real_output_index

    // Under IdentityCrypto, derivation == destination.view_public and the stealth key ==
    // derivation, so the loaded output key is just the destination address's key byte.
    let mut load_output_body = Vec::new();
    load_output_body.extend_from_slice(&999_990u64.to_be_bytes());
    load_output_body.extend_from_slice(&hash_byte(0x22).to_bytes());

    let dump_chunk = b"0123456789abcdef";
    let script = vec![
        (req(commands::RANDOM_KEY_PAIR, p0, &[]), ok(&[tx_public.to_bytes(), tx_private.to_bytes()].concat())),
        (req(commands::TX_START, 0x01, &tx_start_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[1])), // READY
        (req(commands::TX_START_INPUT_LOAD, p0, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[2])), // RECEIVING_INPUTS
        (req(commands::TX_LOAD_INPUT, 0x01, &load_input_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[3])), // INPUTS_RECEIVED
        (req(commands::TX_START_OUTPUT_LOAD, p0, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[4])), // RECEIVING_OUTPUTS
        (req(commands::TX_LOAD_OUTPUT, 0x01, &load_output_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[5])), // OUTPUTS_RECEIVED
        (req(commands::TX_FINALIZE_TX_PREFIX, 0x01, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[6])), // PREFIX_READY
        (req(commands::TX_SIGN, 0x01, &[]), ok(&[final_hash.to_bytes().to_vec(), 123u16.to_be_bytes().to_vec()].concat())),
        (req(commands::TX_STATE, p0, &[]), ok(&[7])), // COMPLETE
        (req(commands::TX_DUMP, p0, &0u16.to_be_bytes()), ok(dump_chunk)),
        (req(commands::TX_DUMP, p0, &(dump_chunk.len() as u16).to_be_bytes()), ok(&[])),
        (req(commands::TX_RESET, 0x01, &[]), ok(&[])),
    ];

    let transport = ScriptedTransport::new(script);
    let helper = Arc::new(CryptoNoteHelper::new(transport, IdentityCrypto, UnusedAddressCodec, Config::default()));
    let decoder = EchoDecoder { hash: final_hash.clone(), size: 123 };
    let builder = TransactionBuilder::new(helper, decoder);

    let request = TransactionRequest {
        inputs: vec![scanned_input()],
        destinations: vec![GeneratedOutput { amount: 999_990, destination: address(0x22) }],
        decoys,
        mixin: 3,
        fee: 10,
        unlock_time: 0,
        payment_id: None,
    };

    let built = builder.build(request).await.unwrap();
    assert_eq!(built.hash, final_hash);
    assert_eq!(built.size, 123);
}

#[tokio::test]
async fn device_refusal_at_sign_still_resets() {
    use trtl_ledger_core::device::commands;
    let p0 = if cfg!(debug_assertions) { 0x00u8 } else { 0x01u8 };

    let tx_public = hash_byte(0xAA);
    let tx_private = hash_byte(0xBB);

    let decoys = vec![
        RandomOutput { key: hash_byte(0x01), global_index: 5 },
        RandomOutput { key: hash_byte(0x02), global_index: 9 },
        RandomOutput { key: hash_byte(0x03), global_index: 20 },
    ];

    // Only script through TX_SIGN (refused) and the resulting TX_RESET; everything
    // before it is accepted unconditionally by returning a generic OK where the body
    // doesn't matter to the caller.
    let mut tx_start_body = Vec::new();
    tx_start_body.extend_from_slice(&0u64.to_be_bytes());
    tx_start_body.push(1);
    tx_start_body.push(1);
    tx_start_body.extend_from_slice(&tx_public.to_bytes());
    tx_start_body.push(0);

    let mut load_input_body = Vec::new();
    load_input_body.extend_from_slice(&hash_byte(0xAA).to_bytes());
    load_input_body.push(0);
    load_input_body.extend_from_slice(&1_000_000u64.to_be_bytes());
    for key_byte in [0x01u8, 0x02, 0x11, 0x03] {
        load_input_body.extend_from_slice(&hash_byte(key_byte).to_bytes());
    }
    for offset in [5u32, 4, 5, 6] {
        load_input_body.extend_from_slice(&offset.to_be_bytes());
    }
    load_input_body.push(2);

    let mut load_output_body = Vec::new();
    load_output_body.extend_from_slice(&999_990u64.to_be_bytes());
    load_output_body.extend_from_slice(&hash_byte(0x22).to_bytes());

    let script = vec![
        (req(commands::RANDOM_KEY_PAIR, p0, &[]), ok(&[tx_public.to_bytes(), tx_private.to_bytes()].concat())),
        (req(commands::TX_START, 0x01, &tx_start_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[1])),
        (req(commands::TX_START_INPUT_LOAD, p0, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[2])),
        (req(commands::TX_LOAD_INPUT, 0x01, &load_input_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[3])),
        (req(commands::TX_START_OUTPUT_LOAD, p0, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[4])),
        (req(commands::TX_LOAD_OUTPUT, 0x01, &load_output_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[5])),
        (req(commands::TX_FINALIZE_TX_PREFIX, 0x01, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[6])),
        // S7: TX_SIGN refused with 0x6985 -> OP_USER_REQUIRED
        (req(commands::TX_SIGN, 0x01, &[]), vec![0x69, 0x85]),
        (req(commands::TX_RESET, 0x01, &[]), ok(&[])),
    ];

    let transport = ScriptedTransport::new(script);
    let helper = Arc::new(CryptoNoteHelper::new(transport, IdentityCrypto, UnusedAddressCodec, Config::default()));
    let decoder = EchoDecoder { hash: hash_byte(0), size: 0 };
    let builder = TransactionBuilder::new(helper, decoder);

    let request = TransactionRequest {
        inputs: vec![scanned_input()],
        destinations: vec![GeneratedOutput { amount: 999_990, destination: address(0x22) }],
        decoys,
        mixin: 3,
        fee: 10,
        unlock_time: 0,
        payment_id: None,
    };

    let err = builder.build(request).await.unwrap_err();
    match err {
        Error::DeviceProtocolError(code) => {
            assert_eq!(code, trtl_ledger_core::error::KnownDeviceError::OpUserRequired)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn multi_input_build_sorts_by_key_image_descending_and_loads_in_that_order() {
    use trtl_ledger_core::device::commands;
    let p0 = if cfg!(debug_assertions) { 0x00u8 } else { 0x01u8 };

    let tx_public = hash_byte(0xAA);
    let tx_private = hash_byte(0xBB);
    let final_hash = hash_byte(0xFF);

    // Shared decoy pool: none of these global indices collide with any input below.
    let decoys = vec![
        RandomOutput { key: hash_byte(0x01), global_index: 5 },
        RandomOutput { key: hash_byte(0x02), global_index: 9 },
        RandomOutput { key: hash_byte(0x03), global_index: 20 },
    ];

    // Three owned inputs with distinct key images. Strictly-descending key image order
    // is B (0x90), C (0x60), A (0x30) -- deliberately not the order they're listed in
    // the request, so a wrong (ascending, or wrong-field) comparator would send
    // TX_LOAD_INPUT in the wrong order and fail the script match below.
    let input_a = scanned_input_with(0x11, 14, 500_000, 0x30);
    let input_b = scanned_input_with(0x12, 7, 300_000, 0x90);
    let input_c = scanned_input_with(0x13, 50, 200_000, 0x60);

    let mut tx_start_body = Vec::new();
    tx_start_body.extend_from_slice(&0u64.to_be_bytes());
    tx_start_body.push(3); // input_count
    tx_start_body.push(1); // output_count
    tx_start_body.extend_from_slice(&tx_public.to_bytes());
    tx_start_body.push(0);

    // Ring for B: real index 7 among decoys (5, 9, 20) -> sorted [5, 7, 9, 20].
    let body_b = load_input_body(300_000, &[0x01, 0x12, 0x02, 0x03], &[5, 2, 2, 11], 1);
    // Ring for C: real index 50 among decoys (5, 9, 20) -> sorted [5, 9, 20, 50].
    let body_c = load_input_body(200_000, &[0x01, 0x02, 0x03, 0x13], &[5, 4, 11, 30], 3);
    // Ring for A: real index 14 among decoys (5, 9, 20) -> sorted [5, 9, 14, 20].
    let body_a = load_input_body(500_000, &[0x01, 0x02, 0x11, 0x03], &[5, 4, 5, 6], 2);

    let mut load_output_body = Vec::new();
    load_output_body.extend_from_slice(&999_990u64.to_be_bytes());
    load_output_body.extend_from_slice(&hash_byte(0x22).to_bytes());

    let script = vec![
        (req(commands::RANDOM_KEY_PAIR, p0, &[]), ok(&[tx_public.to_bytes(), tx_private.to_bytes()].concat())),
        (req(commands::TX_START, 0x01, &tx_start_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[1])), // READY
        (req(commands::TX_START_INPUT_LOAD, p0, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[2])), // RECEIVING_INPUTS
        (req(commands::TX_LOAD_INPUT, 0x01, &body_b), ok(&[])),
        (req(commands::TX_LOAD_INPUT, 0x01, &body_c), ok(&[])),
        (req(commands::TX_LOAD_INPUT, 0x01, &body_a), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[3])), // INPUTS_RECEIVED
        (req(commands::TX_START_OUTPUT_LOAD, p0, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[4])), // RECEIVING_OUTPUTS
        (req(commands::TX_LOAD_OUTPUT, 0x01, &load_output_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[5])), // OUTPUTS_RECEIVED
        (req(commands::TX_FINALIZE_TX_PREFIX, 0x01, &[]), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[6])), // PREFIX_READY
        (req(commands::TX_SIGN, 0x01, &[]), ok(&[final_hash.to_bytes().to_vec(), 0u16.to_be_bytes().to_vec()].concat())),
        (req(commands::TX_STATE, p0, &[]), ok(&[7])), // COMPLETE
        (req(commands::TX_DUMP, p0, &0u16.to_be_bytes()), ok(&[])),
        (req(commands::TX_RESET, 0x01, &[]), ok(&[])),
    ];

    let transport = ScriptedTransport::new(script);
    let helper = Arc::new(CryptoNoteHelper::new(transport, IdentityCrypto, UnusedAddressCodec, Config::default()));
    let decoder = EchoDecoder { hash: final_hash.clone(), size: 0 };
    let builder = TransactionBuilder::new(helper, decoder);

    let request = TransactionRequest {
        inputs: vec![input_a, input_b, input_c],
        destinations: vec![GeneratedOutput { amount: 999_990, destination: address(0x22) }],
        decoys,
        mixin: 3,
        fee: 10,
        unlock_time: 0,
        payment_id: None,
    };

    let built = builder.build(request).await.unwrap();
    assert_eq!(built.hash, final_hash);
}

#[tokio::test]
async fn unexpected_tx_state_mid_phase_raises_device_state_error_and_still_resets() {
    use trtl_ledger_core::device::commands;
    let p0 = if cfg!(debug_assertions) { 0x00u8 } else { 0x01u8 };

    let tx_public = hash_byte(0xAA);
    let tx_private = hash_byte(0xBB);

    let decoys = vec![
        RandomOutput { key: hash_byte(0x01), global_index: 5 },
        RandomOutput { key: hash_byte(0x02), global_index: 9 },
        RandomOutput { key: hash_byte(0x03), global_index: 20 },
    ];

    let mut tx_start_body = Vec::new();
    tx_start_body.extend_from_slice(&0u64.to_be_bytes());
    tx_start_body.push(1);
    tx_start_body.push(1);
    tx_start_body.extend_from_slice(&tx_public.to_bytes());
    tx_start_body.push(0);

    // After TX_START, the device unexpectedly reports COMPLETE (7) instead of READY (1).
    let script = vec![
        (req(commands::RANDOM_KEY_PAIR, p0, &[]), ok(&[tx_public.to_bytes(), tx_private.to_bytes()].concat())),
        (req(commands::TX_START, 0x01, &tx_start_body), ok(&[])),
        (req(commands::TX_STATE, p0, &[]), ok(&[7])), // unexpected: COMPLETE instead of READY
        (req(commands::TX_RESET, 0x01, &[]), ok(&[])),
    ];

    let transport = ScriptedTransport::new(script);
    let helper = Arc::new(CryptoNoteHelper::new(transport, IdentityCrypto, UnusedAddressCodec, Config::default()));
    let decoder = EchoDecoder { hash: hash_byte(0), size: 0 };
    let builder = TransactionBuilder::new(helper, decoder);

    let request = TransactionRequest {
        inputs: vec![scanned_input()],
        destinations: vec![GeneratedOutput { amount: 999_990, destination: address(0x22) }],
        decoys,
        mixin: 3,
        fee: 10,
        unlock_time: 0,
        payment_id: None,
    };

    let err = builder.build(request).await.unwrap_err();
    assert!(matches!(err, Error::DeviceStateError { .. }), "unexpected error: {err:?}");
}
