//! One method per device command. Every method validates its inputs locally, serializes
//! an APDU request, exchanges it with the transport under an exclusive lock, and decodes
//! the response — never leaving malformed data to reach the wire.

pub mod commands;

use std::sync::Mutex as StdMutex;

use futures_util::lock::Mutex as AsyncMutex;
use tracing::{debug, trace, warn};

use crate::apdu::{ApduRequest, ApduResponse, BodyReader, BodyWriter};
use crate::error::{Error, Result};
use crate::observer::EventBus;
use crate::transport::Transport;
use crate::types::{DeviceTxState, Hash, Signature};

/// The device's own version number (major, minor, patch), from `VERSION` (INS 0x01).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl DeviceVersion {
    pub fn as_semver(&self) -> semver::Version {
        semver::Version::new(self.major as u64, self.minor as u64, self.patch as u64)
    }
}

/// The `{hash, size}` pair returned by `TX_SIGN` (INS 0x77).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSignResult {
    pub hash: Hash,
    pub size: u16,
}

fn validate_output_index(index: u32) -> Result<()> {
    if index > 255 {
        return Err(Error::invalid_argument(format!(
            "output index {index} exceeds the device's 0..=255 range"
        )));
    }
    Ok(())
}

/// Whether the device should actually honor a non-confirming request. Non-confirm
/// (`P1 = 0x00`) is only ever honored in a debug build; in release builds every request
/// is sent as if confirmation had been requested.
fn effective_confirm(requested_confirm: bool) -> bool {
    if requested_confirm {
        true
    } else {
        !cfg!(debug_assertions)
    }
}

/// Wraps a single [`Transport`] and speaks the full device command set over it.
///
/// The transport is held behind an async mutex so the client serializes exchanges even
/// when several callers hold a shared reference (`Arc<DeviceClient<T>>`).
pub struct DeviceClient<T: Transport> {
    transport: AsyncMutex<T>,
    send_events: StdMutex<EventBus>,
    receive_events: StdMutex<EventBus>,
}

impl<T: Transport> DeviceClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: AsyncMutex::new(transport),
            send_events: StdMutex::new(EventBus::new()),
            receive_events: StdMutex::new(EventBus::new()),
        }
    }

    /// Register a callback invoked with the hex-encoded outbound request before it is sent.
    pub fn on_send(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.send_events.lock().unwrap().subscribe(callback);
    }

    /// Register a callback invoked with the hex-encoded raw response once it is received.
    pub fn on_receive(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.receive_events.lock().unwrap().subscribe(callback);
    }

    async fn command(&self, ins: u8, confirm: bool, data: Vec<u8>) -> Result<ApduResponse> {
        let request = ApduRequest::new(ins, effective_confirm(confirm), data)?;
        let encoded = request.encode();

        let hex_request = hex::encode(&encoded);
        trace!(ins = format!("{ins:#04x}"), request = %hex_request, "apdu send");
        self.send_events.lock().unwrap().publish(&hex_request);

        let raw = {
            let transport = self.transport.lock().await;
            transport.exchange(&encoded).await?
        };

        let hex_response = hex::encode(&raw);
        trace!(ins = format!("{ins:#04x}"), response = %hex_response, "apdu receive");
        self.receive_events.lock().unwrap().publish(&hex_response);

        match ApduResponse::decode(&raw) {
            Ok(response) => Ok(response),
            Err(err @ Error::DeviceProtocolError(_)) => {
                warn!(ins = format!("{ins:#04x}"), error = %err, "device refused command");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    // ---- identification ----------------------------------------------------------

    pub async fn version(&self) -> Result<DeviceVersion> {
        let response = self.command(commands::VERSION, true, Vec::new()).await?;
        let mut reader = BodyReader::new(&response.body);
        Ok(DeviceVersion {
            major: reader.u8()?,
            minor: reader.u8()?,
            patch: reader.u8()?,
        })
    }

    pub async fn is_debug(&self) -> Result<bool> {
        let response = self.command(commands::DEBUG, false, Vec::new()).await?;
        Ok(BodyReader::new(&response.body).u8()? != 0)
    }

    pub async fn ident(&self) -> Result<String> {
        let response = self.command(commands::IDENT, false, Vec::new()).await?;
        let mut reader = BodyReader::new(&response.body);
        Ok(hex::encode(reader.rest()))
    }

    // ---- keys ----------------------------------------------------------------------

    pub async fn public_keys(&self) -> Result<(Hash, Hash)> {
        let response = self.command(commands::PUBLIC_KEYS, false, Vec::new()).await?;
        let mut reader = BodyReader::new(&response.body);
        let spend = Hash::from_bytes(&reader.hash32()?);
        let view = Hash::from_bytes(&reader.hash32()?);
        Ok((spend, view))
    }

    pub async fn view_secret_key(&self) -> Result<Hash> {
        let response = self
            .command(commands::VIEW_SECRET_KEY, true, Vec::new())
            .await?;
        Ok(Hash::from_bytes(&BodyReader::new(&response.body).hash32()?))
    }

    /// Sensitive: retrieves the spend private key from the device. Present for
    /// completeness with the command table; callers should prefer device-side signing
    /// operations wherever possible.
    pub async fn spend_secret_key(&self) -> Result<Hash> {
        let response = self
            .command(commands::SPEND_ESECRET_KEY, true, Vec::new())
            .await?;
        Ok(Hash::from_bytes(&BodyReader::new(&response.body).hash32()?))
    }

    pub async fn check_key(&self, key: &Hash) -> Result<bool> {
        let mut body = BodyWriter::new();
        body.raw32(&key.to_bytes());
        let response = self
            .command(commands::CHECK_KEY, false, body.into_vec())
            .await?;
        Ok(BodyReader::new(&response.body).u8()? != 0)
    }

    pub async fn check_scalar(&self, scalar: &Hash) -> Result<bool> {
        let mut body = BodyWriter::new();
        body.raw32(&scalar.to_bytes());
        let response = self
            .command(commands::CHECK_SCALAR, false, body.into_vec())
            .await?;
        Ok(BodyReader::new(&response.body).u8()? != 0)
    }

    pub async fn private_to_public(&self, private_key: &Hash) -> Result<Hash> {
        let mut body = BodyWriter::new();
        body.raw32(&private_key.to_bytes());
        let response = self
            .command(commands::PRIVATE_TO_PUBLIC, false, body.into_vec())
            .await?;
        Ok(Hash::from_bytes(&BodyReader::new(&response.body).hash32()?))
    }

    pub async fn random_key_pair(&self) -> Result<(Hash, Hash)> {
        let response = self
            .command(commands::RANDOM_KEY_PAIR, false, Vec::new())
            .await?;
        let mut reader = BodyReader::new(&response.body);
        let public = Hash::from_bytes(&reader.hash32()?);
        let private = Hash::from_bytes(&reader.hash32()?);
        Ok((public, private))
    }

    pub async fn address(&self) -> Result<String> {
        let response = self.command(commands::ADDRESS, true, Vec::new()).await?;
        String::from_utf8(response.body)
            .map_err(|e| Error::invalid_argument(format!("address was not valid utf-8: {e}")))
    }

    // ---- key images and signatures --------------------------------------------------

    pub async fn generate_key_image(
        &self,
        transaction_public_key: &Hash,
        output_index: u32,
        output_key: &Hash,
    ) -> Result<Hash> {
        validate_output_index(output_index)?;
        let mut body = BodyWriter::new();
        body.raw32(&transaction_public_key.to_bytes())
            .u32(output_index)
            .raw32(&output_key.to_bytes());
        let response = self
            .command(commands::GENERATE_KEY_IMAGE, false, body.into_vec())
            .await?;
        Ok(Hash::from_bytes(&BodyReader::new(&response.body).hash32()?))
    }

    pub async fn generate_ring_signatures(
        &self,
        transaction_public_key: &Hash,
        output_index: u32,
        output_key: &Hash,
        prefix_hash: &Hash,
        input_keys: &[Hash],
        real_index: u32,
    ) -> Result<Vec<Signature>> {
        validate_output_index(output_index)?;
        if input_keys.is_empty() {
            return Err(Error::invalid_argument(
                "generate_ring_signatures requires at least one input key",
            ));
        }
        if (real_index as usize) >= input_keys.len() {
            return Err(Error::invalid_argument(format!(
                "real_index {real_index} is out of range for {} input keys",
                input_keys.len()
            )));
        }

        let mut body = BodyWriter::new();
        body.raw32(&transaction_public_key.to_bytes())
            .u32(output_index)
            .raw32(&output_key.to_bytes())
            .raw32(&prefix_hash.to_bytes());
        for key in input_keys {
            body.raw32(&key.to_bytes());
        }
        body.u32(real_index);

        let response = self
            .command(commands::GENERATE_RING_SIGNATURES, false, body.into_vec())
            .await?;

        if response.body.len() % 64 != 0 {
            return Err(Error::invalid_argument(format!(
                "ring signature response of {} bytes is not a multiple of 64",
                response.body.len()
            )));
        }
        let count = response.body.len() / 64;
        if count != input_keys.len() {
            return Err(Error::invalid_argument(format!(
                "device returned {count} signatures for {} input keys",
                input_keys.len()
            )));
        }

        let mut reader = BodyReader::new(&response.body);
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            signatures.push(Signature::from_bytes(&reader.signature64()?));
        }
        Ok(signatures)
    }

    pub async fn complete_ring_signature(
        &self,
        transaction_public_key: &Hash,
        output_index: u32,
        output_key: &Hash,
        k: &Hash,
        partial_signature: &Signature,
    ) -> Result<Signature> {
        validate_output_index(output_index)?;
        let mut body = BodyWriter::new();
        body.raw32(&transaction_public_key.to_bytes())
            .u32(output_index)
            .raw32(&output_key.to_bytes())
            .raw32(&k.to_bytes())
            .raw64(&partial_signature.to_bytes());
        let response = self
            .command(commands::COMPLETE_RING_SIGNATURE, false, body.into_vec())
            .await?;
        Ok(Signature::from_bytes(
            &BodyReader::new(&response.body).signature64()?,
        ))
    }

    pub async fn check_ring_signatures(
        &self,
        prefix_hash: &Hash,
        key_image: &Hash,
        keys: &[Hash],
        signatures: &[Signature],
    ) -> Result<bool> {
        if keys.len() != signatures.len() {
            return Err(Error::invalid_argument(format!(
                "{} keys but {} signatures",
                keys.len(),
                signatures.len()
            )));
        }
        let mut body = BodyWriter::new();
        body.raw32(&prefix_hash.to_bytes()).raw32(&key_image.to_bytes());
        for key in keys {
            body.raw32(&key.to_bytes());
        }
        for signature in signatures {
            body.raw64(&signature.to_bytes());
        }
        let response = self
            .command(commands::CHECK_RING_SIGNATURES, false, body.into_vec())
            .await?;
        Ok(BodyReader::new(&response.body).u8()? != 0)
    }

    pub async fn generate_signature(&self, digest: &Hash) -> Result<Signature> {
        let mut body = BodyWriter::new();
        body.raw32(&digest.to_bytes());
        let response = self
            .command(commands::GENERATE_SIGNATURE, false, body.into_vec())
            .await?;
        Ok(Signature::from_bytes(
            &BodyReader::new(&response.body).signature64()?,
        ))
    }

    pub async fn check_signature(
        &self,
        digest: &Hash,
        public_key: &Hash,
        signature: &Signature,
    ) -> Result<bool> {
        let mut body = BodyWriter::new();
        body.raw32(&digest.to_bytes())
            .raw32(&public_key.to_bytes())
            .raw64(&signature.to_bytes());
        let response = self
            .command(commands::CHECK_SIGNATURE, false, body.into_vec())
            .await?;
        Ok(BodyReader::new(&response.body).u8()? != 0)
    }

    // ---- derivations -----------------------------------------------------------------

    pub async fn generate_key_derivation(&self, transaction_public_key: &Hash) -> Result<Hash> {
        let mut body = BodyWriter::new();
        body.raw32(&transaction_public_key.to_bytes());
        let response = self
            .command(commands::GENERATE_KEY_DERIVATION, false, body.into_vec())
            .await?;
        Ok(Hash::from_bytes(&BodyReader::new(&response.body).hash32()?))
    }

    pub async fn derive_public_key(&self, derivation: &Hash, output_index: u32) -> Result<Hash> {
        validate_output_index(output_index)?;
        let mut body = BodyWriter::new();
        body.raw32(&derivation.to_bytes()).u32(output_index);
        let response = self
            .command(commands::DERIVE_PUBLIC_KEY, false, body.into_vec())
            .await?;
        Ok(Hash::from_bytes(&BodyReader::new(&response.body).hash32()?))
    }

    pub async fn derive_secret_key(&self, derivation: &Hash, output_index: u32) -> Result<Hash> {
        validate_output_index(output_index)?;
        let mut body = BodyWriter::new();
        body.raw32(&derivation.to_bytes()).u32(output_index);
        let response = self
            .command(commands::DERIVE_SECRET_KEY, false, body.into_vec())
            .await?;
        Ok(Hash::from_bytes(&BodyReader::new(&response.body).hash32()?))
    }

    // ---- transaction construction state machine ---------------------------------------

    pub async fn tx_state(&self) -> Result<DeviceTxState> {
        let response = self.command(commands::TX_STATE, false, Vec::new()).await?;
        let code = BodyReader::new(&response.body).u8()?;
        DeviceTxState::try_from(code)
    }

    /// Confirm the device observed `expected` after a phase command, failing with
    /// [`Error::DeviceStateError`] otherwise.
    pub async fn expect_tx_state(&self, expected: DeviceTxState) -> Result<()> {
        let observed = self.tx_state().await?;
        if observed.code() != expected.code() {
            return Err(Error::DeviceStateError {
                expected: expected.to_string(),
                observed: observed.to_string(),
            });
        }
        debug!(state = %observed, "tx state transition confirmed");
        Ok(())
    }

    pub async fn tx_start(
        &self,
        unlock_time: u64,
        input_count: u8,
        output_count: u8,
        transaction_public_key: &Hash,
        payment_id: Option<&Hash>,
    ) -> Result<()> {
        if input_count > commands::MAX_TX_START_COUNT || output_count > commands::MAX_TX_START_COUNT {
            return Err(Error::invalid_argument(format!(
                "input_count/output_count must be <= {}",
                commands::MAX_TX_START_COUNT
            )));
        }
        let mut body = BodyWriter::new();
        body.u64(unlock_time)
            .u8(input_count)
            .u8(output_count)
            .raw32(&transaction_public_key.to_bytes());
        match payment_id {
            Some(pid) => {
                body.u8(1).raw32(&pid.to_bytes());
            }
            None => {
                body.u8(0);
            }
        }
        self.command(commands::TX_START, true, body.into_vec()).await?;
        Ok(())
    }

    pub async fn tx_start_input_load(&self) -> Result<()> {
        self.command(commands::TX_START_INPUT_LOAD, false, Vec::new())
            .await?;
        Ok(())
    }

    /// Load one input. `ring_keys`/`ring_offsets` must each have exactly
    /// [`commands::INPUT_RING_SIZE`] entries: the device's ring size is fixed at 4 mixins.
    pub async fn tx_load_input(
        &self,
        input_transaction_public_key: &Hash,
        input_output_index: u8,
        amount: u64,
        ring_keys: &[Hash; commands::INPUT_RING_SIZE],
        ring_offsets: &[u32; commands::INPUT_RING_SIZE],
        real_index: u8,
    ) -> Result<()> {
        let mut body = BodyWriter::new();
        body.raw32(&input_transaction_public_key.to_bytes())
            .u8(input_output_index)
            .u64(amount);
        for key in ring_keys {
            body.raw32(&key.to_bytes());
        }
        for offset in ring_offsets {
            body.u32(*offset);
        }
        body.u8(real_index);
        self.command(commands::TX_LOAD_INPUT, true, body.into_vec())
            .await?;
        Ok(())
    }

    pub async fn tx_start_output_load(&self) -> Result<()> {
        self.command(commands::TX_START_OUTPUT_LOAD, false, Vec::new())
            .await?;
        Ok(())
    }

    pub async fn tx_load_output(&self, amount: u64, output_key: &Hash) -> Result<()> {
        let mut body = BodyWriter::new();
        body.u64(amount).raw32(&output_key.to_bytes());
        self.command(commands::TX_LOAD_OUTPUT, true, body.into_vec())
            .await?;
        Ok(())
    }

    pub async fn tx_finalize_tx_prefix(&self) -> Result<()> {
        self.command(commands::TX_FINALIZE_TX_PREFIX, true, Vec::new())
            .await?;
        Ok(())
    }

    pub async fn tx_sign(&self) -> Result<TxSignResult> {
        let response = self.command(commands::TX_SIGN, true, Vec::new()).await?;
        let mut reader = BodyReader::new(&response.body);
        let hash = Hash::from_bytes(&reader.hash32()?);
        let size = reader.u16()?;
        if reader.remaining() != 0 {
            return Err(Error::invalid_argument(format!(
                "tx_sign response had {} unexpected trailing bytes",
                reader.remaining()
            )));
        }
        Ok(TxSignResult { hash, size })
    }

    pub async fn tx_dump(&self, offset: u16) -> Result<Vec<u8>> {
        let mut body = BodyWriter::new();
        body.u16(offset);
        let response = self.command(commands::TX_DUMP, false, body.into_vec()).await?;
        Ok(response.body)
    }

    pub async fn tx_reset(&self) -> Result<()> {
        self.command(commands::TX_RESET, true, Vec::new()).await?;
        Ok(())
    }

    pub async fn reset_keys(&self) -> Result<()> {
        self.command(commands::RESET_KEYS, true, Vec::new()).await?;
        Ok(())
    }
}
