//! Host-side wrapper combining the [`DeviceClient`] with a [`CryptoProvider`] and
//! [`AddressCodec`]: key fetch-and-cache, output scanning, integrated address formation,
//! money formatting, offset arithmetic, fee calculation, and device-backed message
//! signing.

mod session;

pub use session::{Session, SessionData};

use futures::future::join_all;

use crate::config::Config;
use crate::crypto::{AddressCodec, CryptoProvider};
use crate::device::DeviceClient;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{
    Address, GeneratedOutput, Hash, KeyPair, OwnedOutputInput, ScannedOutput, Signature,
    TransactionKeys,
};

/// Computes `r_i = a_i - a_{i-1}` over an ascending sequence, with the first element
/// passed through unchanged.
pub fn absolute_to_relative_offsets(absolute: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(absolute.len());
    let mut previous = 0u64;
    for (i, &value) in absolute.iter().enumerate() {
        out.push(if i == 0 { value } else { value - previous });
        previous = value;
    }
    out
}

/// The inverse prefix sum of [`absolute_to_relative_offsets`].
pub fn relative_to_absolute_offsets(relative: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(relative.len());
    let mut running = 0u64;
    for (i, &value) in relative.iter().enumerate() {
        running = if i == 0 { value } else { running + value };
        out.push(running);
    }
    out
}

/// Combines a [`DeviceClient`], a [`CryptoProvider`], and an [`AddressCodec`] into the
/// higher-level operations a wallet needs. Exclusively owns its `DeviceClient`.
pub struct CryptoNoteHelper<T: Transport, C: CryptoProvider, A: AddressCodec> {
    device: DeviceClient<T>,
    crypto: C,
    address_codec: A,
    config: Config,
    session: Session,
}

impl<T: Transport, C: CryptoProvider, A: AddressCodec> CryptoNoteHelper<T, C, A> {
    pub fn new(transport: T, crypto: C, address_codec: A, config: Config) -> Self {
        Self {
            device: DeviceClient::new(transport),
            crypto,
            address_codec,
            config,
            session: Session::new(),
        }
    }

    pub fn device(&self) -> &DeviceClient<T> {
        &self.device
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn crypto(&self) -> &C {
        &self.crypto
    }

    pub fn address_codec(&self) -> &A {
        &self.address_codec
    }

    fn session_data(&self) -> Result<&SessionData> {
        self.session.get().ok_or_else(|| {
            Error::invalid_argument("fetch_keys must complete before this operation")
        })
    }

    /// One-time key fetch, guarded by the session's `ready` flag. Subsequent calls are a
    /// no-op.
    pub async fn fetch_keys(&self) -> Result<()> {
        if self.session.is_ready() {
            return Ok(());
        }
        let (spend_public, view_public) = self.device.public_keys().await?;
        let view_private = self.device.view_secret_key().await?;
        let address = Address {
            spend_public: spend_public.clone(),
            view_public: view_public.clone(),
            payment_id: None,
            prefix: self.config.address_prefix,
        };
        self.session.publish(SessionData {
            spend: KeyPair {
                public: spend_public,
                private: None,
            },
            view: KeyPair {
                public: view_public,
                private: Some(view_private),
            },
            address,
        });
        Ok(())
    }

    /// The wallet's own base58 address, fetching keys first if necessary.
    pub async fn address(&self) -> Result<String> {
        self.fetch_keys().await?;
        self.address_codec.encode(&self.session_data()?.address)
    }

    /// Recomputes the derivation and stealth key for `output` and, if it matches,
    /// fetches its key image from the device. Fails with [`Error::NotOurOutput`]
    /// (not a hard error — callers scanning a block filter this out) when it doesn't.
    pub async fn is_our_transaction_output(
        &self,
        transaction_public_key: &Hash,
        output: &ScannedOutput,
    ) -> Result<ScannedOutput> {
        let session = self.session_data()?;
        let view_private = session
            .view
            .private
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("session has no cached view private key"))?;

        let derivation = self
            .crypto
            .generate_key_derivation(transaction_public_key, view_private)?;
        let candidate = self
            .crypto
            .derive_public_key(&derivation, output.index, &session.spend.public)?;

        if candidate != output.key {
            return Err(Error::NotOurOutput);
        }

        let key_image = self
            .generate_key_image(transaction_public_key, output.index, &output.key)
            .await?;

        let mut owned = output.clone();
        owned.input = Some(OwnedOutputInput {
            public_ephemeral: candidate,
            transaction_keys: TransactionKeys {
                transaction_public_key: transaction_public_key.clone(),
                derivation,
                output_index: output.index,
            },
            private_ephemeral: None,
        });
        owned.key_image = Some(key_image);
        Ok(owned)
    }

    /// Re-derives on the device (which reissues the derivation internally from its own
    /// cached view secret) and returns the resulting key image.
    pub async fn generate_key_image(
        &self,
        transaction_public_key: &Hash,
        output_index: u32,
        output_key: &Hash,
    ) -> Result<Hash> {
        self.device
            .generate_key_image(transaction_public_key, output_index, output_key)
            .await
    }

    /// Evaluates every output concurrently; the returned list preserves the input
    /// output order regardless of completion order.
    pub async fn scan_transaction_outputs(
        &self,
        transaction_public_key: &Hash,
        outputs: &[ScannedOutput],
    ) -> Result<Vec<ScannedOutput>> {
        let checks = outputs
            .iter()
            .map(|output| self.is_our_transaction_output(transaction_public_key, output));
        let results = join_all(checks).await;

        let mut owned = Vec::new();
        for result in results {
            match result {
                Ok(output) => owned.push(output),
                Err(Error::NotOurOutput) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(owned)
    }

    /// Hashes `message` with `cn_fast_hash` and signs the digest on the device.
    pub async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        let digest = self.crypto.cn_fast_hash(&hex::encode(message))?;
        self.device.generate_signature(&digest).await
    }

    /// Decomposes `amount` into canonical `digit * 10^k` pieces (least-significant digit
    /// first), splitting any piece above `maximumOutputAmount` into chunks of that size.
    pub fn generate_transaction_outputs(
        &self,
        destination: &Address,
        amount: u64,
    ) -> Result<Vec<GeneratedOutput>> {
        let max = self.config.maximum_output_amount.ok_or_else(|| {
            Error::invalid_argument("maximumOutputAmount is not configured")
        })?;

        let mut pieces = Vec::new();
        let mut remaining = amount;
        let mut place = 1u64;
        while remaining > 0 {
            let digit = remaining % 10;
            remaining /= 10;
            if digit != 0 {
                pieces.push(digit * place);
            }
            place = place.saturating_mul(10);
        }

        let mut outputs = Vec::new();
        for piece in pieces {
            let mut left = piece;
            while left > max {
                outputs.push(GeneratedOutput {
                    amount: max,
                    destination: destination.clone(),
                });
                left -= max;
            }
            if left > 0 {
                outputs.push(GeneratedOutput {
                    amount: left,
                    destination: destination.clone(),
                });
            }
        }
        Ok(outputs)
    }

    /// `ceil(size / chunk) * chunk * feePerByte`.
    pub fn calculate_minimum_transaction_fee(&self, size: usize) -> Result<f64> {
        let chunk = self
            .config
            .fee_per_byte_chunk_size
            .ok_or_else(|| Error::invalid_argument("feePerByteChunkSize is not configured"))?
            as f64;
        let fee_per_byte = self
            .config
            .fee_per_byte
            .ok_or_else(|| Error::invalid_argument("feePerByte is not configured"))?;
        let chunks = (size as f64 / chunk).ceil();
        Ok(chunks * chunk * fee_per_byte)
    }

    /// Renders `amount` with `coinUnitPlaces` decimals, e.g. `12345` with 2 places as
    /// `"123.45"`.
    pub fn format_money(&self, amount: u64) -> String {
        let places = self.config.coin_unit_places as usize;
        if places == 0 {
            return amount.to_string();
        }
        let divisor = 10u64.pow(places as u32);
        let whole = amount / divisor;
        let fraction = amount % divisor;
        format!("{whole}.{fraction:0places$}")
    }

    /// The inverse of [`Self::format_money`].
    pub fn parse_money(&self, value: &str) -> Result<u64> {
        let places = self.config.coin_unit_places as usize;
        let divisor = 10u64.pow(places as u32);

        let mut parts = value.splitn(2, '.');
        let whole: u64 = parts
            .next()
            .unwrap_or("0")
            .parse()
            .map_err(|_| Error::invalid_argument(format!("invalid money string {value:?}")))?;
        let fraction_str = parts.next().unwrap_or("");
        if fraction_str.len() > places {
            return Err(Error::invalid_argument(format!(
                "{value:?} has more than {places} decimal places"
            )));
        }
        let fraction = if places == 0 {
            0
        } else {
            let padded = format!("{fraction_str:0<places$}");
            padded
                .parse::<u64>()
                .map_err(|_| Error::invalid_argument(format!("invalid money string {value:?}")))?
        };
        Ok(whole * divisor + fraction)
    }

    /// Decodes `address`, stamps `payment_id` (and `prefix`, if given), and re-encodes.
    pub fn create_integrated_address(
        &self,
        address: &str,
        payment_id: &Hash,
        prefix: Option<u64>,
    ) -> Result<String> {
        let mut decoded = self.address_codec.decode(address)?;
        decoded.payment_id = Some(payment_id.clone());
        if let Some(prefix) = prefix {
            decoded.prefix = prefix;
        }
        self.address_codec.encode(&decoded)
    }

    pub fn decode_address(&self, address: &str) -> Result<Address> {
        self.address_codec.decode(address)
    }

    pub fn encode_address(&self, address: &Address) -> Result<String> {
        self.address_codec.encode(address)
    }

    // ---- explicitly unsupported operations -------------------------------------------

    pub fn create_transaction_structure(&self) -> Result<()> {
        Err(Error::NotSupported(
            "createTransactionStructure: building an unsigned prepared structure is not supported",
        ))
    }

    pub fn prepare_transaction(&self) -> Result<()> {
        Err(Error::NotSupported(
            "prepareTransaction is not supported by this core",
        ))
    }

    pub fn complete_transaction(&self) -> Result<()> {
        Err(Error::NotSupported(
            "completeTransaction: completing an externally prepared transaction is not supported",
        ))
    }
}
