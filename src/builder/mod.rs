//! Drives the device's transaction construction state machine end to end: validation,
//! ring assembly, stealth output derivation, the phased `TX_*` command sequence, and
//! final retrieval/verification of the signed transaction.

pub mod types;

pub use types::{BuiltTransaction, TransactionRequest};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::lock::Mutex as AsyncMutex;
use tracing::{instrument, warn};

use crate::crypto::{AddressCodec, CryptoProvider, DecodedTransaction, TransactionDecoder};
use crate::device::commands;
use crate::error::{Error, Result};
use crate::helper::{absolute_to_relative_offsets, CryptoNoteHelper};
use crate::transport::Transport;
use crate::types::{DeviceTxState, Hash, PreparedInput, PreparedOutput, RingMember};

/// Guards the device's single transaction "slot" for the duration of step 5 of a build
/// and guarantees `TX_RESET` is issued on every exit path.
///
/// `Drop` cannot `.await`, so the normal (success or error) exit path calls
/// [`TxSlotGuard::reset`] inline before the guard goes out of scope; if the build future
/// is instead dropped mid-flight (host-side cancellation), `Drop` spawns the same reset
/// as a detached task on the runtime instead. Both routes share one `reset` so `TX_RESET`
/// has a single call site.
struct TxSlotGuard<T: Transport + 'static, C: CryptoProvider + 'static, A: AddressCodec + 'static> {
    helper: Arc<CryptoNoteHelper<T, C, A>>,
    done: AtomicBool,
}

impl<T: Transport + 'static, C: CryptoProvider + 'static, A: AddressCodec + 'static>
    TxSlotGuard<T, C, A>
{
    fn new(helper: Arc<CryptoNoteHelper<T, C, A>>) -> Self {
        Self {
            helper,
            done: AtomicBool::new(false),
        }
    }

    /// Inline, awaited reset for the normal exit path. A no-op if already run.
    async fn reset(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.helper.device().tx_reset().await {
            warn!(error = %err, "tx_reset failed during guarded cleanup");
        }
    }
}

impl<T: Transport + 'static, C: CryptoProvider + 'static, A: AddressCodec + 'static> Drop
    for TxSlotGuard<T, C, A>
{
    fn drop(&mut self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let helper = self.helper.clone();
        tokio::spawn(async move {
            if let Err(err) = helper.device().tx_reset().await {
                warn!(error = %err, "tx_reset failed during cancelled-build cleanup");
            }
        });
    }
}

/// Orchestrates device transaction builds against a shared [`CryptoNoteHelper`].
///
/// The device is a single-session resource: this type's `slot` lock serializes `build`
/// calls so two concurrent builds against the same underlying device never interleave
/// their `TX_LOAD_INPUT` calls. This is coarser than, and independent of, the
/// `DeviceClient`'s own per-exchange lock.
pub struct TransactionBuilder<T: Transport + 'static, C: CryptoProvider + 'static, A: AddressCodec + 'static, D: TransactionDecoder> {
    helper: Arc<CryptoNoteHelper<T, C, A>>,
    decoder: D,
    slot: AsyncMutex<()>,
}

impl<T, C, A, D> TransactionBuilder<T, C, A, D>
where
    T: Transport + 'static,
    C: CryptoProvider + 'static,
    A: AddressCodec + 'static,
    D: TransactionDecoder,
{
    pub fn new(helper: Arc<CryptoNoteHelper<T, C, A>>, decoder: D) -> Self {
        Self {
            helper,
            decoder,
            slot: AsyncMutex::new(()),
        }
    }

    #[instrument(name = "transaction_builder::build", skip_all)]
    pub async fn build(&self, request: TransactionRequest) -> Result<BuiltTransaction<D::Transaction>> {
        let _slot = self.slot.lock().await;

        validate(&self.helper, &request)?;

        let mut prepared_inputs = prepare_inputs(&request)?;
        let (tx_public_key, prepared_outputs) = self.prepare_outputs(&request).await?;

        // Authoritative sort: keyImage descending, applied before any TX_LOAD_INPUT.
        prepared_inputs.sort_by(|a, b| b.key_image.as_str().cmp(a.key_image.as_str()));

        let guard = TxSlotGuard::new(self.helper.clone());
        let outcome = self
            .drive_device(&request, &tx_public_key, &prepared_inputs, &prepared_outputs)
            .await;
        guard.reset().await;
        outcome
    }

    async fn prepare_outputs(
        &self,
        request: &TransactionRequest,
    ) -> Result<(Hash, Vec<PreparedOutput>)> {
        if let Some(max) = self.helper.config().maximum_outputs_per_transaction {
            if request.destinations.len() > max {
                return Err(Error::invalid_argument(format!(
                    "{} outputs exceeds maximumOutputsPerTransaction of {max}",
                    request.destinations.len()
                )));
            }
        }

        let (tx_public_key, tx_private_key) = self.helper.device().random_key_pair().await?;

        let mut destinations = request.destinations.clone();
        destinations.sort_by_key(|d| d.amount);

        let crypto = self.helper.crypto();
        let mut outputs = Vec::with_capacity(destinations.len());
        for (index, destination) in destinations.iter().enumerate() {
            let derivation = crypto.generate_key_derivation(
                &destination.destination.view_public,
                &tx_private_key,
            )?;
            let stealth = crypto.derive_public_key(
                &derivation,
                index as u32,
                &destination.destination.spend_public,
            )?;
            outputs.push(PreparedOutput {
                amount: destination.amount,
                key: stealth,
            });
        }
        Ok((tx_public_key, outputs))
    }

    async fn drive_device(
        &self,
        request: &TransactionRequest,
        tx_public_key: &Hash,
        inputs: &[PreparedInput],
        outputs: &[PreparedOutput],
    ) -> Result<BuiltTransaction<D::Transaction>> {
        let device = self.helper.device();

        device
            .tx_start(
                request.unlock_time,
                inputs.len() as u8,
                outputs.len() as u8,
                tx_public_key,
                request.payment_id.as_ref(),
            )
            .await?;
        device.expect_tx_state(DeviceTxState::Ready).await?;

        device.tx_start_input_load().await?;
        device.expect_tx_state(DeviceTxState::ReceivingInputs).await?;

        for input in inputs {
            let absolute: Vec<u64> = input.outputs.iter().map(|member| member.index).collect();
            let relative = absolute_to_relative_offsets(&absolute);

            let ring_keys: [Hash; commands::INPUT_RING_SIZE] = input
                .outputs
                .iter()
                .map(|member| member.key.clone())
                .collect::<Vec<_>>()
                .try_into()
                .map_err(|_| {
                    Error::invalid_argument(format!(
                        "ring must have exactly {} members",
                        commands::INPUT_RING_SIZE
                    ))
                })?;
            let ring_offsets: [u32; commands::INPUT_RING_SIZE] = relative
                .iter()
                .map(|&offset| {
                    u32::try_from(offset).map_err(|_| {
                        Error::invalid_argument(format!("ring offset {offset} exceeds u32 range"))
                    })
                })
                .collect::<Result<Vec<u32>>>()?
                .try_into()
                .map_err(|_| {
                    Error::invalid_argument(format!(
                        "ring must have exactly {} offsets",
                        commands::INPUT_RING_SIZE
                    ))
                })?;

            device
                .tx_load_input(
                    &input.transaction_keys.transaction_public_key,
                    input.transaction_keys.output_index as u8,
                    input.amount,
                    &ring_keys,
                    &ring_offsets,
                    input.real_output_index as u8,
                )
                .await?;
        }
        device.expect_tx_state(DeviceTxState::InputsReceived).await?;

        device.tx_start_output_load().await?;
        device.expect_tx_state(DeviceTxState::ReceivingOutputs).await?;
        for output in outputs {
            device.tx_load_output(output.amount, &output.key).await?;
        }
        device.expect_tx_state(DeviceTxState::OutputsReceived).await?;

        device.tx_finalize_tx_prefix().await?;
        device.expect_tx_state(DeviceTxState::PrefixReady).await?;

        let sign_result = device.tx_sign().await?;
        device.expect_tx_state(DeviceTxState::Complete).await?;

        let max_size = self.helper.config().maximum_ledger_transaction_size;
        let mut bytes = Vec::new();
        loop {
            let chunk = device.tx_dump(bytes.len() as u16).await?;
            if chunk.is_empty() {
                break;
            }
            bytes.extend_from_slice(&chunk);
            if let Some(max) = max_size {
                if bytes.len() >= max {
                    break;
                }
            }
        }

        let transaction = self.decoder.decode(&bytes)?;
        if transaction.hash() != sign_result.hash || transaction.size() != sign_result.size {
            return Err(Error::DecodeError(format!(
                "retrieved transaction hash/size mismatch: device reported {}/{}, decoded {}/{}",
                sign_result.hash,
                sign_result.size,
                transaction.hash(),
                transaction.size()
            )));
        }

        Ok(BuiltTransaction {
            transaction,
            hash: sign_result.hash,
            size: sign_result.size,
        })
    }
}

fn prepare_inputs(request: &TransactionRequest) -> Result<Vec<PreparedInput>> {
    if request.mixin + 1 != commands::INPUT_RING_SIZE {
        return Err(Error::invalid_argument(format!(
            "mixin must be {} to fill the device's fixed ring size, got {}",
            commands::INPUT_RING_SIZE - 1,
            request.mixin
        )));
    }
    if request.inputs.is_empty() {
        return Err(Error::invalid_argument("at least one input is required"));
    }

    let mut prepared = Vec::with_capacity(request.inputs.len());
    for owned in &request.inputs {
        let input = owned.input.as_ref().ok_or_else(|| {
            Error::invalid_argument("input is missing its owned-output derivation record")
        })?;
        let key_image = owned
            .key_image
            .clone()
            .ok_or_else(|| Error::invalid_argument("input is missing its key image"))?;

        let decoys: Vec<_> = request
            .decoys
            .iter()
            .filter(|candidate| candidate.global_index != owned.global_index)
            .take(request.mixin)
            .collect();
        if decoys.len() < request.mixin {
            return Err(Error::invalid_argument(
                "decoy pool does not contain enough distinct outputs for the requested mixin",
            ));
        }

        let mut members: Vec<RingMember> = decoys
            .into_iter()
            .map(|decoy| RingMember {
                key: decoy.key.clone(),
                index: decoy.global_index,
            })
            .collect();
        members.push(RingMember {
            key: owned.key.clone(),
            index: owned.global_index,
        });
        members.sort_by_key(|member| member.index);
        let real_output_index = members
            .iter()
            .position(|member| member.index == owned.global_index)
            .expect("the real output was just inserted into members");

        prepared.push(PreparedInput {
            amount: owned.amount,
            key_image,
            transaction_keys: input.transaction_keys.clone(),
            outputs: members,
            real_output_index,
        });
    }
    Ok(prepared)
}

fn validate<T: Transport, C: CryptoProvider, A: AddressCodec>(
    helper: &CryptoNoteHelper<T, C, A>,
    request: &TransactionRequest,
) -> Result<()> {
    if request.destinations.is_empty() {
        return Err(Error::invalid_argument("at least one destination is required"));
    }

    if let Some((min, max)) = helper.config().mixin_limits {
        if (request.mixin as u32) < min || (request.mixin as u32) > max {
            return Err(Error::invalid_argument(format!(
                "mixin {} is outside the configured {min}..={max} range",
                request.mixin
            )));
        }
    }

    if let Some(max_amount) = helper.config().maximum_output_amount {
        for destination in &request.destinations {
            if destination.amount == 0 || destination.amount > max_amount {
                return Err(Error::invalid_argument(format!(
                    "destination amount {} is outside the 1..={max_amount} range",
                    destination.amount
                )));
            }
        }
    }

    let mut embedded_payment_id: Option<&Hash> = None;
    for destination in &request.destinations {
        if let Some(pid) = &destination.destination.payment_id {
            match embedded_payment_id {
                Some(existing) if existing != pid => {
                    return Err(Error::PaymentIdConflict(
                        "destinations carry differing integrated payment ids".to_string(),
                    ));
                }
                _ => embedded_payment_id = Some(pid),
            }
        }
    }
    if let (Some(explicit), Some(embedded)) = (&request.payment_id, embedded_payment_id) {
        if explicit != embedded {
            // Preserves a concatenation spacing quirk from the wallet core this was
            // translated from: no space between the two clauses.
            return Err(Error::PaymentIdConflict(format!(
                "{}{}",
                "integrated payment id and explicit payment id", "do not match"
            )));
        }
    }

    let total_in: u64 = request.inputs.iter().map(|input| input.amount).sum();
    let total_out: u64 = request.destinations.iter().map(|d| d.amount).sum();

    if request.fee == 0 {
        // Fusion transaction. The message below names the configured threshold, but the
        // comparison is against the literal 12 regardless of what fusionMinInputCount is
        // actually set to -- preserved as observed, not "fixed" to read the config value.
        if request.inputs.len() < 12 {
            return Err(Error::Insufficient(format!(
                "fusion transactions require at least {} inputs",
                helper.config().fusion_min_input_count
            )));
        }
        if let Some(ratio) = helper.config().fusion_min_in_out_count_ratio {
            let actual = request.inputs.len() as f64 / request.destinations.len() as f64;
            if actual < ratio {
                return Err(Error::Insufficient(format!(
                    "fusion input/output ratio {actual:.2} is below the required {ratio:.2}"
                )));
            }
        }
    } else if !helper.config().activate_fee_per_byte_transactions {
        if total_in < total_out + request.fee {
            return Err(Error::Insufficient(format!(
                "inputs ({total_in}) do not cover outputs plus fee ({})",
                total_out + request.fee
            )));
        }
    }
    // In fee-per-byte mode this "not enough funds" check is skipped entirely: the wallet
    // core this is grounded on never ran it once activateFeePerByteTransactions was set.

    Ok(())
}
