//! Configuration read once at construction time. Unrecognized keys are ignored rather
//! than rejected, since callers routinely pass through a superset of wallet config.

use serde::Deserialize;

fn default_coin_unit_places() -> u32 {
    2
}

fn default_keccak_iterations() -> u32 {
    1
}

fn default_fusion_min_input_count() -> u32 {
    12
}

fn default_address_prefix() -> u64 {
    0
}

/// All values the core reads at construction time. Fields with no sane default are
/// `Option`-typed; operations that need them fail with [`crate::Error::InvalidArgument`]
/// if the caller never supplied them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_coin_unit_places")]
    pub coin_unit_places: u32,

    #[serde(default = "default_address_prefix")]
    pub address_prefix: u64,

    #[serde(default = "default_keccak_iterations")]
    pub keccak_iterations: u32,

    #[serde(default)]
    pub default_network_fee: Option<u64>,

    #[serde(default = "default_fusion_min_input_count")]
    pub fusion_min_input_count: u32,

    #[serde(default)]
    pub fusion_min_in_out_count_ratio: Option<f64>,

    #[serde(default)]
    pub maximum_output_amount: Option<u64>,

    #[serde(default)]
    pub maximum_outputs_per_transaction: Option<usize>,

    #[serde(default)]
    pub maximum_extra_size: Option<usize>,

    #[serde(default)]
    pub activate_fee_per_byte_transactions: bool,

    #[serde(default)]
    pub fee_per_byte: Option<f64>,

    #[serde(default)]
    pub fee_per_byte_chunk_size: Option<u64>,

    #[serde(default)]
    pub maximum_ledger_transaction_size: Option<usize>,

    /// Ambient, not part of the distilled fee/mixin math: used only to produce a
    /// friendlier `InvalidArgument` message before a mixin count reaches the device.
    #[serde(default)]
    pub mixin_limits: Option<(u32, u32)>,

    /// When set, promotes the `tracing` events mirroring `send`/`receive` traffic from
    /// `trace!` to `debug!` so they show up under a default log filter.
    #[serde(default)]
    pub log_transport_traffic: bool,

    /// Anything the caller passed that this core doesn't recognize. Kept around so
    /// deserialization never fails on an unexpected key, per the "unrecognized keys are
    /// ignored" rule.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        // Round-trip through an empty JSON object so every `#[serde(default = ...)]`
        // fires exactly the way it would for a caller-supplied config missing that key.
        serde_json::from_value(serde_json::json!({})).expect("defaults must deserialize")
    }
}

impl Config {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
