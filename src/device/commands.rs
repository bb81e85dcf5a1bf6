//! Instruction byte constants for every command the core issues, taken verbatim from the
//! device command table.

pub const VERSION: u8 = 0x01;
pub const DEBUG: u8 = 0x02;
pub const IDENT: u8 = 0x05;
pub const PUBLIC_KEYS: u8 = 0x10;
pub const VIEW_SECRET_KEY: u8 = 0x11;
pub const SPEND_ESECRET_KEY: u8 = 0x12;
pub const CHECK_KEY: u8 = 0x16;
pub const CHECK_SCALAR: u8 = 0x17;
pub const PRIVATE_TO_PUBLIC: u8 = 0x18;
pub const RANDOM_KEY_PAIR: u8 = 0x19;
pub const ADDRESS: u8 = 0x30;
pub const GENERATE_KEY_IMAGE: u8 = 0x40;
pub const GENERATE_RING_SIGNATURES: u8 = 0x50;
pub const COMPLETE_RING_SIGNATURE: u8 = 0x51;
pub const CHECK_RING_SIGNATURES: u8 = 0x52;
pub const GENERATE_SIGNATURE: u8 = 0x55;
pub const CHECK_SIGNATURE: u8 = 0x56;
pub const GENERATE_KEY_DERIVATION: u8 = 0x60;
pub const DERIVE_PUBLIC_KEY: u8 = 0x61;
pub const DERIVE_SECRET_KEY: u8 = 0x62;
pub const TX_STATE: u8 = 0x70;
pub const TX_START: u8 = 0x71;
pub const TX_START_INPUT_LOAD: u8 = 0x72;
pub const TX_LOAD_INPUT: u8 = 0x73;
pub const TX_START_OUTPUT_LOAD: u8 = 0x74;
pub const TX_LOAD_OUTPUT: u8 = 0x75;
pub const TX_FINALIZE_TX_PREFIX: u8 = 0x76;
pub const TX_SIGN: u8 = 0x77;
pub const TX_DUMP: u8 = 0x78;
pub const TX_RESET: u8 = 0x79;
pub const RESET_KEYS: u8 = 0xFF;

/// Ring size enforced by the device for `TX_LOAD_INPUT`: 4 ring keys and 4 offsets.
pub const INPUT_RING_SIZE: usize = 4;

/// `TX_START`'s input/output count ceiling.
pub const MAX_TX_START_COUNT: u8 = 90;
