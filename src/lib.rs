//! Client library for a CryptoNote (TurtleCoin-family) Ledger hardware wallet app.
//!
//! Speaks the device's binary APDU command protocol ([`apdu`], [`device`]) and drives
//! the multi-phase on-device transaction construction state machine ([`builder`]) while
//! keeping the spend private key on the device. Host-side cryptography, address
//! encoding, transport, and transaction decoding are all external collaborators named
//! only by the traits in [`crypto`] and [`transport`].

pub mod apdu;
pub mod builder;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod helper;
pub mod observer;
pub mod transport;
pub mod types;

pub use builder::{BuiltTransaction, TransactionBuilder, TransactionRequest};
pub use config::Config;
pub use crypto::{AddressCodec, CryptoProvider, DecodedTransaction, TransactionDecoder};
pub use device::DeviceClient;
pub use error::{Error, Result};
pub use helper::CryptoNoteHelper;
pub use transport::Transport;
