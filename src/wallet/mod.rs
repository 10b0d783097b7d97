//! Wallet module: signing and encrypted key storage
//!
//! Provides address derivation, SIWE/EIP-712 signing, and the master-key
//! encryption used by the job store.

mod encryption;
mod signer;

pub use encryption::{MasterKey, DEFAULT_PASSPHRASE};
pub use signer::{address_from_private_key, OrderParams, Wallet, CHAIN_ID};
