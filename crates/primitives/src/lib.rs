//! Core transaction/block types, consensus serialization, and addresses.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod money;
pub mod outpoint;
pub mod transaction;

pub type Hash256 = [u8; 32];

pub use address::{Address, AddressError, AddressKind, Network};
pub use block::{Block, BlockHeader};
pub use hash::{hash160, hash256_from_hex, hash256_to_hex, sha256, sha256d};
pub use money::{money_range, Amount, COIN, MAX_MONEY};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
