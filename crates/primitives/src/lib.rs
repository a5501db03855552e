//! Chain-level data types shared by the cosigner: names, assets, keys,
//! transactions and the little-endian binary codec they are packed with.

pub mod asset;
pub mod binary;
pub mod crypto;
pub mod hash;
pub mod name;
pub mod timestamp;
pub mod transaction;

pub use hash::{ChainId, SigningDigest, TransactionId};
pub use name::Name;
