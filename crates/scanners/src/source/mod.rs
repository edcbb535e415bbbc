//! Vulnerability rules
//!
//! Each rule is a [`Scanner`](crate::core::Scanner) over one contract's
//! normalized IR, built on the shared analyses in [`crate::analysis`].

pub mod block_hash;
pub mod classic_reentrancy;
pub mod hardcoded_authority;
pub mod integer_overflow;
pub mod storage_pointer;

pub use block_hash::BlockHashScanner;
pub use classic_reentrancy::ClassicReentrancyScanner;
pub use hardcoded_authority::HardcodedAuthorityScanner;
pub use integer_overflow::IntegerOverflowScanner;
pub use storage_pointer::StoragePointerScanner;
