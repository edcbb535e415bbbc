//! Analyses shared by the rules
//!
//! Each analysis is a pure function over one contract's IR. Guard extraction
//! finds the preconditions the others consult.

pub mod effect_order;
pub mod guards;
pub mod provenance;
pub mod scope_resolver;
pub mod version_parser;

pub use effect_order::{EffectEntry, StateWrite};
pub use guards::{Guard, GuardKind};
pub use provenance::{BlockHashUse, HardcodedAuthority, LiteralOrigin};
pub use scope_resolver::{CrossBranchUse, Resolution, ScopeResolution};
pub use version_parser::{parse_solidity_version, parse_version, SolidityVersion};
