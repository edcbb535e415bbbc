//! Core abstractions shared by every rule
//!
//! The [`Scanner`] trait every rule implements, the fixed severity taxonomy, the
//! [`Finding`] record rules produce, the per-contract [`AnalysisContext`] with its
//! configuration, and the error types that separate fatal parse failures from
//! contained rule failures.

pub mod context;
pub mod error;
pub mod result;
pub mod scanner;
pub mod severity;

pub use context::{AnalysisContext, ScannerConfig, CONFIG_FILE_NAME};
pub use error::{ParseError, RenderError, RuleExecutionError};
pub use result::{DedupKey, Finding, Location, RULE_ERROR_ID};
pub use scanner::Scanner;
pub use severity::Severity;
