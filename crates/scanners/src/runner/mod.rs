//! Rule execution and result aggregation
//!
//! The engine normalizes a source, runs every registered rule over each
//! contract (in parallel when configured), turns rule failures into findings
//! and hands the merged, ordered list to a [`ScanReport`] for rendering.

pub mod engine;
pub mod registry;
pub mod report;

pub use engine::{aggregate, ScanningEngine};
pub use registry::ScannerRegistry;
pub use report::{MarkdownOptions, ScanReport, SeverityCount};
