//! Runtime module: the ambient layer around the scan core.
//!
//! This module provides:
//! - Diagnostic sinks (tracing, collecting, callback)
//! - JSON-loadable scan options lowered into a validated configuration

pub mod diagnostics;
pub mod options;

pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, TracingSink};
pub use options::ScanOptions;
