//! Metadata enrichment for error traces
//!
//! Resolves the source location named in a trace to its virtual host,
//! repository remote and line blame, caching every lookup.

/// Cached enrichment pipeline
pub mod enricher;

/// Git repository lookups
pub mod git;

/// External command execution with timeouts
pub mod process;

/// Virtual-host definition search
pub mod vhost;

pub use enricher::{extract_location, Enrichment, MetadataEnricher};
pub use process::{ProcessInvoker, SystemProcessInvoker};
pub use vhost::{DirectoryVhostLocator, VhostLocator};
