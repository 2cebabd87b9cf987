/// Error types for every stage of the pipeline
pub mod error;

/// Core data types shared across modules
pub mod events;

/// Log tailing and trace grouping
pub mod collectors;

/// Time-bounded lookup caches
pub mod cache;

/// Configuration snapshots and their sources
pub mod config;

/// Vhost and version-control enrichment
pub mod enrichment;

/// Outbound delivery to the collector
pub mod dispatch;

/// Run statistics
pub mod monitoring;

/// Main loop tying the pipeline together
pub mod watcher;

// Re-export commonly used types
pub use error::{ConfigError, DispatchError, ProcessError, TailError};
pub use watcher::{LogWatcher, ShutdownSignal, WatcherSettings};
