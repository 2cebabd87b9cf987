/// Polling follower for a single log file with rotation handling
pub mod log_tailer;

/// Start-pattern state machine assembling multi-line error traces
pub mod trace_grouper;

pub use log_tailer::{FileIdentity, LogTailer, StartPosition, TailEvent};
pub use trace_grouper::{group_lines, GrouperState, TraceGrouper};
