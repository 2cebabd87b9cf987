use crate::events::ErrorTrace;
use log::debug;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// Error-onset signature: PHP error headers or web server `[error]` entries
pub const DEFAULT_START_PATTERN: &str =
    r"(?i)(PHP (Fatal error|Warning|Notice|Parse error)|\[error\])";

/// How long a trace may stay open without new lines before it is emitted
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

// Constant pattern, compilation is checked in tests
static DEFAULT_START_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_START_PATTERN).expect("start pattern is a valid regex"));

/// State of the grouping state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrouperState {
    Idle,
    Collecting,
}

/// Assembles raw log lines into multi-line error traces
///
/// A line matching the start pattern opens a trace; every following line is
/// appended until the next start line (which closes the current trace and
/// opens a new one) or until no line arrives within the idle timeout.
/// Lines seen while idle that do not match the start pattern are dropped.
#[derive(Debug)]
pub struct TraceGrouper {
    start_pattern: Regex,
    idle_timeout: Duration,
    current: Option<ErrorTrace>,
    last_line_at: Option<Instant>,
}

impl Default for TraceGrouper {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl TraceGrouper {
    /// Create a grouper using the default start pattern
    pub fn new(idle_timeout: Duration) -> Self {
        Self::with_pattern(DEFAULT_START_REGEX.clone(), idle_timeout)
    }

    /// Create a grouper with a custom start pattern
    pub fn with_pattern(start_pattern: Regex, idle_timeout: Duration) -> Self {
        Self {
            start_pattern,
            idle_timeout,
            current: None,
            last_line_at: None,
        }
    }

    pub fn state(&self) -> GrouperState {
        if self.current.is_some() {
            GrouperState::Collecting
        } else {
            GrouperState::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state() == GrouperState::Idle
    }

    /// Whether `line` begins a new incident
    pub fn is_start(&self, line: &str) -> bool {
        self.start_pattern.is_match(line)
    }

    /// Feed one line received at `now`
    ///
    /// Returns the previous trace when `line` starts a new one while collecting.
    pub fn push(&mut self, line: &str, now: Instant) -> Option<ErrorTrace> {
        if self.is_start(line) {
            let completed = self.current.replace(ErrorTrace::new(line.to_string()));
            self.last_line_at = Some(now);
            if let Some(ref trace) = completed {
                debug!(
                    target: "logwatch::grouper",
                    "Trace closed by next start line lines={}",
                    trace.len()
                );
            }
            return completed;
        }

        match self.current.as_mut() {
            Some(trace) => {
                trace.push(line.to_string());
                self.last_line_at = Some(now);
            }
            None => {
                debug!(target: "logwatch::grouper", "Dropping line outside a trace");
            }
        }
        None
    }

    /// Emit the open trace if no line has arrived within the idle timeout
    pub fn flush_idle(&mut self, now: Instant) -> Option<ErrorTrace> {
        let last = self.last_line_at?;
        if now.saturating_duration_since(last) < self.idle_timeout {
            return None;
        }

        let trace = self.flush();
        if let Some(ref trace) = trace {
            debug!(
                target: "logwatch::grouper",
                "Trace closed by idle timeout lines={}",
                trace.len()
            );
        }
        trace
    }

    /// Emit the open trace unconditionally and return to idle
    ///
    /// Used at end of input, on rotation and on shutdown.
    pub fn flush(&mut self) -> Option<ErrorTrace> {
        self.last_line_at = None;
        self.current.take()
    }
}

/// Group a finite sequence of lines, flushing the open trace at end of input
pub fn group_lines<I, S>(grouper: &mut TraceGrouper, lines: I, now: Instant) -> Vec<ErrorTrace>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut traces: Vec<ErrorTrace> = lines
        .into_iter()
        .filter_map(|line| grouper.push(line.as_ref(), now))
        .collect();
    traces.extend(grouper.flush());
    traces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_start_pattern_compiles() {
        assert!(Regex::new(DEFAULT_START_PATTERN).is_ok());
        assert_eq!(DEFAULT_START_REGEX.as_str(), DEFAULT_START_PATTERN);
    }

    #[test]
    fn test_start_pattern_matches_error_onsets() {
        let grouper = TraceGrouper::default();
        assert!(grouper.is_start(
            "[Mon Jan 01 10:00:00 2024] [error] [client 1.2.3.4] PHP Fatal error:  boom"
        ));
        assert!(grouper.is_start("PHP Warning:  Undefined variable $x in /a/b.php on line 3"));
        assert!(grouper.is_start("PHP Notice:  Undefined index"));
        assert!(grouper.is_start("php parse error: syntax error"));
        assert!(grouper.is_start("[ts][ERROR] something"));
    }

    #[test]
    fn test_start_pattern_ignores_continuation_lines() {
        let grouper = TraceGrouper::default();
        assert!(!grouper.is_start("Stack trace:"));
        assert!(!grouper.is_start("  #0 /var/www/app/index.php(12): run()"));
        assert!(!grouper.is_start("  #1 {main}"));
        assert!(!grouper.is_start("  thrown in /var/www/app/index.php on line 12"));
    }

    #[test]
    fn test_single_trace_flushed_at_end_of_input() {
        let mut grouper = TraceGrouper::default();
        let lines = [
            "[error] PHP Fatal error: boom in /a/b.php on line 7",
            "Stack trace:",
            "  #0 {main}",
        ];

        let traces = group_lines(&mut grouper, lines, Instant::now());
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].text(), lines.join("\n"));
        assert!(grouper.is_idle());
    }

    #[test]
    fn test_two_start_lines_produce_two_traces() {
        let mut grouper = TraceGrouper::default();
        let lines = [
            "PHP Warning: first",
            "  #0 a",
            "PHP Notice: second",
            "  #0 b",
            "  #1 c",
        ];

        let traces = group_lines(&mut grouper, lines, Instant::now());
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].lines(), &["PHP Warning: first", "  #0 a"]);
        assert_eq!(traces[1].lines(), &["PHP Notice: second", "  #0 b", "  #1 c"]);
    }

    #[test]
    fn test_lines_while_idle_are_dropped() {
        let mut grouper = TraceGrouper::default();
        let now = Instant::now();

        assert!(grouper.push("random noise", now).is_none());
        assert!(grouper.is_idle());

        let traces = group_lines(&mut grouper, ["noise", "[error] real", "detail"], now);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].text(), "[error] real\ndetail");
    }

    #[test]
    fn test_idle_timeout_emits_trace() {
        let mut grouper = TraceGrouper::new(Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(grouper.push("[error] boom", t0).is_none());
        assert!(grouper.push("  #0 {main}", t0 + Duration::from_secs(1)).is_none());
        assert_eq!(grouper.state(), GrouperState::Collecting);

        // Timeout runs from the last appended line
        assert!(grouper.flush_idle(t0 + Duration::from_millis(2500)).is_none());

        let trace = grouper.flush_idle(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(trace.text(), "[error] boom\n  #0 {main}");
        assert_eq!(grouper.state(), GrouperState::Idle);
        assert!(grouper.flush_idle(t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_flush_when_idle_returns_none() {
        let mut grouper = TraceGrouper::default();
        assert!(grouper.flush().is_none());
        assert!(grouper.flush_idle(Instant::now()).is_none());
    }

    #[test]
    fn test_custom_pattern() {
        let pattern = Regex::new(r"^ERROR ").unwrap();
        let mut grouper = TraceGrouper::with_pattern(pattern, Duration::from_secs(1));
        let traces = group_lines(
            &mut grouper,
            ["ERROR one", "ctx", "ERROR two"],
            Instant::now(),
        );
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].text(), "ERROR one\nctx");
        assert_eq!(traces[1].text(), "ERROR two");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    /// Continuation lines that can never match the start pattern
    fn continuation(raw: &str, index: usize) -> String {
        let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit()).take(8).collect();
        format!("  #{} frame{}", index, cleaned)
    }

    #[quickcheck]
    fn prop_one_start_line_yields_one_trace(frames: Vec<String>) -> bool {
        let mut lines = vec!["[error] PHP Fatal error: boom".to_string()];
        lines.extend(frames.iter().enumerate().map(|(i, f)| continuation(f, i)));

        let mut grouper = TraceGrouper::default();
        let traces = group_lines(&mut grouper, &lines, Instant::now());

        traces.len() == 1 && traces[0].text() == lines.join("\n")
    }

    #[quickcheck]
    fn prop_traces_partition_lines_in_order(first: Vec<String>, second: Vec<String>) -> bool {
        let first_lines: Vec<String> = std::iter::once("PHP Warning: one".to_string())
            .chain(first.iter().enumerate().map(|(i, f)| continuation(f, i)))
            .collect();
        let second_lines: Vec<String> = std::iter::once("PHP Notice: two".to_string())
            .chain(second.iter().enumerate().map(|(i, f)| continuation(f, i)))
            .collect();

        let mut grouper = TraceGrouper::default();
        let all = first_lines.iter().chain(second_lines.iter());
        let traces = group_lines(&mut grouper, all, Instant::now());

        traces.len() == 2
            && traces[0].lines() == first_lines.as_slice()
            && traces[1].lines() == second_lines.as_slice()
    }
}
