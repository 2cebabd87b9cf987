use crate::collectors::{LogTailer, StartPosition, TailEvent, TraceGrouper};
use crate::config::{Config, ConfigSource};
use crate::dispatch::Dispatch;
use crate::enrichment::MetadataEnricher;
use crate::events::ErrorTrace;
use crate::monitoring::RunStats;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Loop tunables that do not come from the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherSettings {
    /// How often the config source is re-read
    pub reload_interval: Duration,
    /// Pause between two iterations of the loop
    pub poll_interval: Duration,
    /// Silence after which an open trace is emitted
    pub idle_timeout: Duration,
    /// Where the first opened log starts reading
    pub start_position: StartPosition,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(2),
            start_position: StartPosition::End,
        }
    }
}

/// Cooperative cancellation flag checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// Single-threaded orchestrator: tail, group, enrich, dispatch
///
/// Each [`tick`](Self::tick) reloads the configuration when due, reads newly
/// appended lines, feeds them to the grouper and handles every emitted trace
/// in order. Failures are logged and counted; none of them stops the loop.
pub struct LogWatcher {
    settings: WatcherSettings,
    source: Box<dyn ConfigSource>,
    enricher: MetadataEnricher,
    dispatcher: Box<dyn Dispatch>,
    config: Option<Arc<Config>>,
    tailer: Option<LogTailer>,
    grouper: TraceGrouper,
    next_reload: Option<Instant>,
    /// Whether an open has been attempted for the configured log path
    open_attempted: bool,
    /// Whether the log is currently known to be missing, to avoid repeating warnings
    log_unavailable: bool,
    /// Result of the last vhost directory check, made whenever the directory is configured
    vhost_dir_available: Option<bool>,
    stats: RunStats,
}

impl LogWatcher {
    /// Create a watcher; nothing is loaded or opened until the first tick
    ///
    /// # Arguments
    ///
    /// * `settings` - Loop tunables
    /// * `source` - Where configuration snapshots come from
    /// * `enricher` - Metadata enricher, owned by the loop
    /// * `dispatcher` - Delivers enriched traces
    pub fn new(
        settings: WatcherSettings,
        source: Box<dyn ConfigSource>,
        enricher: MetadataEnricher,
        dispatcher: Box<dyn Dispatch>,
    ) -> Self {
        Self {
            settings,
            source,
            enricher,
            dispatcher,
            config: None,
            tailer: None,
            grouper: TraceGrouper::new(settings.idle_timeout),
            next_reload: None,
            open_attempted: false,
            log_unavailable: false,
            vhost_dir_available: None,
            stats: RunStats::new(),
        }
    }

    /// Current configuration snapshot, if one has ever loaded
    pub fn config(&self) -> Option<Arc<Config>> {
        self.config.clone()
    }

    /// Path of the log currently being tailed
    pub fn log_path(&self) -> Option<&Path> {
        self.tailer.as_ref().map(LogTailer::path)
    }

    /// Whether the configured vhost directory existed when last checked
    ///
    /// `None` until a configuration has loaded.
    pub fn vhost_dir_available(&self) -> Option<bool> {
        self.vhost_dir_available
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Run until `shutdown` is triggered, then flush and log the summary
    pub fn run(&mut self, shutdown: &ShutdownSignal) {
        info!(
            target: "logwatch::watcher",
            "Watcher started config={} reload_interval={}s poll_interval={}ms idle_timeout={}ms",
            self.source.describe(),
            self.settings.reload_interval.as_secs(),
            self.settings.poll_interval.as_millis(),
            self.settings.idle_timeout.as_millis()
        );

        while !shutdown.is_triggered() {
            self.tick(Instant::now());
            std::thread::sleep(self.settings.poll_interval);
        }

        info!(target: "logwatch::watcher", "Shutdown requested");
        self.shutdown();
    }

    /// One iteration of the loop as of `now`
    pub fn tick(&mut self, now: Instant) {
        if self.next_reload.map_or(true, |due| now >= due) {
            self.reload(now);
        }

        let Some(config) = self.config.clone() else {
            return;
        };

        self.ensure_tailer(&config);

        let polled = match self.tailer.as_mut() {
            Some(tailer) => tailer.poll(),
            None => return,
        };

        match polled {
            Ok(events) => {
                if self.log_unavailable {
                    info!(
                        target: "logwatch::watcher",
                        "Log available again path={}",
                        config.log_path.display()
                    );
                    self.log_unavailable = false;
                }
                for event in events {
                    self.handle_event(event, now);
                }
            }
            Err(e) => self.report_unavailable(&e.to_string()),
        }

        if let Some(trace) = self.grouper.flush_idle(now) {
            self.process_trace(trace, now);
        }
    }

    /// Flush the open trace and log run statistics
    pub fn shutdown(&mut self) {
        if let Some(trace) = self.grouper.flush() {
            debug!(
                target: "logwatch::watcher",
                "Flushing open trace on shutdown lines={}",
                trace.len()
            );
            self.process_trace(trace, Instant::now());
        }
        self.stats.log_summary();
    }

    fn reload(&mut self, now: Instant) {
        self.next_reload = Some(now + self.settings.reload_interval);

        match self.source.load() {
            Ok(config) => {
                self.stats.config_reloads += 1;
                if self.config.as_deref() == Some(&config) {
                    debug!(target: "logwatch::config", "Configuration unchanged");
                    return;
                }

                info!(
                    target: "logwatch::config",
                    "Configuration loaded source={} log={} enabled={} endpoint={} vhost_dir={}",
                    self.source.describe(),
                    config.log_path.display(),
                    config.enabled,
                    config.endpoint_url,
                    config.vhost_dir.display()
                );
                let first_load = self.config.is_none();
                if self.enricher.set_vhost_dir(&config.vhost_dir) || first_load {
                    self.vhost_dir_available = Some(self.enricher.check_vhost_dir());
                }
                self.config = Some(Arc::new(config));
            }
            Err(e) => {
                self.stats.reload_failures += 1;
                if self.config.is_some() {
                    error!(
                        target: "logwatch::config",
                        "Config reload failed, keeping previous snapshot source={} error={}",
                        self.source.describe(),
                        e
                    );
                } else {
                    error!(
                        target: "logwatch::config",
                        "Config load failed, watcher idle until next reload source={} error={}",
                        self.source.describe(),
                        e
                    );
                }
            }
        }
    }

    /// Open the configured log, or switch to it once no trace is in progress
    fn ensure_tailer(&mut self, config: &Config) {
        if let Some(tailer) = self.tailer.as_ref() {
            if tailer.path() == config.log_path {
                return;
            }
            if !self.grouper.is_idle() {
                debug!(
                    target: "logwatch::watcher",
                    "Deferring log switch until the open trace completes new={}",
                    config.log_path.display()
                );
                return;
            }
            info!(
                target: "logwatch::watcher",
                "Switching log old={} new={}",
                tailer.path().display(),
                config.log_path.display()
            );
            self.tailer = None;
            self.open_attempted = false;
            self.log_unavailable = false;
        }

        let start = if self.open_attempted {
            StartPosition::Beginning
        } else {
            self.settings.start_position
        };
        self.open_attempted = true;

        match LogTailer::open(&config.log_path, start) {
            Ok(tailer) => {
                info!(
                    target: "logwatch::watcher",
                    "Tailing log path={} offset={}",
                    config.log_path.display(),
                    tailer.offset()
                );
                self.log_unavailable = false;
                self.tailer = Some(tailer);
            }
            Err(e) => self.report_unavailable(&e.to_string()),
        }
    }

    fn report_unavailable(&mut self, reason: &str) {
        if self.log_unavailable {
            debug!(target: "logwatch::watcher", "Log still unavailable error={}", reason);
        } else {
            warn!(target: "logwatch::watcher", "Log unavailable error={}", reason);
            self.log_unavailable = true;
        }
    }

    fn handle_event(&mut self, event: TailEvent, now: Instant) {
        match event {
            TailEvent::Line(line) => {
                debug!(
                    target: "logwatch::watcher",
                    "Line offset={} len={}",
                    line.offset,
                    line.text.len()
                );
                if let Some(trace) = self.grouper.push(&line.text, now) {
                    self.process_trace(trace, now);
                }
            }
            TailEvent::Rotated => {
                self.stats.rotations += 1;
                if let Some(trace) = self.grouper.flush() {
                    debug!(
                        target: "logwatch::watcher",
                        "Flushing open trace on rotation lines={}",
                        trace.len()
                    );
                    self.process_trace(trace, now);
                }
            }
        }
    }

    fn process_trace(&mut self, trace: ErrorTrace, now: Instant) {
        self.stats.traces_emitted += 1;

        let enrichment = self.enricher.enrich_at(&trace, now);
        for failure in &enrichment.failures {
            warn!(target: "logwatch::enricher", "Enrichment degraded {}", failure);
        }
        self.stats.enrichment_failures += enrichment.failures.len() as u64;

        // Read the snapshot per trace so a reload applies to the next one
        let Some(config) = self.config.clone() else {
            warn!(target: "logwatch::watcher", "Dropping trace without configuration");
            return;
        };
        if !config.enabled {
            debug!(target: "logwatch::watcher", "Forwarding disabled, trace not sent");
            self.stats.traces_suppressed += 1;
            return;
        }

        let detail = &enrichment.detail;
        match self
            .dispatcher
            .send(&trace, detail, &config.endpoint_url)
        {
            Ok(()) => {
                self.stats.traces_dispatched += 1;
                info!(
                    target: "logwatch::dispatch",
                    "Trace dispatched file={} line={} lines={}",
                    detail
                        .file
                        .as_ref()
                        .map(|f| f.display().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    detail.line.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
                    trace.len()
                );
            }
            Err(e) => {
                self.stats.dispatch_failures += 1;
                error!(
                    target: "logwatch::dispatch",
                    "Dispatch failed, trace dropped endpoint={} error={}",
                    config.endpoint_url,
                    e
                );
            }
        }
    }
}
