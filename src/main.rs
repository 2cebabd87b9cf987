use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info};
use logwatch::collectors::StartPosition;
use logwatch::config::{JsonConfigFile, DEFAULT_VHOST_DIR};
use logwatch::dispatch::HttpDispatcher;
use logwatch::enrichment::{DirectoryVhostLocator, MetadataEnricher, SystemProcessInvoker};
use logwatch::{LogWatcher, ShutdownSignal, WatcherSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the error log watcher
#[derive(Parser, Debug)]
#[command(
    name = "logwatch",
    about = "PHP/Apache error log watcher - groups error traces and forwards them to a webhook",
    long_about = "Follows a web server error log, groups multi-line PHP errors into traces, \
                  enriches each trace with its virtual host, git remote and line blame, and \
                  posts the result to an n8n webhook. The JSON config file is re-read \
                  periodically, so the log path, endpoint and on/off switch can change \
                  without a restart."
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Seconds between config file reloads
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    reload_interval: u64,

    /// Milliseconds between log polls
    #[arg(long, value_name = "MS", default_value_t = 500)]
    poll_interval_ms: u64,

    /// Milliseconds of silence after which an open trace is sent
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    idle_timeout_ms: u64,

    /// Process the existing log content instead of starting at its end
    #[arg(long)]
    from_start: bool,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        // A missing file is fine: the watcher idles until it appears
        if self.config.exists() && !self.config.is_file() {
            return Err(format!(
                "Configuration path is not a file: {}",
                self.config.display()
            ));
        }
        if self.reload_interval == 0 {
            return Err("--reload-interval must be greater than zero".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("--poll-interval-ms must be greater than zero".to_string());
        }
        if self.idle_timeout_ms == 0 {
            return Err("--idle-timeout-ms must be greater than zero".to_string());
        }
        Ok(())
    }

    fn settings(&self) -> WatcherSettings {
        WatcherSettings {
            reload_interval: Duration::from_secs(self.reload_interval),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            start_position: if self.from_start {
                StartPosition::Beginning
            } else {
                StartPosition::End
            },
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Err(e) = cli.validate() {
        bail!("Invalid arguments: {}", e);
    }

    let dispatcher = HttpDispatcher::new().context("Failed to initialize HTTP dispatcher")?;
    let enricher = MetadataEnricher::new(
        Box::new(SystemProcessInvoker::default()),
        Box::new(DirectoryVhostLocator::new()),
        DEFAULT_VHOST_DIR,
    );
    enricher.check_dependencies();

    let mut watcher = LogWatcher::new(
        cli.settings(),
        Box::new(JsonConfigFile::new(&cli.config)),
        enricher,
        Box::new(dispatcher),
    );

    // SIGINT and SIGTERM (ctrlc "termination" feature)
    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received termination signal, shutting down gracefully...");
        handler_signal.trigger();
    })
    .context("Error setting signal handler for graceful shutdown")?;

    info!("Log watcher is running. Press Ctrl+C to stop.");
    watcher.run(&shutdown);
    Ok(())
}

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting logwatch");

    if let Err(e) = run(&cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("logwatch shutdown complete");
}
